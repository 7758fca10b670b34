use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

fn segments(version: &str) -> impl Iterator<Item = Segment<'_>> {
    version.split(['.', '-']).map(|part| match part.parse::<u64>() {
        Ok(number) => Segment::Number(number),
        Err(_) => Segment::Text(part),
    })
}

/// Orders release strings segment by segment after treating `-` as `.`.
///
/// Numeric segments compare as numbers and sort before textual ones, so
/// `1.0rc1 > 1.0.5` and `2.10 > 2.9`. This is a display ordering, not PEP 440.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    segments(left)
        .cmp(segments(right))
        .then_with(|| left.cmp(right))
}

pub fn sort_versions_newest_first(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(b, a));
}
