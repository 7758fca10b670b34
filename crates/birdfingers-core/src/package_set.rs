use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedPackage {
    pub display_name: String,
    pub version: String,
}

/// Normalized `name -> version` pins plus the lines that are not exact pins.
///
/// Keys are the lowercase form of the display name. Versions are opaque and
/// only ever compared for string equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSet {
    entries: BTreeMap<String, PinnedPackage>,
    other_lines: Vec<String>,
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `freeze`-style pin text. Never fails: anything that is not an
    /// exact `name==version` pin is kept verbatim in `other_lines`.
    pub fn parse(text: &str) -> Self {
        let mut set = Self::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if is_direct_reference(line) {
                set.other_lines.push(line.to_string());
                continue;
            }

            match split_exact_pin(line) {
                Some((name, version)) => set.insert(name, version),
                None => set.other_lines.push(line.to_string()),
            }
        }
        set
    }

    /// Adds or replaces a pin; a later pin for the same normalized name wins.
    pub fn insert(&mut self, display_name: &str, version: &str) {
        let display_name = display_name.trim();
        self.entries.insert(
            normalize_name(display_name),
            PinnedPackage {
                display_name: display_name.to_string(),
                version: version.trim().to_string(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&PinnedPackage> {
        self.entries.get(&normalize_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Pinned entries in normalized-name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &PinnedPackage)> {
        self.entries.iter().map(|(key, pin)| (key.as_str(), pin))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn other_lines(&self) -> &[String] {
        &self.other_lines
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the pinned entries back to `name==version` lines, sorted by
    /// normalized name.
    pub fn render_pins(&self) -> String {
        let mut out = String::new();
        for pin in self.entries.values() {
            out.push_str(&format!("{}=={}\n", pin.display_name, pin.version));
        }
        out
    }
}

fn is_direct_reference(line: &str) -> bool {
    line.contains(" @ ")
        || line.starts_with("-e ")
        || line.starts_with("--editable")
        || line.contains("://")
}

fn split_exact_pin(line: &str) -> Option<(&str, &str)> {
    let (name, version) = line.split_once("==")?;
    let name = name.trim();
    let version = version.trim();
    if name.is_empty() || version.is_empty() {
        return None;
    }
    // `===` arbitrary equality, environment markers and extra clauses are
    // not plain pins.
    if version.starts_with('=')
        || version.contains(char::is_whitespace)
        || version.contains([';', ',', '<', '>', '!', '~'])
    {
        return None;
    }
    if name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, version))
}
