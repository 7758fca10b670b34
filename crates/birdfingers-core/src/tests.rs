use super::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn set_of(pins: &[(&str, &str)]) -> PackageSet {
    let mut set = PackageSet::new();
    for (name, version) in pins {
        set.insert(name, version);
    }
    set
}

fn set_from_map(pins: &BTreeMap<String, String>) -> PackageSet {
    let mut set = PackageSet::new();
    for (name, version) in pins {
        set.insert(name, version);
    }
    set
}

fn install_keys(plan: &ReconciliationPlan) -> BTreeSet<String> {
    plan.installs.iter().map(|i| normalize_name(&i.name)).collect()
}

fn uninstall_keys(plan: &ReconciliationPlan) -> BTreeSet<String> {
    plan.uninstalls
        .iter()
        .map(|u| normalize_name(&u.name))
        .collect()
}

fn unchanged_keys(plan: &ReconciliationPlan) -> BTreeSet<String> {
    plan.unchanged.iter().map(|u| normalize_name(&u.name)).collect()
}

#[test]
fn parse_freeze_output_splits_pins_and_other_lines() {
    let text = "\
# generated
Django==4.2.7
requests==2.31.0

-e git+https://github.com/acme/tool.git@abc#egg=tool
mylib @ file:///tmp/mylib
numpy>=1.26
";
    let set = PackageSet::parse(text);
    assert_eq!(set.len(), 2);
    let django = set.get("django").expect("django must be pinned");
    assert_eq!(django.display_name, "Django");
    assert_eq!(django.version, "4.2.7");
    assert_eq!(set.get("REQUESTS").expect("lookup is case-insensitive").version, "2.31.0");
    assert_eq!(
        set.other_lines(),
        &[
            "-e git+https://github.com/acme/tool.git@abc#egg=tool".to_string(),
            "mylib @ file:///tmp/mylib".to_string(),
            "numpy>=1.26".to_string(),
        ]
    );
}

#[test]
fn parse_keeps_non_plain_pins_out_of_entries() {
    let set = PackageSet::parse("odd===1.0\n==1.0\nname==\nmarked==1.0 ; python_version<'3.8'\n");
    assert!(set.is_empty());
    assert_eq!(set.other_lines().len(), 4);
}

#[test]
fn parse_later_duplicate_pin_wins() {
    let set = PackageSet::parse("Flask==2.0\nflask==3.0\n");
    assert_eq!(set.len(), 1);
    let flask = set.get("flask").expect("flask pinned");
    assert_eq!(flask.display_name, "flask");
    assert_eq!(flask.version, "3.0");
}

#[test]
fn simple_upgrade_scenario() {
    let source = set_of(&[("a", "1.0"), ("b", "2.0")]);
    let target = set_of(&[("a", "1.1"), ("b", "2.0"), ("c", "3.0")]);

    let plan = diff(&source, &target);
    assert_eq!(
        plan.installs,
        vec![
            PlannedInstall {
                name: "a".to_string(),
                from: Some("1.0".to_string()),
                to: "1.1".to_string(),
            },
            PlannedInstall {
                name: "c".to_string(),
                from: None,
                to: "3.0".to_string(),
            },
        ]
    );
    assert!(plan.uninstalls.is_empty());
    assert_eq!(
        plan.unchanged,
        vec![UnchangedPackage {
            name: "b".to_string(),
            version: "2.0".to_string(),
        }]
    );
}

#[test]
fn removal_scenario() {
    let source = set_of(&[("a", "1.0"), ("b", "2.0")]);
    let target = set_of(&[("a", "1.0")]);

    let plan = diff(&source, &target);
    assert!(plan.installs.is_empty());
    assert_eq!(
        plan.uninstalls,
        vec![PlannedUninstall {
            name: "b".to_string(),
            from: "2.0".to_string(),
        }]
    );
    assert_eq!(plan.counts().unchanged, 1);
}

#[test]
fn diff_matches_names_case_insensitively() {
    let source = set_of(&[("PyYAML", "6.0")]);
    let target = set_of(&[("pyyaml", "6.0")]);

    let plan = diff(&source, &target);
    assert!(plan.is_noop());
    assert_eq!(plan.unchanged[0].name, "pyyaml");
}

#[test]
fn versions_compare_as_opaque_strings() {
    let source = set_of(&[("pkg", "1.0")]);
    let target = set_of(&[("pkg", "1.0.0")]);

    let plan = diff(&source, &target);
    assert_eq!(plan.installs.len(), 1);
    assert_eq!(plan.installs[0].from.as_deref(), Some("1.0"));
}

#[test]
fn command_lines_uninstall_sorted_first_then_pinned_installs() {
    let source = set_of(&[("zeta", "1.0"), ("Alpha", "1.0"), ("keep", "1.0")]);
    let target = set_of(&[("keep", "2.0"), ("new", "0.1")]);

    let plan = diff(&source, &target);
    assert_eq!(
        plan.command_lines("python -m pip"),
        vec![
            "python -m pip uninstall -y Alpha zeta".to_string(),
            "python -m pip install keep==2.0".to_string(),
            "python -m pip install new==0.1".to_string(),
        ]
    );
}

#[test]
fn steps_skip_uninstall_when_nothing_is_removed() {
    let plan = diff(&set_of(&[]), &set_of(&[("a", "1")]));
    assert_eq!(
        plan.steps(),
        vec![PlanStep::InstallPinned {
            name: "a".to_string(),
            version: "1".to_string(),
        }]
    );
}

#[test]
fn uninstall_step_args_list_every_name() {
    let step = PlanStep::UninstallAll {
        names: vec!["a".to_string(), "b".to_string()],
    };
    assert_eq!(step.pip_args(), vec!["uninstall", "-y", "a", "b"]);
}

#[test]
fn error_messages_carry_context() {
    let err = Error::not_found("snapshot", "env_20240101_000000");
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "snapshot not found: env_20240101_000000");

    let err = Error::storage(
        "/tmp/snapshots/x.json",
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    );
    assert!(err.to_string().contains("/tmp/snapshots/x.json"));
}

struct FixedCapture(&'static str);

impl EnvironmentCapture for FixedCapture {
    fn freeze(&self) -> Result<String> {
        Ok(self.0.to_string())
    }
}

#[test]
fn capture_parses_freeze_text() {
    let set = FixedCapture("a==1\n-e ./local\n")
        .capture()
        .expect("capture must succeed");
    assert_eq!(set.len(), 1);
    assert_eq!(set.other_lines().len(), 1);
}

fn pins_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-dA-D][a-d0-9_-]{0,3}", "[0-3](\\.[0-3]){0,2}", 0..12)
}

proptest! {
    #[test]
    fn diff_partitions_union_of_keys(s in pins_strategy(), t in pins_strategy()) {
        let source = set_from_map(&s);
        let target = set_from_map(&t);
        let plan = diff(&source, &target);

        let installs = install_keys(&plan);
        let uninstalls = uninstall_keys(&plan);
        let unchanged = unchanged_keys(&plan);

        prop_assert!(installs.is_disjoint(&uninstalls));
        prop_assert!(installs.is_disjoint(&unchanged));
        prop_assert!(uninstalls.is_disjoint(&unchanged));
        prop_assert_eq!(
            installs.len() + uninstalls.len() + unchanged.len(),
            plan.installs.len() + plan.uninstalls.len() + plan.unchanged.len()
        );

        let all = source
            .keys()
            .chain(target.keys())
            .map(str::to_string)
            .collect::<BTreeSet<_>>();
        let covered = installs
            .union(&uninstalls)
            .cloned()
            .collect::<BTreeSet<_>>()
            .union(&unchanged)
            .cloned()
            .collect::<BTreeSet<_>>();
        prop_assert_eq!(all, covered);
    }

    #[test]
    fn diff_against_itself_is_all_unchanged(s in pins_strategy()) {
        let set = set_from_map(&s);
        let plan = diff(&set, &set);
        prop_assert!(plan.installs.is_empty());
        prop_assert!(plan.uninstalls.is_empty());
        prop_assert_eq!(
            unchanged_keys(&plan),
            set.keys().map(str::to_string).collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn swapping_sides_swaps_added_and_removed(s in pins_strategy(), t in pins_strategy()) {
        let source = set_from_map(&s);
        let target = set_from_map(&t);
        let forward = diff(&source, &target);
        let backward = diff(&target, &source);

        let added_backward = backward
            .installs
            .iter()
            .filter(|i| i.from.is_none())
            .map(|i| normalize_name(&i.name))
            .collect::<BTreeSet<_>>();
        prop_assert_eq!(uninstall_keys(&forward), added_backward);

        let added_forward = forward
            .installs
            .iter()
            .filter(|i| i.from.is_none())
            .map(|i| normalize_name(&i.name))
            .collect::<BTreeSet<_>>();
        prop_assert_eq!(uninstall_keys(&backward), added_forward);
    }

    #[test]
    fn pin_text_round_trips(s in pins_strategy()) {
        let text = s
            .iter()
            .map(|(name, version)| format!("{name}=={version}"))
            .collect::<Vec<_>>()
            .join("\n");
        let set = PackageSet::parse(&text);
        let reparsed = PackageSet::parse(&set.render_pins());
        prop_assert_eq!(&set, &reparsed);

        let expected = set_from_map(&s);
        prop_assert_eq!(set.render_pins(), expected.render_pins());
    }
}
