//! Property 7 (spec.md §8): writing a known set of deps as text and
//! reading it back must reproduce the same host/target/sub lists,
//! preserving declaration order.

use bulk::depcache::{parse_deps, render_deps, DepRecord};
use camino::Utf8PathBuf;
use proptest::prelude::*;

/// Package-name-shaped strings: no whitespace, no colons, so they can
/// never be mistaken for a new key line or a continuation marker.
fn pkgname_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_-]{0,15}"
}

fn dep_record_strategy() -> impl Strategy<Value = DepRecord> {
    (
        proptest::option::of(pkgname_strategy()),
        proptest::option::of("[0-9]+\\.[0-9]+(\\.[0-9]+)?"),
        proptest::option::of("[0-9]{1,3}"),
        proptest::collection::vec(pkgname_strategy(), 0..6),
        proptest::collection::vec(pkgname_strategy(), 0..6),
        proptest::collection::vec(pkgname_strategy(), 0..6),
    )
        .prop_map(
            |(pkgname, version, revision, hostmakedepends, targetdeps, subpackages)| DepRecord {
                pkgname,
                version,
                revision,
                hostmakedepends,
                targetdeps,
                subpackages,
            },
        )
}

proptest! {
    #[test]
    fn round_trips_any_generated_record(record in dep_record_strategy()) {
        let text = render_deps(&record);
        let parsed = parse_deps(&Utf8PathBuf::from("fuzz.dep"), &text).unwrap();
        prop_assert_eq!(parsed, record);
    }
}
