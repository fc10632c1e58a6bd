/// Builds annotation keys under the `krtest.dev` prefix at compile time. `krtest!()` is the prefix
/// itself and `krtest!("x")` is `krtest.dev/x`.
macro_rules! krtest {
    () => {
        "krtest.dev"
    };
    ($s:literal) => {
        concat!(krtest!(), "/", $s)
    };
}

// System identifiers
pub const KRTEST: &str = krtest!();
pub const FIELD_MANAGER: &str = "krtest";

// Annotation keys read from example manifests
pub const ANNOTATION_DEPENDS_ON: &str = krtest!("depends-on");
pub const ANNOTATION_CONDITIONS: &str = krtest!("conditions");
pub const ANNOTATION_TIMEOUT: &str = krtest!("timeout");
pub const ANNOTATION_DELETION_TIMEOUT: &str = krtest!("deletion-timeout");
pub const ANNOTATION_SKIP_DELETE: &str = krtest!("skip-delete");
pub const ANNOTATION_ASSERT: &str = krtest!("assert");
pub const ANNOTATION_UPDATE_PATCH: &str = krtest!("update-patch");
pub const ANNOTATION_UPDATE_ASSERT: &str = krtest!("update-assert");

// Injection placeholder prefixes, e.g. `${datasource.db.password}`
pub const DATA_SOURCE_PREFIX: &str = "datasource";
pub const RESOURCE_PREFIX: &str = "resource";

// Condition types
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_SYNCED: &str = "Synced";
pub const CONDITION_STALLED: &str = "Stalled";

// Defaults
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 1200;
pub const DEFAULT_DELETION_TIMEOUT_SECONDS: u64 = 600;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_PARALLELISM: usize = 1;
pub const DEFAULT_TEST_DIRECTORY: &str = "/tmp/krtest-e2e";

#[test]
fn krtest_constants_macro_test() {
    assert_eq!("krtest.dev", krtest!());
    assert_eq!("krtest.dev/depends-on", ANNOTATION_DEPENDS_ON);
    assert_eq!("krtest.dev/foo", krtest!("foo"));
}
