use sitectl_core::{Controller, HostServices, RegistryLock};
use sitectl_host::{MockAccessControl, MockFirewall, MockHost};
use sitectl_schema::{ControllerConfig, Timeouts};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn setup() -> (tempfile::TempDir, Arc<MockHost>, Controller) {
    let dir = tempfile::tempdir().unwrap();
    let host = Arc::new(MockHost::new().with_latency(1));
    let services = HostServices {
        backend: host.clone(),
        acl: Arc::new(MockAccessControl::new()),
        firewall: Arc::new(MockFirewall::new()),
        processes: host.clone(),
    };
    let lock = Arc::new(RegistryLock::new(dir.path().join("registry.lock")));
    let config = ControllerConfig {
        timeouts: Timeouts::fast(),
        ..ControllerConfig::default()
    };
    let controller = Controller::new(services, lock, &config).with_cancel(|| false);
    (dir, host, controller)
}

fn mkdir(path: &Path) -> PathBuf {
    fs::create_dir_all(path).unwrap();
    path.to_path_buf()
}

#[test]
fn unit_whose_path_was_deleted_out_of_band_is_removed() {
    let (dir, host, controller) = setup();
    let root = mkdir(&dir.path().join("apps"));
    let gone = mkdir(&dir.path().join("gone"));
    let alive = mkdir(&dir.path().join("alive"));
    host.insert_unit("Gone80", &gone, 80);
    host.insert_unit("Alive81", &alive, 81);
    fs::remove_dir_all(&gone).unwrap();

    let deleted = controller.cleanup(&root).unwrap();
    assert_eq!(deleted, ["Gone80"]);
    assert_eq!(host.unit_names(), ["Alive81"]);
    assert_eq!(host.pool_names(), ["Alive81"]);
}

#[test]
fn units_at_or_below_root_are_removed_once() {
    let (dir, host, controller) = setup();
    let root = mkdir(&dir.path().join("apps"));
    let site = mkdir(&root.join("site"));
    let nested = mkdir(&site.join("v2"));
    host.insert_unit("Root80", &root, 80);
    host.insert_unit("Site81", &site, 81);
    host.insert_unit("Nested82", &nested, 82);

    let mut deleted = controller.cleanup(&root).unwrap();
    deleted.sort();
    assert_eq!(deleted, ["Nested82", "Root80", "Site81"]);
    assert!(host.unit_names().is_empty());
}

#[test]
fn matching_ignores_trailing_separator() {
    let (dir, host, controller) = setup();
    let root = mkdir(&dir.path().join("apps"));
    let site = mkdir(&root.join("Site"));
    let with_slash = PathBuf::from(format!("{}/", site.display()));
    host.insert_unit("Slash80", &with_slash, 80);

    assert_eq!(controller.cleanup(&root).unwrap(), ["Slash80"]);
}

#[test]
fn matching_is_case_insensitive() {
    let (dir, host, controller) = setup();
    let root = mkdir(&dir.path().join("apps"));
    let outside = mkdir(&dir.path().join("outside"));
    host.insert_unit("Live80", &root, 80);
    host.insert_unit("Outside81", &outside, 81);
    assert!(root.exists() && outside.exists());

    let upper_root = PathBuf::from(root.to_string_lossy().to_uppercase());
    assert_ne!(upper_root, root);

    assert_eq!(controller.cleanup(&upper_root).unwrap(), ["Live80"]);
    assert_eq!(host.unit_names(), ["Outside81"]);
}

#[test]
fn environment_variables_expanded_in_unit_paths() {
    let (dir, host, controller) = setup();
    let root = mkdir(&dir.path().join("apps"));
    mkdir(&root.join("site"));
    std::env::set_var("SITECTL_CLEANUP_TEST_ROOT", &root);
    host.insert_unit("Pct80", Path::new("%SITECTL_CLEANUP_TEST_ROOT%/site"), 80);
    host.insert_unit("Brace81", Path::new("${SITECTL_CLEANUP_TEST_ROOT}"), 81);

    let mut deleted = controller.cleanup(&root).unwrap();
    deleted.sort();
    assert_eq!(deleted, ["Brace81", "Pct80"]);
}

#[test]
fn missing_root_only_removes_units_without_paths() {
    let (dir, host, controller) = setup();
    let alive = mkdir(&dir.path().join("alive"));
    host.insert_unit("Alive80", &alive, 80);
    host.insert_unit("Ghost81", &dir.path().join("ghost"), 81);

    let deleted = controller.cleanup(&dir.path().join("no-such-root")).unwrap();
    assert_eq!(deleted, ["Ghost81"]);
    assert_eq!(host.unit_names(), ["Alive80"]);
}
