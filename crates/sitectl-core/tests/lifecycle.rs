use sitectl_core::{
    AgentPlugin, Controller, CoreError, HostServices, RegistryLock, SitePlugin, StopOutcome,
};
use sitectl_host::{
    FileRights, HostError, HostingBackend, MockAccessControl, MockCommand, MockFirewall, MockHost,
    MockOp, PoolIdentity,
};
use sitectl_schema::{
    ApplicationDescriptor, ApplicationVariable, ControllerConfig, ObjectState, RuntimeVariant,
    Timeouts, LOG_FILE_KEY,
};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

const WEB_CONFIG: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<configuration>
  <system.web />
</configuration>
"#;

struct Harness {
    dir: tempfile::TempDir,
    host: Arc<MockHost>,
    acl: Arc<MockAccessControl>,
    firewall: Arc<MockFirewall>,
    lock: Arc<RegistryLock>,
}

impl Harness {
    fn new(latency: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(RegistryLock::new(dir.path().join("registry.lock")));
        Self {
            host: Arc::new(MockHost::new().with_latency(latency)),
            acl: Arc::new(MockAccessControl::new()),
            firewall: Arc::new(MockFirewall::new()),
            lock,
            dir,
        }
    }

    fn services(&self) -> HostServices {
        HostServices {
            backend: self.host.clone(),
            acl: self.acl.clone(),
            firewall: self.firewall.clone(),
            processes: self.host.clone(),
        }
    }

    fn config(&self) -> ControllerConfig {
        ControllerConfig {
            lock_path: self.lock.path().to_path_buf(),
            timeouts: Timeouts::fast(),
            ..ControllerConfig::default()
        }
    }

    fn controller(&self) -> Controller {
        Controller::new(self.services(), Arc::clone(&self.lock), &self.config()).with_cancel(|| false)
    }

    fn app_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("apps").join(name);
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn log_file(&self) -> PathBuf {
        self.dir.path().join("logs").join("app.log")
    }

    fn error_log_file(&self) -> PathBuf {
        self.dir.path().join("logs").join("error.log")
    }

    fn configured(&self, name: &str, port: u16) -> Controller {
        let mut controller = self.controller();
        let descriptor =
            ApplicationDescriptor::new(name, port, self.app_dir(name), "svcuser", "pw").unwrap();
        controller
            .configure(descriptor, &[], &[], &self.log_file(), &self.error_log_file())
            .unwrap();
        controller
    }
}

fn unit_state(host: &MockHost, name: &str) -> Option<ObjectState> {
    host.peek_unit_state(name)
}

#[test]
fn app1_on_8080_full_lifecycle() {
    let h = Harness::new(3);
    let app = h.app_dir("App1");
    fs::write(app.join("web.config"), WEB_CONFIG).unwrap();

    let mut controller = h.controller();
    let descriptor = ApplicationDescriptor::new("App1", 8080, &app, "app1user", "secret").unwrap();
    let variables = [ApplicationVariable::new("Mode", "prod")];
    let report = controller
        .configure(descriptor, &variables, &[], &h.log_file(), &h.error_log_file())
        .unwrap()
        .expect("web.config present");
    let text = fs::read_to_string(&report.config_path).unwrap();
    assert!(text.contains(r#"<add key="Mode" value="prod" />"#));
    assert!(text.contains(LOG_FILE_KEY));

    controller.provision(RuntimeVariant::V4).unwrap();
    assert_eq!(h.host.unit_names(), ["App18080"]);
    assert_eq!(h.host.pool_names(), ["App18080"]);
    {
        let session = h.host.open_session().unwrap();
        let unit = session.unit("App18080").unwrap().unwrap();
        assert_eq!(unit.port, 8080);
        assert_eq!(unit.physical_path, app);
        assert_eq!(unit.pool_name.as_deref(), Some("App18080"));
        assert!(!unit.autostart);
        let pool = session.pool("App18080").unwrap().unwrap();
        assert_eq!(pool.settings.runtime_version.as_deref(), Some("v4.0"));
        assert!(pool.settings.enable_32bit);
        assert!(matches!(
            &pool.settings.identity,
            PoolIdentity::SpecificUser { user, .. } if user == "app1user"
        ));
    }
    assert_eq!(h.firewall.label(8080).as_deref(), Some("App1"));
    let rules = h.acl.rules_for(&app);
    assert_eq!(rules.len(), 1);
    assert!(rules[0]
        .rights
        .contains(FileRights::READ | FileRights::WRITE | FileRights::MODIFY | FileRights::DELETE));

    controller.start().unwrap();
    assert_eq!(unit_state(&h.host, "App18080"), Some(ObjectState::Started));
    let pid = controller.query_process_id().unwrap();
    assert!(pid.is_some());

    assert_eq!(controller.stop().unwrap(), StopOutcome::Stopped);
    assert_eq!(unit_state(&h.host, "App18080"), Some(ObjectState::Stopped));

    controller.delete(8080).unwrap();
    assert!(h.host.unit_names().is_empty());
    assert!(h.host.pool_names().is_empty());
    assert!(!h.firewall.is_open(8080));
    assert!(h.acl.rules_for(&app).is_empty());
    assert_eq!(controller.query_process_id().unwrap(), None);
}

#[test]
fn start_and_stop_are_idempotent() {
    let h = Harness::new(1);
    let controller = h.configured("Idem", 8081);
    controller.provision(RuntimeVariant::V4).unwrap();
    controller.start().unwrap();

    h.host.clear_commands();
    controller.start().unwrap();
    assert!(h.host.commands().is_empty());

    assert_eq!(controller.stop().unwrap(), StopOutcome::Stopped);
    h.host.clear_commands();
    assert_eq!(controller.stop().unwrap(), StopOutcome::AlreadyStopped);
    assert!(h.host.commands().is_empty());
}

#[test]
fn start_waits_out_a_stuck_stop_then_starts() {
    let h = Harness::new(0);
    let controller = h.configured("Busy", 8082);
    controller.provision(RuntimeVariant::V4).unwrap();
    h.host.set_unit_state("Busy8082", ObjectState::Stopping);

    controller.start().unwrap();
    assert_eq!(
        h.host.commands(),
        [MockCommand::StartUnit("Busy8082".to_owned())]
    );
    assert_eq!(unit_state(&h.host, "Busy8082"), Some(ObjectState::Started));
}

#[test]
fn start_timeout_is_fatal() {
    let h = Harness::new(0);
    let controller = h.configured("Slow", 8083);
    controller.provision(RuntimeVariant::V4).unwrap();
    h.host.set_unit_state("Slow8083", ObjectState::Starting);

    let err = controller.start().unwrap_err();
    match err {
        CoreError::Timeout {
            unit,
            state,
            waited_ms,
        } => {
            assert_eq!(unit, "Slow8083");
            assert_eq!(state, ObjectState::Started);
            assert_eq!(waited_ms, Timeouts::fast().start_ms);
        }
        other => panic!("expected timeout, got {other}"),
    }
    // A unit already starting is not started again.
    assert!(h.host.commands().is_empty());
}

#[test]
fn stop_timeout_is_tolerated() {
    let h = Harness::new(0);
    let controller = h.configured("Stuck", 8084);
    controller.provision(RuntimeVariant::V4).unwrap();
    controller.start().unwrap();
    h.host.stick_unit_stopping("Stuck8084");

    let outcome = controller.stop().unwrap();
    assert_eq!(outcome, StopOutcome::TimedOut);
    assert!(!outcome.is_stopped());
}

#[test]
fn delete_force_kills_workers_of_stuck_unit() {
    let h = Harness::new(0);
    let controller = h.configured("Hung", 8085);
    controller.provision(RuntimeVariant::V4).unwrap();
    controller.start().unwrap();
    let pid = controller.query_process_id().unwrap().unwrap();
    h.host.stick_unit_stopping("Hung8085");

    controller.delete(8085).unwrap();
    assert_eq!(h.host.killed_pids(), [pid]);
    assert!(h.host.unit_names().is_empty());
    assert!(h.host.pool_names().is_empty());
}

#[test]
fn delete_kills_workers_of_stuck_pool() {
    let h = Harness::new(0);
    let controller = h.configured("Pool", 8086);
    controller.provision(RuntimeVariant::V4).unwrap();
    controller.start().unwrap();
    let pid = controller.query_process_id().unwrap().unwrap();
    h.host.stick_pool_stopping("Pool8086");

    controller.delete(8086).unwrap();
    assert_eq!(h.host.killed_pids(), [pid]);
    assert!(h.host.pool_names().is_empty());
}

#[test]
fn delete_retries_transient_stop_failures() {
    let h = Harness::new(0);
    let controller = h.configured("Flaky", 8087);
    controller.provision(RuntimeVariant::V4).unwrap();
    controller.start().unwrap();
    h.host.clear_commands();
    h.host.fail_transiently(MockOp::StopUnit, 3);

    controller.delete(8087).unwrap();
    assert_eq!(
        h.host.commands()[0],
        MockCommand::StopUnit("Flaky8087".to_owned())
    );
    assert!(h.host.unit_names().is_empty());
}

#[test]
fn delete_unknown_port_fails() {
    let h = Harness::new(0);
    let controller = h.controller();
    assert!(matches!(
        controller.delete(9999),
        Err(CoreError::NoUnitOnPort(9999))
    ));
}

#[test]
fn failed_provision_is_not_rolled_back() {
    let h = Harness::new(0);
    let controller = h.configured("Half", 8088);
    h.host.fail_transiently(MockOp::Commit, 1);

    let err = controller.provision(RuntimeVariant::V2).unwrap_err();
    assert!(matches!(err, CoreError::Host(HostError::Transient(_))));
    assert!(h.host.unit_names().is_empty());
    assert!(h.firewall.is_open(8088));
    assert_eq!(h.acl.rules_for(&h.app_dir("Half")).len(), 1);
}

#[test]
fn failed_grant_stops_provisioning() {
    let h = Harness::new(0);
    let controller = h.configured("Denied", 8089);
    h.acl.fail_grants(true);

    let err = controller.provision(RuntimeVariant::V4).unwrap_err();
    assert!(matches!(err, CoreError::Host(HostError::Access { .. })));
    assert!(h.host.unit_names().is_empty());
    assert!(!h.firewall.is_open(8089));
}

#[test]
fn operations_require_configuration() {
    let h = Harness::new(0);
    let controller = h.controller();
    assert!(matches!(controller.start(), Err(CoreError::NotConfigured)));
    assert!(matches!(controller.stop(), Err(CoreError::NotConfigured)));
    assert!(matches!(controller.kill(), Err(CoreError::NotConfigured)));
    assert!(matches!(
        controller.query_process_id(),
        Err(CoreError::NotConfigured)
    ));
}

#[test]
fn kill_terminates_without_stopping() {
    let h = Harness::new(0);
    let controller = h.configured("Kill", 8090);
    controller.provision(RuntimeVariant::V4).unwrap();
    controller.start().unwrap();
    let pid = controller.query_process_id().unwrap().unwrap();
    h.host.clear_commands();

    assert_eq!(controller.kill().unwrap(), [pid]);
    assert!(h.host.commands().is_empty());
    assert_eq!(controller.query_process_id().unwrap(), None);
}

#[test]
fn cancellation_aborts_waits() {
    let h = Harness::new(0);
    let mut controller = Controller::new(h.services(), Arc::clone(&h.lock), &h.config())
        .with_cancel(|| true);
    let descriptor =
        ApplicationDescriptor::new("Cancel", 8091, h.app_dir("Cancel"), "svcuser", "pw").unwrap();
    controller
        .configure(descriptor, &[], &[], &h.log_file(), &h.error_log_file())
        .unwrap();
    controller.provision(RuntimeVariant::V4).unwrap();
    assert!(matches!(controller.start(), Err(CoreError::Cancelled)));
}

#[test]
fn plugin_start_stop_cycle() {
    let h = Harness::new(2);
    let app = h.app_dir("Plugin");
    let mut plugin = SitePlugin::new(h.controller());
    let descriptor = ApplicationDescriptor::new("Plugin", 8092, &app, "svcuser", "pw").unwrap();
    plugin
        .configure_application(descriptor, &[], &[], &h.log_file(), &h.error_log_file())
        .unwrap();

    plugin.start_application().unwrap();
    assert_eq!(unit_state(&h.host, "Plugin8092"), Some(ObjectState::Started));
    assert!(plugin.application_process_id().unwrap().is_some());

    plugin.stop_application().unwrap();
    assert!(h.host.unit_names().is_empty());
    assert_eq!(plugin.application_process_id().unwrap(), None);

    assert!(matches!(
        plugin.recover_application(&app, 4000),
        Err(CoreError::Unsupported(_))
    ));
    assert!(matches!(
        plugin.configure_debug(
            5000,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            &[ApplicationVariable::new("DEBUG", "1")]
        ),
        Err(CoreError::Unsupported(_))
    ));
}

#[test]
fn plugin_configures_runtime_pin() {
    let h = Harness::new(0);
    let config = ControllerConfig {
        runtime_variant: Some(RuntimeVariant::V2),
        ..h.config()
    };
    let controller =
        Controller::new(h.services(), Arc::clone(&h.lock), &config).with_cancel(|| false);
    let mut plugin = SitePlugin::new(controller);
    let descriptor =
        ApplicationDescriptor::new("Legacy", 8093, h.app_dir("Legacy"), "svcuser", "pw").unwrap();
    plugin
        .configure_application(descriptor, &[], &[], &h.log_file(), &h.error_log_file())
        .unwrap();
    plugin.start_application().unwrap();

    let session = h.host.open_session().unwrap();
    let pool = session.pool("Legacy8093").unwrap().unwrap();
    assert_eq!(pool.settings.runtime_version.as_deref(), Some("v2.0"));
}

#[test]
fn concurrent_controllers_share_the_registry_lock() {
    let h = Arc::new(Harness::new(2));
    let barrier = Arc::new(Barrier::new(4));
    let mut handles = Vec::new();

    for i in 0..4u16 {
        let h = Arc::clone(&h);
        let b = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let name = format!("Par{i}");
            let controller = h.configured(&name, 9100 + i);
            b.wait();
            controller.provision(RuntimeVariant::V4).unwrap();
            controller.start().unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(h.host.unit_names().len(), 4);
    for i in 0..4u16 {
        let unit = format!("Par{i}{}", 9100 + i);
        assert_eq!(unit_state(&h.host, &unit), Some(ObjectState::Started));
    }
}

#[test]
fn missing_config_document_is_skipped() {
    let h = Harness::new(0);
    let mut controller = h.controller();
    let app = h.app_dir("Bare");
    let descriptor = ApplicationDescriptor::new("Bare", 8094, &app, "svcuser", "pw").unwrap();
    let report = controller
        .configure(descriptor, &[], &[], &h.log_file(), &h.error_log_file())
        .unwrap();
    assert!(report.is_none());
    assert!(!Path::new(&app).join("healthMonitoring.config").exists());
    assert_eq!(controller.descriptor().unwrap().unit_name(), "Bare8094");
}

#[test]
fn startup_log_records_successful_start() {
    let h = Harness::new(1);
    let app = h.app_dir("Logged");
    fs::write(app.join("web.config"), WEB_CONFIG).unwrap();
    let startup_log = h.dir.path().join("startup").join("logged.log");

    let mut controller = h.controller();
    let descriptor = ApplicationDescriptor::new("Logged", 8093, &app, "svcuser", "pw")
        .unwrap()
        .with_startup_log(&startup_log);
    controller
        .configure(descriptor, &[], &[], &h.log_file(), &h.error_log_file())
        .unwrap();
    controller.provision(RuntimeVariant::V4).unwrap();
    controller.start().unwrap();

    let text = fs::read_to_string(&startup_log).unwrap();
    assert!(text.contains("configuring 'Logged' as unit Logged8093"), "{text}");
    assert!(text.contains("autowired"), "{text}");
    assert!(text.contains("provisioning unit Logged8093 on port 8093"), "{text}");
    assert!(text.contains("starting unit Logged8093"), "{text}");
    assert!(text.contains("unit Logged8093 started"), "{text}");
    assert!(!text.contains("ERROR"), "{text}");
}

#[test]
fn startup_log_records_start_failure() {
    let h = Harness::new(0);
    let app = h.app_dir("Stuck");
    let startup_log = h.dir.path().join("stuck-startup.log");

    let mut controller = h.controller();
    let descriptor = ApplicationDescriptor::new("Stuck", 8094, &app, "svcuser", "pw")
        .unwrap()
        .with_startup_log(&startup_log);
    controller
        .configure(descriptor, &[], &[], &h.log_file(), &h.error_log_file())
        .unwrap();
    controller.provision(RuntimeVariant::V4).unwrap();
    h.host.set_unit_state("Stuck8094", ObjectState::Starting);

    assert!(matches!(controller.start(), Err(CoreError::Timeout { .. })));

    let text = fs::read_to_string(&startup_log).unwrap();
    assert!(text.contains("ERROR"), "{text}");
    assert!(
        text.contains("start failed: unit Stuck8094 did not reach started"),
        "{text}"
    );
}

#[test]
fn no_startup_log_without_a_path() {
    let h = Harness::new(0);
    let controller = h.configured("Quiet", 8095);
    controller.provision(RuntimeVariant::V4).unwrap();
    controller.start().unwrap();
    assert!(controller.descriptor().unwrap().startup_log().is_none());
}
