use super::{colorize_state, json_pretty, spin_fail, spin_ok, spinner, EXIT_FAILURE, EXIT_SUCCESS};
use serde::Serialize;
use sitectl_core::{Controller, CoreError, HostServices, RegistryLock};
use sitectl_host::{MockAccessControl, MockFirewall, MockHost};
use sitectl_schema::{ApplicationDescriptor, ControllerConfig, ObjectState, Timeouts};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SAMPLE_CONFIG: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<configuration>
  <appSettings>
    <add key="greeting" value="hello" />
  </appSettings>
</configuration>
"#;

pub struct SimulateArgs<'a> {
    pub name: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub latency: u32,
    pub fast: bool,
    pub app_dir: Option<&'a Path>,
}

#[derive(Serialize)]
struct Step {
    step: &'static str,
    ok: bool,
    detail: String,
}

#[derive(Serialize)]
struct SimulationReport {
    unit: String,
    app_dir: PathBuf,
    steps: Vec<Step>,
    remaining_units: Vec<String>,
}

struct Runner<'a> {
    host: &'a MockHost,
    unit: String,
    json: bool,
    steps: Vec<Step>,
}

impl Runner<'_> {
    fn state(&self) -> String {
        self.host
            .peek_unit_state(&self.unit)
            .map_or_else(|| "absent".to_owned(), |s| s.to_string())
    }

    fn step<T>(
        &mut self,
        step: &'static str,
        op: impl FnOnce() -> Result<T, CoreError>,
        describe: impl FnOnce(&T) -> String,
    ) -> bool {
        let pb = (!self.json).then(|| spinner(step));
        let (ok, detail) = match op() {
            Ok(value) => (true, describe(&value)),
            Err(e) => (false, e.to_string()),
        };
        if let Some(pb) = &pb {
            let line = format!("{step}: {detail} [{}]", colorize_state(&self.state()));
            if ok {
                spin_ok(pb, &line);
            } else {
                spin_fail(pb, &line);
            }
        }
        self.steps.push(Step { step, ok, detail });
        ok
    }
}

pub fn run(config: &ControllerConfig, args: &SimulateArgs<'_>, json: bool) -> Result<u8, String> {
    let scratch = tempfile::tempdir().map_err(|e| format!("failed to create scratch dir: {e}"))?;
    let app_dir = match args.app_dir {
        Some(dir) => dir.to_path_buf(),
        None => {
            let dir = scratch.path().join("app");
            std::fs::create_dir_all(&dir).map_err(|e| format!("{}: {e}", dir.display()))?;
            std::fs::write(dir.join("web.config"), SAMPLE_CONFIG)
                .map_err(|e| format!("failed to write sample config: {e}"))?;
            dir
        }
    };
    let logs = scratch.path().join("logs");

    let mut config = config.clone();
    if args.fast {
        config.timeouts = Timeouts::fast();
    }

    let host = Arc::new(MockHost::new().with_latency(args.latency));
    let services = HostServices {
        backend: host.clone(),
        acl: Arc::new(MockAccessControl::new()),
        firewall: Arc::new(MockFirewall::new()),
        processes: host.clone(),
    };
    let lock = Arc::new(RegistryLock::new(config.lock_path.clone()));
    let mut controller = Controller::new(services, lock, &config);

    let descriptor = ApplicationDescriptor::new(args.name, args.port, &app_dir, args.user, "")
        .map_err(|e| e.to_string())?;
    let mut runner = Runner {
        host: &host,
        unit: descriptor.unit_name().to_string(),
        json,
        steps: Vec::new(),
    };

    let log_file = logs.join("app.log");
    let error_log_file = logs.join("error.log");
    let ok = runner.step(
        "configure",
        || controller.configure(descriptor, &[], &[], &log_file, &error_log_file),
        |report| match report {
            Some(r) => format!("autowired {}", r.config_path.display()),
            None => "no configuration document".to_owned(),
        },
    ) && runner.step(
        "provision",
        || {
            let variant = controller.detect_runtime_variant();
            controller.provision(variant).map(|()| variant)
        },
        |variant| format!("runtime {}", variant.runtime_version()),
    ) && runner.step("start", || controller.start(), |()| ObjectState::Started.to_string())
        && runner.step(
            "process-id",
            || controller.query_process_id(),
            |pid| pid.map_or_else(|| "no worker".to_owned(), |p| format!("pid {p}")),
        )
        && runner.step("stop", || controller.stop(), |outcome| format!("{outcome:?}"))
        && runner.step(
            "cleanup",
            || controller.cleanup(&app_dir),
            |deleted| format!("removed {}", deleted.join(", ")),
        );

    let report = SimulationReport {
        unit: runner.unit,
        app_dir,
        steps: runner.steps,
        remaining_units: host.unit_names(),
    };
    if json {
        println!("{}", json_pretty(&report)?);
    } else if !report.remaining_units.is_empty() {
        println!("remaining units: {}", report.remaining_units.join(", "));
    }

    Ok(if ok { EXIT_SUCCESS } else { EXIT_FAILURE })
}
