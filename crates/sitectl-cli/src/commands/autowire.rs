use super::{json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use serde::Serialize;
use sitectl_autowire::{AutowireRequest, Autowirer};
use sitectl_host::MockAccessControl;
use sitectl_schema::{AccountName, ApplicationVariable, ControllerConfig, ServiceBinding};
use std::path::{Path, PathBuf};

pub struct AutowireArgs<'a> {
    pub app_dir: &'a Path,
    pub user: &'a str,
    pub vars: &'a [String],
    pub services: Option<&'a Path>,
    pub log_file: Option<&'a Path>,
    pub error_log_file: Option<&'a Path>,
}

#[derive(Serialize)]
struct ReportView {
    autowired: bool,
    config_path: PathBuf,
    markers: Vec<String>,
    logging_support: Option<PathBuf>,
    health_monitoring: PathBuf,
    granted_dirs: Vec<PathBuf>,
}

fn load_services(path: Option<&Path>) -> Result<Vec<ServiceBinding>, String> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&content).map_err(|e| format!("invalid service bindings: {e}"))
}

pub fn run(config: &ControllerConfig, args: &AutowireArgs<'_>, json: bool) -> Result<u8, String> {
    let variables = args
        .vars
        .iter()
        .map(|pair| ApplicationVariable::parse_pair(pair))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    let services = load_services(args.services)?;

    let log_file = args
        .log_file
        .map_or_else(|| args.app_dir.join("logs").join("app.log"), Path::to_path_buf);
    let error_log_file = args
        .error_log_file
        .map_or_else(|| args.app_dir.join("logs").join("error.log"), Path::to_path_buf);

    let user = AccountName::new(args.user);
    let request = AutowireRequest {
        app_dir: args.app_dir,
        user: &user,
        variables: &variables,
        services: &services,
        log_file: &log_file,
        error_log_file: &error_log_file,
    };

    // Grants are recorded, not applied to the host.
    let acl = MockAccessControl::new();
    let autowirer = Autowirer::from_config(config);

    let pb = (!json).then(|| spinner(&format!("autowiring {}", args.app_dir.display())));
    let report = match autowirer.autowire(&request, &acl) {
        Ok(report) => report,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "autowire failed");
            }
            return Err(e.to_string());
        }
    };

    let Some(report) = report else {
        if let Some(pb) = &pb {
            spin_ok(pb, "no configuration document, nothing to autowire");
        }
        if json {
            println!("{}", json_pretty(&serde_json::json!({ "autowired": false }))?);
        }
        return Ok(EXIT_SUCCESS);
    };

    if let Some(pb) = &pb {
        spin_ok(pb, &format!("rewrote {}", report.config_path.display()));
    }

    if json {
        let view = ReportView {
            autowired: true,
            config_path: report.config_path,
            markers: report.markers,
            logging_support: report.logging_support,
            health_monitoring: report.health_monitoring,
            granted_dirs: report.granted_dirs,
        };
        println!("{}", json_pretty(&view)?);
    } else {
        for marker in &report.markers {
            println!("  marker   {marker}");
        }
        match &report.logging_support {
            Some(path) => println!("  logging  {}", path.display()),
            None => println!("  logging  (not configured)"),
        }
        println!("  health   {}", report.health_monitoring.display());
        for dir in &report.granted_dirs {
            println!("  grant    {} -> {user}", dir.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
