use crate::healthmon::{rewire_health_monitoring, HEALTH_MONITORING_FILE};
use crate::markers::{resolve_connections, substitute_markers};
use crate::settings::apply_app_settings;
use crate::{write_atomic, AutowireError};
use sitectl_host::{AccessControl, AccessRule, FileRights};
use sitectl_schema::{AccountName, ApplicationVariable, ControllerConfig, ServiceBinding};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Application configuration document, relative to the application directory.
pub const CONFIG_FILE: &str = "web.config";
/// Directory receiving the logging-support binary.
pub const LOGGING_SUPPORT_DIR: &str = "bin";

const UTF8_BOM: &str = "\u{feff}";

fn log_dir_rights() -> FileRights {
    FileRights::READ
        | FileRights::WRITE
        | FileRights::DELETE
        | FileRights::MODIFY
        | FileRights::CREATE_FILES
}

fn utf8_path(path: &Path) -> Result<&str, AutowireError> {
    path.to_str()
        .ok_or_else(|| AutowireError::InvalidPath(path.display().to_string()))
}

#[derive(Debug, Clone, Copy)]
pub struct AutowireRequest<'a> {
    pub app_dir: &'a Path,
    pub user: &'a AccountName,
    pub variables: &'a [ApplicationVariable],
    pub services: &'a [ServiceBinding],
    pub log_file: &'a Path,
    pub error_log_file: &'a Path,
}

/// What an autowiring pass touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutowireReport {
    pub config_path: PathBuf,
    pub markers: Vec<String>,
    pub logging_support: Option<PathBuf>,
    pub health_monitoring: PathBuf,
    pub granted_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct Autowirer {
    templates: BTreeMap<String, String>,
    logging_support_binary: Option<PathBuf>,
    event_provider_type: String,
}

impl Autowirer {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            templates: config.autowire_templates.clone(),
            logging_support_binary: config.logging_support_binary.clone(),
            event_provider_type: config.event_provider_type.clone(),
        }
    }

    /// Autowire the application in `request.app_dir`.
    ///
    /// Returns `Ok(None)` without touching anything when the application has
    /// no configuration document.
    pub fn autowire(
        &self,
        request: &AutowireRequest<'_>,
        acl: &dyn AccessControl,
    ) -> Result<Option<AutowireReport>, AutowireError> {
        let config_path = request.app_dir.join(CONFIG_FILE);
        if !config_path.is_file() {
            debug!("no {CONFIG_FILE} in {}, skipping autowire", request.app_dir.display());
            return Ok(None);
        }

        let log_file = utf8_path(request.log_file)?;
        let error_log_file = utf8_path(request.error_log_file)?;

        let markers = self.rewrite_config_file(&config_path, request, log_file, error_log_file)?;
        let logging_support = self.deploy_logging_support(request.app_dir)?;
        let health_monitoring = self.rewire_health_file(request.app_dir, log_file, error_log_file)?;
        let granted_dirs = grant_log_dirs(request, acl)?;

        info!("autowired {}", config_path.display());
        Ok(Some(AutowireReport {
            config_path,
            markers,
            logging_support,
            health_monitoring,
            granted_dirs,
        }))
    }

    /// Substitute markers and upsert settings in `path`, preserving a
    /// leading byte-order mark. Returns the substituted markers.
    pub fn rewrite_config_file(
        &self,
        path: &Path,
        request: &AutowireRequest<'_>,
        log_file: &str,
        error_log_file: &str,
    ) -> Result<Vec<String>, AutowireError> {
        let raw = fs::read_to_string(path)?;
        let (bom, text) = match raw.strip_prefix(UTF8_BOM) {
            Some(rest) => (UTF8_BOM, rest),
            None => ("", raw.as_str()),
        };

        let connections = resolve_connections(request.services, &self.templates);
        let substituted = substitute_markers(text, &connections);
        let updated = apply_app_settings(&substituted, request.variables, log_file, error_log_file)?;

        write_atomic(path, format!("{bom}{updated}").as_bytes())?;
        Ok(connections.into_iter().map(|c| c.marker).collect())
    }

    fn deploy_logging_support(&self, app_dir: &Path) -> Result<Option<PathBuf>, AutowireError> {
        let Some(source) = &self.logging_support_binary else {
            warn!("no logging support binary configured, skipping deployment");
            return Ok(None);
        };
        let file_name = source
            .file_name()
            .ok_or_else(|| AutowireError::InvalidPath(source.display().to_string()))?;
        let bin_dir = app_dir.join(LOGGING_SUPPORT_DIR);
        fs::create_dir_all(&bin_dir)?;
        let dest = bin_dir.join(file_name);
        fs::copy(source, &dest)?;
        debug!("deployed logging support to {}", dest.display());
        Ok(Some(dest))
    }

    fn rewire_health_file(
        &self,
        app_dir: &Path,
        log_file: &str,
        error_log_file: &str,
    ) -> Result<PathBuf, AutowireError> {
        let path = app_dir.join(HEALTH_MONITORING_FILE);
        let existing = if path.is_file() {
            Some(fs::read_to_string(&path)?)
        } else {
            None
        };
        let updated = rewire_health_monitoring(
            existing.as_deref(),
            &self.event_provider_type,
            log_file,
            error_log_file,
        )?;
        write_atomic(&path, updated.as_bytes())?;
        Ok(path)
    }
}

fn grant_log_dirs(
    request: &AutowireRequest<'_>,
    acl: &dyn AccessControl,
) -> Result<Vec<PathBuf>, AutowireError> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for file in [request.log_file, request.error_log_file] {
        let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) else {
            continue;
        };
        if !dirs.iter().any(|d| d == dir) {
            dirs.push(dir.to_path_buf());
        }
    }

    let rule = AccessRule::inherited(request.user.clone(), log_dir_rights());
    for dir in &dirs {
        fs::create_dir_all(dir)?;
        acl.grant(dir, &rule)?;
        debug!("granted {} access to {}", request.user, dir.display());
    }
    Ok(dirs)
}
