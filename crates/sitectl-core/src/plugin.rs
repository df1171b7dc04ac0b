use crate::controller::Controller;
use crate::CoreError;
use sitectl_schema::{ApplicationDescriptor, ApplicationVariable, ServiceBinding};
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

/// Operations a node agent invokes on a hosting plugin.
pub trait AgentPlugin {
    fn configure_application(
        &mut self,
        descriptor: ApplicationDescriptor,
        variables: &[ApplicationVariable],
        services: &[ServiceBinding],
        log_file: &Path,
        error_log_file: &Path,
    ) -> Result<(), CoreError>;

    fn start_application(&mut self) -> Result<(), CoreError>;

    /// `None` when no worker is running.
    fn application_process_id(&self) -> Result<Option<u32>, CoreError>;

    fn stop_application(&mut self) -> Result<(), CoreError>;

    fn cleanup_application(&mut self, path: &Path) -> Result<(), CoreError>;

    fn kill_application(&mut self) -> Result<(), CoreError>;

    /// Re-attach to an application already running as `process_id`.
    fn recover_application(&mut self, path: &Path, process_id: u32) -> Result<(), CoreError>;

    fn configure_debug(
        &mut self,
        debug_port: u16,
        debug_ip: IpAddr,
        debug_variables: &[ApplicationVariable],
    ) -> Result<(), CoreError>;
}

/// `AgentPlugin` for applications hosted as site units.
pub struct SitePlugin {
    controller: Controller,
}

impl SitePlugin {
    pub fn new(controller: Controller) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }
}

impl AgentPlugin for SitePlugin {
    fn configure_application(
        &mut self,
        descriptor: ApplicationDescriptor,
        variables: &[ApplicationVariable],
        services: &[ServiceBinding],
        log_file: &Path,
        error_log_file: &Path,
    ) -> Result<(), CoreError> {
        self.controller
            .configure(descriptor, variables, services, log_file, error_log_file)?;
        Ok(())
    }

    fn start_application(&mut self) -> Result<(), CoreError> {
        let variant = self.controller.detect_runtime_variant();
        self.controller.provision(variant)?;
        self.controller.start()
    }

    fn application_process_id(&self) -> Result<Option<u32>, CoreError> {
        self.controller.query_process_id()
    }

    fn stop_application(&mut self) -> Result<(), CoreError> {
        let root = self
            .controller
            .descriptor()
            .ok_or(CoreError::NotConfigured)?
            .path()
            .to_path_buf();
        let (outcome, deleted) = self.controller.stop_and_cleanup(&root)?;
        info!(
            "application stopped ({outcome:?}), {} unit(s) removed",
            deleted.len()
        );
        Ok(())
    }

    fn cleanup_application(&mut self, path: &Path) -> Result<(), CoreError> {
        self.controller.cleanup(path)?;
        Ok(())
    }

    fn kill_application(&mut self) -> Result<(), CoreError> {
        self.controller.kill()?;
        Ok(())
    }

    fn recover_application(&mut self, _path: &Path, _process_id: u32) -> Result<(), CoreError> {
        Err(CoreError::Unsupported("recover_application"))
    }

    fn configure_debug(
        &mut self,
        _debug_port: u16,
        _debug_ip: IpAddr,
        _debug_variables: &[ApplicationVariable],
    ) -> Result<(), CoreError> {
        Err(CoreError::Unsupported("configure_debug"))
    }
}
