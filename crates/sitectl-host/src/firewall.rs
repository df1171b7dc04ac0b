use crate::HostError;

/// Host firewall port control.
pub trait Firewall: Send + Sync {
    /// Allow inbound traffic on `port`; `label` names the rule.
    fn open_port(&self, port: u16, label: &str) -> Result<(), HostError>;

    fn close_port(&self, port: u16) -> Result<(), HostError>;
}
