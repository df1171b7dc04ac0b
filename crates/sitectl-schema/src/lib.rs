//! Data model and configuration for the sitectl deployment controller.
//!
//! This crate defines the schema layer: application descriptors and their
//! sanitized hosting identifiers (`UnitName`), application variables and
//! service bindings consumed by autowiring, the shared `ObjectState` machine,
//! runtime variants, and the TOML `ControllerConfig`.

pub mod application;
pub mod config;
pub mod state;
pub mod types;

pub use application::{
    sanitize_account_name, unit_name_for, ApplicationDescriptor, ApplicationVariable,
    ServiceBinding, ERROR_LOG_FILE_KEY, ILLEGAL_ACCOUNT_CHARS, LOG_FILE_KEY,
};
pub use config::{ConfigError, ControllerConfig, Timeouts};
pub use state::{ObjectState, RuntimeVariant};
pub use types::{AccountName, UnitName};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("application name must not be empty")]
    EmptyName,
    #[error("invalid variable '{0}', expected NAME=VALUE")]
    InvalidVariable(String),
}
