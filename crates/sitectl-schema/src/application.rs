use crate::types::{AccountName, UnitName};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// App-settings key carrying the application's event log path.
pub const LOG_FILE_KEY: &str = "UHURU_LOG_FILE";
/// App-settings key carrying the application's error log path.
pub const ERROR_LOG_FILE_KEY: &str = "UHURU_ERROR_LOG_FILE";

/// Characters that are illegal in an OS account name.
pub const ILLEGAL_ACCOUNT_CHARS: &[char] = &[
    '/', '\\', '[', ']', ':', ';', '|', '=', ',', '+', '*', '?', '>', '<', '@',
];

/// Strip every character that cannot appear in an account name.
///
/// All other characters, including whitespace and non-ASCII, pass through
/// untouched.
pub fn sanitize_account_name(input: &str) -> Result<String, SchemaError> {
    if input.is_empty() {
        return Err(SchemaError::EmptyName);
    }
    Ok(input
        .chars()
        .filter(|c| !ILLEGAL_ACCOUNT_CHARS.contains(c))
        .collect())
}

/// Build the hosting-unit identifier for an application: sanitized name
/// followed by the decimal port.
pub fn unit_name_for(name: &str, port: u16) -> Result<UnitName, SchemaError> {
    let sanitized = sanitize_account_name(name)?;
    Ok(UnitName::new(format!("{sanitized}{port}")))
}

/// Identity and execution context of one deployed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDescriptor {
    name: String,
    port: u16,
    path: PathBuf,
    user: AccountName,
    password: String,
    unit_name: UnitName,
    startup_log: Option<PathBuf>,
}

impl ApplicationDescriptor {
    pub fn new(
        name: impl Into<String>,
        port: u16,
        path: impl Into<PathBuf>,
        user: impl Into<AccountName>,
        password: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        let unit_name = unit_name_for(&name, port)?;
        Ok(Self {
            name,
            port,
            path: path.into(),
            user: user.into(),
            password: password.into(),
            unit_name,
            startup_log: None,
        })
    }

    /// Record configure and start progress for this application in `path`.
    #[must_use]
    pub fn with_startup_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.startup_log = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn user(&self) -> &AccountName {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Identifier shared by the hosting unit and its process pool.
    pub fn unit_name(&self) -> &UnitName {
        &self.unit_name
    }

    pub fn startup_log(&self) -> Option<&Path> {
        self.startup_log.as_deref()
    }
}

/// A name/value pair injected into the application's settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationVariable {
    pub name: String,
    pub value: String,
}

impl ApplicationVariable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse a `NAME=VALUE` pair. The value may itself contain `=`.
    pub fn parse_pair(pair: &str) -> Result<Self, SchemaError> {
        match pair.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok(Self::new(name, value)),
            _ => Err(SchemaError::InvalidVariable(pair.to_owned())),
        }
    }
}

/// An external service bound to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    /// Service type key; selects the connection-string template.
    pub label: String,
    /// Binding name, as it appears in `{label#name}` markers.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Provisioned instance name, substituted for `{name}`.
    pub instance_name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl ServiceBinding {
    /// Literal marker the application places in its configuration document.
    pub fn marker(&self) -> String {
        format!("{{{}#{}}}", self.label, self.name)
    }

    /// Substitute this binding's fields into a connection-string template.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{host}", &self.host)
            .replace("{port}", &self.port.to_string())
            .replace("{name}", &self.instance_name)
            .replace("{user}", &self.user)
            .replace("{password}", &self.password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_every_illegal_character() {
        let input = "a/b\\c[d]e:f;g|h=i,j+k*l?m>n<o@p";
        assert_eq!(sanitize_account_name(input).unwrap(), "abcdefghijklmnop");
    }

    #[test]
    fn sanitize_leaves_other_characters_alone() {
        let input = "My App_1 (ünïcode) #2 .-~!$%^&";
        assert_eq!(sanitize_account_name(input).unwrap(), input);
    }

    #[test]
    fn sanitize_rejects_empty_input() {
        assert!(matches!(
            sanitize_account_name(""),
            Err(SchemaError::EmptyName)
        ));
    }

    #[test]
    fn sanitize_may_return_empty_when_all_illegal() {
        assert_eq!(sanitize_account_name("@@//").unwrap(), "");
    }

    #[test]
    fn unit_name_appends_port() {
        assert_eq!(unit_name_for("App1", 8080).unwrap(), "App18080");
        assert_eq!(unit_name_for("my:app@web", 80).unwrap(), "myappweb80");
    }

    #[test]
    fn descriptor_computes_unit_name_once() {
        let d = ApplicationDescriptor::new("App1", 8080, "/srv/app1", "app1user", "pw").unwrap();
        assert_eq!(d.unit_name(), "App18080");
        assert_eq!(d.user().as_str(), "app1user");
        assert_eq!(d.path(), Path::new("/srv/app1"));
        assert!(d.startup_log().is_none());
        let d = d.with_startup_log("/srv/logs/startup.log");
        assert_eq!(d.startup_log(), Some(Path::new("/srv/logs/startup.log")));
    }

    #[test]
    fn descriptor_rejects_empty_name() {
        assert!(ApplicationDescriptor::new("", 8080, "/srv", "u", "p").is_err());
    }

    #[test]
    fn variable_pair_parsing() {
        let v = ApplicationVariable::parse_pair("CONN=a=b").unwrap();
        assert_eq!(v.name, "CONN");
        assert_eq!(v.value, "a=b");
        assert!(ApplicationVariable::parse_pair("novalue").is_err());
        assert!(ApplicationVariable::parse_pair("=x").is_err());
    }

    #[test]
    fn binding_marker_and_render() {
        let b = ServiceBinding {
            label: "mssql-2008".to_owned(),
            name: "db".to_owned(),
            host: "10.0.0.5".to_owned(),
            port: 1433,
            instance_name: "d1a2".to_owned(),
            user: "u1".to_owned(),
            password: "p1".to_owned(),
        };
        assert_eq!(b.marker(), "{mssql-2008#db}");
        assert_eq!(
            b.render("Data Source={host},{port};Initial Catalog={name};User Id={user};Password={password}"),
            "Data Source=10.0.0.5,1433;Initial Catalog=d1a2;User Id=u1;Password=p1"
        );
    }
}
