use crate::xml::{Document, Element};
use crate::AutowireError;

/// App-local settings file holding the health-monitoring section.
pub const HEALTH_MONITORING_FILE: &str = "healthMonitoring.config";

const ROOT: &str = "healthMonitoring";
const PROVIDER_NAME: &str = "LogFileEventProvider";
const RULE_NAME: &str = "All Events To Log File";

const TEMPLATE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<healthMonitoring enabled="true">
  <providers>
  </providers>
  <rules>
  </rules>
</healthMonitoring>
"#;

/// Route all health events to the log-file provider of type `provider_type`.
///
/// `existing` is the current file content, `None` to start from an empty
/// section.
pub fn rewire_health_monitoring(
    existing: Option<&str>,
    provider_type: &str,
    log_file: &str,
    error_log_file: &str,
) -> Result<String, AutowireError> {
    let mut doc = Document::parse(existing.unwrap_or(TEMPLATE))?;
    if doc.root.name != ROOT {
        return Err(AutowireError::UnexpectedRoot {
            expected: ROOT,
            found: doc.root.name.clone(),
        });
    }
    if doc.root.attr("enabled") != Some("true") {
        doc.root.set_attr("enabled", "true");
    }

    let provider = Element::new("add")
        .with_attr("name", PROVIDER_NAME)
        .with_attr("type", provider_type)
        .with_attr("logFile", log_file)
        .with_attr("errorLogFile", error_log_file);
    doc.root
        .child_or_append("providers")
        .upsert_keyed("add", "name", provider);

    let rule = Element::new("add")
        .with_attr("name", RULE_NAME)
        .with_attr("eventName", "All Events")
        .with_attr("provider", PROVIDER_NAME)
        .with_attr("profile", "Default")
        .with_attr("minInstances", "1")
        .with_attr("maxLimit", "Infinite")
        .with_attr("minInterval", "00:00:00");
    doc.root
        .child_or_append("rules")
        .upsert_keyed("add", "name", rule);

    Ok(doc.to_xml_string())
}
