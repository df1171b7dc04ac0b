use crate::xml::{Document, Element};
use crate::AutowireError;
use sitectl_schema::{ApplicationVariable, ERROR_LOG_FILE_KEY, LOG_FILE_KEY};
use tracing::debug;

const ROOT: &str = "configuration";
const SECTION: &str = "appSettings";

fn setting(key: &str, value: &str) -> Element {
    Element::new("add")
        .with_attr("key", key)
        .with_attr("value", value)
}

/// Upsert application variables and the reserved log-path keys into the
/// `configuration/appSettings` section of `text`.
///
/// Caller-supplied reserved keys take precedence over `log_file` and
/// `error_log_file`. Applying the same input twice yields the same document.
pub fn apply_app_settings(
    text: &str,
    variables: &[ApplicationVariable],
    log_file: &str,
    error_log_file: &str,
) -> Result<String, AutowireError> {
    let mut doc = Document::parse(text)?;
    if doc.root.name != ROOT {
        return Err(AutowireError::UnexpectedRoot {
            expected: ROOT,
            found: doc.root.name.clone(),
        });
    }

    let section = doc.root.child_or_prepend(SECTION);
    let mut has_log_file = false;
    let mut has_error_log_file = false;

    for variable in variables {
        has_log_file |= variable.name == LOG_FILE_KEY;
        has_error_log_file |= variable.name == ERROR_LOG_FILE_KEY;
        section.upsert_keyed("add", "key", setting(&variable.name, &variable.value));
    }

    if !has_log_file {
        section.upsert_keyed("add", "key", setting(LOG_FILE_KEY, log_file));
    }
    if !has_error_log_file {
        section.upsert_keyed("add", "key", setting(ERROR_LOG_FILE_KEY, error_log_file));
    }

    debug!("applied {} application variables", variables.len());
    Ok(doc.to_xml_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB_CONFIG: &str = r#"<?xml version="1.0"?>
<configuration>
  <appSettings>
    <add key="Greeting" value="hello" />
  </appSettings>
  <system.web />
</configuration>
"#;

    fn entries(text: &str) -> Vec<(String, String)> {
        let doc = Document::parse(text).unwrap();
        doc.root
            .child("appSettings")
            .unwrap()
            .child_elements()
            .map(|e| {
                (
                    e.attr("key").unwrap_or_default().to_owned(),
                    e.attr("value").unwrap_or_default().to_owned(),
                )
            })
            .collect()
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<ApplicationVariable> {
        pairs
            .iter()
            .map(|(k, v)| ApplicationVariable::new(*k, *v))
            .collect()
    }

    #[test]
    fn reserved_keys_injected() {
        let out = apply_app_settings(WEB_CONFIG, &[], "/logs/app.log", "/logs/err.log").unwrap();
        assert_eq!(
            entries(&out),
            vec![
                ("Greeting".to_owned(), "hello".to_owned()),
                (LOG_FILE_KEY.to_owned(), "/logs/app.log".to_owned()),
                (ERROR_LOG_FILE_KEY.to_owned(), "/logs/err.log".to_owned()),
            ]
        );
    }

    #[test]
    fn caller_reserved_values_win() {
        let variables = vars(&[(LOG_FILE_KEY, "/custom/app.log")]);
        let out = apply_app_settings(WEB_CONFIG, &variables, "/logs/app.log", "/logs/err.log")
            .unwrap();
        let entries = entries(&out);
        let logs: Vec<&(String, String)> =
            entries.iter().filter(|(k, _)| k == LOG_FILE_KEY).collect();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].1, "/custom/app.log");
        assert!(entries
            .iter()
            .any(|(k, v)| k == ERROR_LOG_FILE_KEY && v == "/logs/err.log"));
    }

    #[test]
    fn existing_key_replaced_in_place() {
        let variables = vars(&[("Greeting", "bonjour"), ("Extra", "1")]);
        let out = apply_app_settings(WEB_CONFIG, &variables, "l", "e").unwrap();
        let entries = entries(&out);
        assert_eq!(entries[0], ("Greeting".to_owned(), "bonjour".to_owned()));
        assert_eq!(entries[1], ("Extra".to_owned(), "1".to_owned()));
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn upsert_is_idempotent() {
        let variables = vars(&[("A", "1"), ("B", "2"), (ERROR_LOG_FILE_KEY, "/e.log")]);
        let once = apply_app_settings(WEB_CONFIG, &variables, "/l.log", "/x.log").unwrap();
        let twice = apply_app_settings(&once, &variables, "/l.log", "/x.log").unwrap();
        assert_eq!(once, twice);

        let entries = entries(&twice);
        let mut keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        let total = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), total);
    }

    #[test]
    fn missing_section_is_prepended() {
        let text = "<configuration>\n  <system.web />\n</configuration>";
        let out = apply_app_settings(text, &vars(&[("A", "1")]), "l", "e").unwrap();
        let doc = Document::parse(&out).unwrap();
        let first = doc.root.child_elements().next().unwrap();
        assert_eq!(first.name, "appSettings");
        assert_eq!(entries(&out).len(), 3);
    }

    #[test]
    fn wrong_root_rejected() {
        let err = apply_app_settings("<settings/>", &[], "l", "e").unwrap_err();
        assert!(matches!(err, AutowireError::UnexpectedRoot { .. }));
    }

    #[test]
    fn unrelated_content_preserved() {
        let out = apply_app_settings(WEB_CONFIG, &[], "l", "e").unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\"?>\n<configuration>"));
        assert!(out.contains("\n  <system.web />\n</configuration>\n"));
    }
}
