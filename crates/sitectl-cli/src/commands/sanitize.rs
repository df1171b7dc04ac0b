use super::{json_pretty, EXIT_SUCCESS};
use sitectl_schema::{sanitize_account_name, unit_name_for};

pub fn run(name: &str, port: Option<u16>, json: bool) -> Result<u8, String> {
    let sanitized = sanitize_account_name(name).map_err(|e| e.to_string())?;
    let unit = port
        .map(|p| unit_name_for(name, p))
        .transpose()
        .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "input": name,
            "sanitized": sanitized,
            "unit_name": unit.as_deref(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match unit {
            Some(unit) => println!("{unit}"),
            None => println!("{sanitized}"),
        }
    }
    Ok(EXIT_SUCCESS)
}
