use super::{json_pretty, EXIT_SUCCESS};
use sitectl_host::net::{grab_ephemeral_port, local_ip_address_via, DEFAULT_ROUTE};

pub fn run(route: Option<&str>, json: bool) -> Result<u8, String> {
    let route = route.unwrap_or(DEFAULT_ROUTE);
    let ip = local_ip_address_via(route).map_err(|e| format!("local address via {route}: {e}"))?;
    let port = grab_ephemeral_port().map_err(|e| format!("ephemeral port: {e}"))?;

    if json {
        let payload = serde_json::json!({
            "route": route,
            "local_ip": ip.to_string(),
            "free_port": port,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("local ip:  {ip}");
        println!("free port: {port}");
    }
    Ok(EXIT_SUCCESS)
}
