use sitectl_schema::ServiceBinding;
use std::collections::BTreeMap;
use tracing::debug;

/// Resolved `{label#name}` marker and the connection string replacing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConnection {
    pub marker: String,
    pub connection_string: String,
}

/// Render a connection string for every binding whose label has a template.
///
/// Connections come back in the order their markers were first seen. A later
/// binding with the same marker overwrites the value but keeps the position.
pub fn resolve_connections(
    services: &[ServiceBinding],
    templates: &BTreeMap<String, String>,
) -> Vec<ServiceConnection> {
    let mut connections: Vec<ServiceConnection> = Vec::new();
    for service in services {
        let Some(template) = templates.get(&service.label) else {
            debug!("no autowire template for service label '{}'", service.label);
            continue;
        };
        let marker = service.marker();
        let connection_string = service.render(template);
        match connections.iter_mut().find(|c| c.marker == marker) {
            Some(existing) => existing.connection_string = connection_string,
            None => connections.push(ServiceConnection {
                marker,
                connection_string,
            }),
        }
    }
    connections
}

/// Replace every occurrence of each marker in `text`, in order.
pub fn substitute_markers(text: &str, connections: &[ServiceConnection]) -> String {
    let mut out = text.to_owned();
    for connection in connections {
        debug!("configuring service {}", connection.marker);
        out = out.replace(&connection.marker, &connection.connection_string);
    }
    out
}
