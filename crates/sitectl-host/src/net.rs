//! Local network helpers for hosts with several interfaces.

use std::io;
use std::net::{IpAddr, TcpListener, UdpSocket};

/// Root name server address used as the default routing target.
pub const DEFAULT_ROUTE: &str = "198.41.0.4";

/// Address the OS would use to reach the public internet.
pub fn local_ip_address() -> io::Result<IpAddr> {
    local_ip_address_via(DEFAULT_ROUTE)
}

/// Address the OS would use to reach `route`. Connecting a UDP socket sends
/// no traffic; it only selects the outgoing interface. Pointing at a local
/// interface address returns that address.
pub fn local_ip_address_via(route: &str) -> io::Result<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.connect((route, 1))?;
    Ok(socket.local_addr()?.ip())
}

/// A port that was free at the time of the call.
pub fn grab_ephemeral_port() -> io::Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))?;
    Ok(listener.local_addr()?.port())
}
