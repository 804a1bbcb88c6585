//! UDP transport using renet_netcode.

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use renet::RenetServer;
use renet_netcode::{NetcodeServerTransport, ServerAuthentication, ServerConfig};
use tracing::{error, info};

/// Protocol ID shared with clients ("SAGE" + version).
pub const PROTOCOL_ID: u64 = 0x5341_4745_0001;

pub struct TransportConfig {
    pub public_address: SocketAddr,
    pub max_clients: usize,
    /// Secure authentication key. `None` runs unsecured, for development.
    pub private_key: Option<[u8; 32]>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            public_address: SocketAddr::from(([127, 0, 0, 1], 7878)),
            max_clients: 64,
            private_key: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind socket to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    #[error("Failed to determine bound address for {0}: {1}")]
    LocalAddrFailed(SocketAddr, std::io::Error),

    #[error("Failed to configure socket: {0}")]
    SocketConfig(std::io::Error),

    #[error("System clock is before the Unix epoch")]
    Clock,

    #[error("Failed to create transport: {0}")]
    TransportCreation(String),
}

fn now() -> Result<Duration, TransportError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| TransportError::Clock)
}

pub fn create_server_transport(
    config: TransportConfig,
) -> Result<NetcodeServerTransport, TransportError> {
    let socket = UdpSocket::bind(config.public_address)
        .map_err(|e| TransportError::BindFailed(config.public_address, e))?;
    let bound_addr = socket
        .local_addr()
        .map_err(|e| TransportError::LocalAddrFailed(config.public_address, e))?;
    socket
        .set_nonblocking(true)
        .map_err(TransportError::SocketConfig)?;

    let authentication = match config.private_key {
        Some(key) => ServerAuthentication::Secure { private_key: key },
        None => ServerAuthentication::Unsecure,
    };
    let server_config = ServerConfig {
        current_time: now()?,
        max_clients: config.max_clients,
        protocol_id: PROTOCOL_ID,
        public_addresses: vec![bound_addr],
        authentication,
    };
    let transport = NetcodeServerTransport::new(server_config, socket)
        .map_err(|e| TransportError::TransportCreation(e.to_string()))?;

    info!(
        address = %bound_addr,
        max_clients = config.max_clients,
        protocol = format_args!("{PROTOCOL_ID:016x}"),
        "transport bound"
    );
    Ok(transport)
}

/// Drives the netcode transport for a `RenetServer`.
pub struct ServerRunner {
    transport: NetcodeServerTransport,
}

impl ServerRunner {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        Ok(Self {
            transport: create_server_transport(config)?,
        })
    }

    /// Receive pending packets into `renet_server`.
    pub fn receive(&mut self, renet_server: &mut RenetServer) {
        match now() {
            Ok(current_time) => {
                if let Err(e) = self.transport.update(current_time, renet_server) {
                    error!(error = %e, "transport update failed");
                }
            }
            Err(e) => error!(error = %e, "transport update skipped"),
        }
    }

    /// Flush queued messages to the network.
    pub fn send(&mut self, renet_server: &mut RenetServer) {
        self.transport.send_packets(renet_server);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.addresses().first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_transport_on_ephemeral_port() {
        let config = TransportConfig {
            public_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        match create_server_transport(config) {
            Ok(_) => {}
            Err(TransportError::BindFailed(_, err))
                if err.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                // Some sandboxed environments disallow socket binds.
            }
            Err(err) => panic!("transport error: {err:?}"),
        }
    }
}
