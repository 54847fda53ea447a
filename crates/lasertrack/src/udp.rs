//! Non-blocking UDP datagram receiver
//!
//! The receiver is polled once per tick from the simulation thread and drains
//! every datagram that is currently queued on the socket without blocking.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Largest datagram the receiver accepts
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Errors that can occur while setting up or polling the socket
#[derive(Error, Debug)]
pub enum UdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Configuration for the UDP receiver
#[derive(Debug, Clone)]
pub struct UdpReceiverConfig {
    /// Local port to bind on all interfaces (0 picks a free port)
    pub port: u16,
    /// Remote unicast source or multicast group
    pub address: String,
    /// Join `address` as a multicast group
    pub multicast: bool,
    /// Accept datagrams from any sender; otherwise only from `address`
    pub listen_to_all_addresses: bool,
}

impl Default for UdpReceiverConfig {
    fn default() -> Self {
        Self {
            port: 0,
            address: "127.0.0.1".to_string(),
            multicast: false,
            listen_to_all_addresses: true,
        }
    }
}

/// Non-blocking UDP receiver that can be polled
pub struct UdpReceiver {
    socket: UdpSocket,
    remote_ip: Option<Ipv4Addr>,
    buffer: Vec<u8>,
    datagrams_received: u64,
    bytes_received: u64,
}

impl UdpReceiver {
    /// Bind a socket according to `config`
    pub fn bind(config: &UdpReceiverConfig) -> Result<Self, UdpError> {
        let needs_address = config.multicast || !config.listen_to_all_addresses;
        let address = if needs_address {
            Some(
                config
                    .address
                    .parse::<Ipv4Addr>()
                    .map_err(|e| UdpError::InvalidAddress(format!("{}: {e}", config.address)))?,
            )
        } else {
            None
        };

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port))
            .map_err(|e| UdpError::Bind(format!("Failed to bind port {}: {e}", config.port)))?;
        socket.set_nonblocking(true)?;

        if config.multicast {
            if let Some(group) = address {
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
                socket.set_multicast_ttl_v4(50)?;
                info!("Joined multicast group {}", group);
            }
        }

        info!("UDP receiver listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            remote_ip: if config.listen_to_all_addresses {
                None
            } else {
                address
            },
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
            datagrams_received: 0,
            bytes_received: 0,
        })
    }

    /// Get the local address the receiver is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, UdpError> {
        Ok(self.socket.local_addr()?)
    }

    /// Hand every pending datagram to `on_datagram` without blocking.
    ///
    /// Returns the number of datagrams delivered. Datagrams from senders
    /// other than the configured remote address are dropped.
    pub fn poll<F>(&mut self, mut on_datagram: F) -> Result<usize, UdpError>
    where
        F: FnMut(&[u8], SocketAddr),
    {
        let mut delivered = 0;
        loop {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((0, _)) => continue,
                Ok((len, source)) => {
                    if let Some(expected) = self.remote_ip {
                        if source.ip() != expected {
                            warn!(
                                "Got datagram from unaccepted endpoint {}, expected {}; dropping it",
                                source, expected
                            );
                            continue;
                        }
                    }

                    self.datagrams_received += 1;
                    self.bytes_received += len as u64;
                    trace!("Received {} bytes from {}", len, source);

                    on_datagram(&self.buffer[..len], source);
                    delivered += 1;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                // Windows reports ICMP port-unreachable on the receiving socket
                Err(ref e) if e.kind() == ErrorKind::ConnectionReset => {
                    debug!("Ignoring connection reset on UDP socket");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(delivered)
    }

    /// Get statistics about received data
    pub fn stats(&self) -> UdpStats {
        UdpStats {
            datagrams_received: self.datagrams_received,
            bytes_received: self.bytes_received,
        }
    }
}

/// Statistics about received data
#[derive(Debug, Clone, Copy)]
pub struct UdpStats {
    /// Number of datagrams delivered
    pub datagrams_received: u64,
    /// Total bytes delivered
    pub bytes_received: u64,
}
