//! Client-side lease lifecycle.
//!
//! ```text
//! Init ─▶ Discovering ─▶ Requesting ─▶ Bound ─▶ Renewing ─┐
//!                                        ▲                │ Ack
//!                                        └────────────────┘
//!         renewals exhausted / Nak / interrupt ─▶ Released
//! ```
//!
//! [`LeaseClient::acquire`] runs the Discover/Offer/Request/Ack exchange and
//! returns a [`ClientLease`]. [`LeaseClient::maintain`] renews it every
//! `lease_seconds / 2` until the renewal budget runs out, the server refuses,
//! or the shutdown future completes, and then sends exactly one Release.
//!
//! No exchange retransmits or times out: a silent server blocks the client.

use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::mac::MacAddr;
use crate::message::Message;
use crate::options::{MessageType, NetworkConfig};

const RECV_BUFFER_SIZE: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Discovering,
    Requesting,
    Bound,
    Renewing,
    Released,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Discovering => "DISCOVERING",
            Self::Requesting => "REQUESTING",
            Self::Bound => "BOUND",
            Self::Renewing => "RENEWING",
            Self::Released => "RELEASED",
        };
        f.write_str(name)
    }
}

/// Why [`LeaseClient::maintain`] stopped renewing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEnd {
    RenewalsExhausted,
    /// The server answered a renewal with Nak.
    Rejected,
    Interrupted,
}

impl fmt::Display for LeaseEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RenewalsExhausted => write!(f, "renewal limit reached"),
            Self::Rejected => write!(f, "renewal rejected"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// A bound lease as the client sees it.
#[derive(Debug, Clone)]
pub struct ClientLease {
    pub assigned_address: Ipv4Addr,
    pub lease_seconds: u32,
    pub lease_start: Instant,
    pub renewals_done: u32,
    pub max_renewals: u32,
    /// Configuration from the most recent Ack.
    pub network: NetworkConfig,
}

impl ClientLease {
    fn from_ack(ack: &Message, max_renewals: u32) -> Result<Self> {
        let assigned_address = ack
            .address
            .ok_or_else(|| Error::UnexpectedReply("ACK without an address".to_string()))?;
        let network = ack.network_config();
        let lease_seconds = network
            .lease_seconds
            .ok_or_else(|| Error::UnexpectedReply("ACK without a lease time".to_string()))?;

        Ok(Self {
            assigned_address,
            lease_seconds,
            lease_start: Instant::now(),
            renewals_done: 0,
            max_renewals,
            network,
        })
    }

    /// Time from `lease_start` until the next renewal (T1).
    pub fn renewal_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.lease_seconds / 2))
    }

    pub fn renewals_exhausted(&self) -> bool {
        self.renewals_done >= self.max_renewals
    }

    /// Restarts the lease from a renewal Ack.
    ///
    /// An Ack without a lease time keeps the previous duration.
    pub fn renew(&mut self, ack: &Message) {
        let network = ack.network_config();
        if let Some(seconds) = network.lease_seconds {
            self.lease_seconds = seconds;
        }
        self.network = network;
        self.lease_start = Instant::now();
        self.renewals_done += 1;
    }
}

pub struct LeaseClient {
    socket: UdpSocket,
    server: SocketAddr,
    mac: MacAddr,
    max_renewals: u32,
    state: ClientState,
}

impl LeaseClient {
    /// Binds the local socket named in `config`.
    pub async fn bind(config: &ClientConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind).await.map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", config.bind, error))
        })?;
        Ok(Self::with_socket(socket, config))
    }

    pub fn with_socket(socket: UdpSocket, config: &ClientConfig) -> Self {
        Self {
            socket,
            server: config.server,
            mac: config.mac,
            max_renewals: config.max_renewals,
            state: ClientState::Init,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn transition(&mut self, next: ClientState) {
        if self.state != next {
            info!("Client {}: {} -> {}", self.mac, self.state, next);
            self.state = next;
        }
    }

    /// Sends `message` and waits for one reply addressed to this client.
    async fn exchange(&self, message: &Message) -> Result<Message> {
        self.socket.send_to(&message.encode(), self.server).await?;

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (size, source) = self.socket.recv_from(&mut buffer).await?;
            let reply = Message::parse(&buffer[..size])?;
            if reply.client_mac == self.mac {
                return Ok(reply);
            }
            debug!("Ignoring reply for {} from {}", reply.client_mac, source);
        }
    }

    /// Discover/Offer/Request/Ack.
    ///
    /// # Errors
    ///
    /// - [`Error::BindingRejected`] if the server answers the Request with Nak
    /// - [`Error::UnexpectedReply`] for any other out-of-sequence reply
    /// - Transport and decode errors from the socket
    pub async fn acquire(&mut self) -> Result<ClientLease> {
        self.transition(ClientState::Discovering);
        let offer = self.exchange(&Message::discover(self.mac)).await?;
        let offered_ip = match (offer.message_type, offer.address) {
            (MessageType::Offer, Some(address)) => address,
            (other, _) => {
                return Err(Error::UnexpectedReply(format!(
                    "expected OFFER, got {}",
                    other
                )));
            }
        };
        info!("Offered {}", offered_ip);

        self.transition(ClientState::Requesting);
        let reply = self
            .exchange(&Message::request(self.mac, offered_ip))
            .await?;
        self.expect_ack(&reply, offered_ip)?;

        let lease = ClientLease::from_ack(&reply, self.max_renewals)?;
        self.transition(ClientState::Bound);
        info!(
            "Bound {} for {} seconds (renew in {:?}): {:?}",
            lease.assigned_address,
            lease.lease_seconds,
            lease.renewal_delay(),
            lease.network
        );

        Ok(lease)
    }

    fn expect_ack(&self, reply: &Message, address: Ipv4Addr) -> Result<()> {
        match reply.message_type {
            MessageType::Ack if reply.address == Some(address) => Ok(()),
            MessageType::Nak => Err(Error::BindingRejected {
                mac: self.mac,
                address,
            }),
            other => Err(Error::UnexpectedReply(format!(
                "expected ACK for {}, got {} for {:?}",
                address, other, reply.address
            ))),
        }
    }

    /// Keeps `lease` alive until a stop condition, then releases it.
    ///
    /// The Release is sent exactly once on every path, including renewal
    /// errors and `shutdown` completing mid-exchange.
    pub async fn maintain<F>(&mut self, mut lease: ClientLease, shutdown: F) -> Result<LeaseEnd>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let result = loop {
            if lease.renewals_exhausted() {
                info!(
                    "Reached {} renewals for {}",
                    lease.max_renewals, lease.assigned_address
                );
                break Ok(LeaseEnd::RenewalsExhausted);
            }

            let renew_at = tokio::time::Instant::from_std(lease.lease_start + lease.renewal_delay());
            tokio::select! {
                _ = &mut shutdown => break Ok(LeaseEnd::Interrupted),
                _ = tokio::time::sleep_until(renew_at) => {}
            }

            self.transition(ClientState::Renewing);
            let request = Message::request(self.mac, lease.assigned_address);
            let reply = tokio::select! {
                _ = &mut shutdown => break Ok(LeaseEnd::Interrupted),
                reply = self.exchange(&request) => reply,
            };

            match reply.and_then(|reply| {
                self.expect_ack(&reply, lease.assigned_address)
                    .map(|()| reply)
            }) {
                Ok(ack) => {
                    lease.renew(&ack);
                    self.transition(ClientState::Bound);
                    info!(
                        "Renewed {} ({}/{}), next renewal in {:?}",
                        lease.assigned_address,
                        lease.renewals_done,
                        lease.max_renewals,
                        lease.renewal_delay()
                    );
                }
                Err(Error::BindingRejected { .. }) => {
                    warn!("Renewal of {} rejected", lease.assigned_address);
                    break Ok(LeaseEnd::Rejected);
                }
                Err(error) => break Err(error),
            }
        };

        self.release(lease).await;
        result
    }

    /// Sends a best-effort Release for `lease`, consuming it.
    pub async fn release(&mut self, lease: ClientLease) {
        let release = Message::release(self.mac, lease.assigned_address);
        match self.socket.send_to(&release.encode(), self.server).await {
            Ok(_) => info!("Released {}", lease.assigned_address),
            Err(error) => warn!("Failed to release {}: {}", lease.assigned_address, error),
        }
        self.transition(ClientState::Released);
    }
}
