//! Server-side message handling.
//!
//! [`TransactionHandler`] interprets one inbound [`Message`] against the
//! [`AddressPool`] and decides what, if anything, goes back on the wire:
//!
//! | Inbound  | Pool call  | Reply                          |
//! |----------|------------|--------------------------------|
//! | DISCOVER | `allocate` | OFFER, or nothing if exhausted |
//! | REQUEST  | `confirm`  | ACK, or NAK if not reserved    |
//! | RELEASE  | `release`  | nothing                        |
//! | INFORM   | none       | ACK with configuration only    |
//! | other    | none       | nothing                        |

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::journal::LeaseJournal;
use crate::message::Message;
use crate::options::{self, DhcpOption, MessageType, ReplyKind};
use crate::pool::{AddressPool, EntryState, Lease};

/// Why a message produced no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    PoolExhausted,
    /// A Release that names no address.
    MissingAddress,
    /// A server-to-client type (Offer, Ack, Nak) arriving at the server.
    UnexpectedType(MessageType),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PoolExhausted => write!(f, "pool exhausted"),
            Self::MissingAddress => write!(f, "no address field"),
            Self::UnexpectedType(message_type) => write!(f, "unexpected {} at server", message_type),
        }
    }
}

/// What handling a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Offered(Ipv4Addr),
    Bound { lease: Lease, renewal: bool },
    Rejected(Ipv4Addr),
    Released(Ipv4Addr),
    Informed,
    Dropped(DropReason),
}

/// The result of handling one message.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub outcome: Outcome,
    pub reply: Option<Message>,
}

impl Transaction {
    fn reply(outcome: Outcome, reply: Message) -> Self {
        Self {
            outcome,
            reply: Some(reply),
        }
    }

    fn silent(outcome: Outcome) -> Self {
        Self {
            outcome,
            reply: None,
        }
    }
}

/// Shared, cheaply clonable message handler.
#[derive(Debug, Clone)]
pub struct TransactionHandler {
    config: Arc<ServerConfig>,
    pool: AddressPool,
    journal: Option<Arc<LeaseJournal>>,
}

impl TransactionHandler {
    pub fn new(
        config: Arc<ServerConfig>,
        pool: AddressPool,
        journal: Option<Arc<LeaseJournal>>,
    ) -> Self {
        Self {
            config,
            pool,
            journal,
        }
    }

    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handles one decoded message.
    ///
    /// Pool rejections become Nak replies or silent drops; the only errors
    /// returned are unexpected pool failures.
    pub async fn handle(&self, message: &Message) -> Result<Transaction> {
        match message.message_type {
            MessageType::Discover => self.handle_discover(message).await,
            MessageType::Request => self.handle_request(message).await,
            MessageType::Release => Ok(self.handle_release(message).await),
            MessageType::Inform => Ok(self.handle_inform(message)),
            other => {
                warn!("Ignoring {} from {}", other, message.client_mac);
                Ok(Transaction::silent(Outcome::Dropped(
                    DropReason::UnexpectedType(other),
                )))
            }
        }
    }

    async fn handle_discover(&self, message: &Message) -> Result<Transaction> {
        let mac = message.client_mac;

        let offered_ip = match self.pool.allocate(mac).await {
            Ok(ip) => ip,
            Err(Error::PoolExhausted) => {
                warn!("Pool exhausted, cannot offer IP to {}", mac);
                return Ok(Transaction::silent(Outcome::Dropped(
                    DropReason::PoolExhausted,
                )));
            }
            Err(error) => return Err(error),
        };

        let offer = Message::reply(
            message,
            ReplyKind::Offer,
            Some(offered_ip),
            self.build_lease_options(ReplyKind::Offer),
        );

        info!("OFFER {} to {}", offered_ip, mac);

        Ok(Transaction::reply(Outcome::Offered(offered_ip), offer))
    }

    async fn handle_request(&self, message: &Message) -> Result<Transaction> {
        let mac = message.client_mac;

        let Some(requested_ip) = message.address else {
            warn!("REQUEST from {} with no address", mac);
            return Ok(self.nak(message, Ipv4Addr::UNSPECIFIED, "No address in REQUEST"));
        };

        // The journal line is written before the guard drops so that journal
        // order matches pool order.
        let mut pool = self.pool.lock().await;
        let renewal = pool.entry(requested_ip).is_some_and(|entry| {
            entry.state == EntryState::Bound && entry.owner_mac == Some(mac)
        });

        let lease = match pool.confirm(mac, requested_ip, Utc::now()) {
            Ok(lease) => lease,
            Err(Error::BindingRejected { .. }) => {
                return Ok(self.nak(message, requested_ip, "Address not reserved for client"));
            }
            Err(Error::AddressOutOfRange(_)) => {
                return Ok(self.nak(message, requested_ip, "Requested IP not in pool"));
            }
            Err(error) => return Err(error),
        };

        self.journal_record(&lease).await;
        drop(pool);

        let ack = Message::reply(
            message,
            ReplyKind::Ack,
            Some(requested_ip),
            self.build_lease_options(ReplyKind::Ack),
        );

        info!(
            "ACK {} to {} (lease: {} seconds{})",
            requested_ip,
            mac,
            lease.remaining_seconds(Utc::now()),
            if renewal { ", renewed" } else { "" }
        );

        Ok(Transaction::reply(Outcome::Bound { lease, renewal }, ack))
    }

    async fn handle_release(&self, message: &Message) -> Transaction {
        let mac = message.client_mac;

        let Some(address) = message.address else {
            warn!("RELEASE from {} with no address", mac);
            return Transaction::silent(Outcome::Dropped(DropReason::MissingAddress));
        };

        let mut pool = self.pool.lock().await;
        if let Some(owner) = pool.release(address) {
            self.journal_record(&Lease {
                mac: owner,
                address,
                expires_at: Utc::now(),
            })
            .await;
        }
        drop(pool);

        info!("RELEASE from {} for {}", mac, address);

        Transaction::silent(Outcome::Released(address))
    }

    fn handle_inform(&self, message: &Message) -> Transaction {
        let ack = Message::reply(message, ReplyKind::Ack, None, self.build_inform_options());

        info!("INFORM response to {}", message.client_mac);

        Transaction::reply(Outcome::Informed, ack)
    }

    fn nak(&self, message: &Message, requested_ip: Ipv4Addr, reason: &str) -> Transaction {
        warn!("NAK to {}: {}", message.client_mac, reason);
        Transaction::reply(Outcome::Rejected(requested_ip), Message::nak(message))
    }

    async fn journal_record(&self, lease: &Lease) {
        if let Some(journal) = &self.journal
            && let Err(error) = journal.record(lease).await
        {
            warn!(
                "Failed to journal {} for {}: {}",
                lease.address, lease.mac, error
            );
        }
    }

    fn build_lease_options(&self, kind: ReplyKind) -> Vec<u8> {
        options::encode(
            kind,
            self.config.subnet_mask,
            self.config.gateway,
            self.config.dns_server,
            &self.config.domain_name,
            self.config.lease_seconds,
        )
    }

    fn build_inform_options(&self) -> Vec<u8> {
        options::encode_options(&[
            DhcpOption::MessageType(MessageType::Ack),
            DhcpOption::SubnetMask(self.config.subnet_mask),
            DhcpOption::Router(self.config.gateway),
            DhcpOption::DnsServer(self.config.dns_server),
            DhcpOption::DomainName(self.config.domain_name.clone()),
        ])
    }
}
