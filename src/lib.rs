//! # minidhcp
//!
//! A small address-leasing protocol modeled on DHCP: a server hands out IPv4
//! addresses from a fixed pool, clients bind, renew and release them.
//!
//! ## Features
//!
//! - DISCOVER, OFFER, REQUEST, ACK, NAK, RELEASE and INFORM messages
//! - Fixed 350-byte records with a TLV options region
//! - Binding check: a client can only confirm an address it was offered
//! - Periodic sweep of expired offers and leases
//! - Bounded worker pool with backpressure
//! - Optional append-only lease journal
//! - Client lifecycle with half-life renewal and release on every exit path
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use minidhcp::{DhcpServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> minidhcp::Result<()> {
//!     let config = ServerConfig {
//!         pool_start: Ipv4Addr::new(192, 168, 1, 10),
//!         pool_end: Ipv4Addr::new(192, 168, 1, 12),
//!         ..Default::default()
//!     };
//!     let server = DhcpServer::new(config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`options`] - TLV option codec
//! - [`Message`] - Fixed-size message record
//! - [`AddressPool`] - Thread-safe pool of leasable addresses
//! - [`TransactionHandler`] - Turns inbound messages into pool calls and replies
//! - [`DhcpServer`] - UDP dispatch loop
//! - [`LeaseClient`] - Client lease lifecycle

pub mod client;
pub mod config;
pub mod error;
pub mod journal;
pub mod mac;
pub mod message;
pub mod options;
pub mod pool;
pub mod server;
pub mod transaction;

pub use client::{ClientLease, ClientState, LeaseClient, LeaseEnd};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use journal::LeaseJournal;
pub use mac::MacAddr;
pub use message::Message;
pub use options::{DhcpOption, MessageType, NetworkConfig, ReplyKind};
pub use pool::{AddressPool, EntryState, Lease, Pool, PoolEntry};
pub use server::DhcpServer;
pub use transaction::{DropReason, Outcome, Transaction, TransactionHandler};
