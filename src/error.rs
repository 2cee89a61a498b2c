//! Error types for the lease server and client.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

use std::net::Ipv4Addr;

use crate::mac::MacAddr;

/// Errors that can occur while leasing addresses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    ///
    /// On the server a failed send or receive only drops the datagram in
    /// flight; on the client it ends the lease lifecycle.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config or journal files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed message record received.
    ///
    /// The record is shorter than its fixed header, carries an unknown
    /// message type, or has an unparseable mac/address field.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// An option in the TLV region claims more bytes than remain.
    ///
    /// Callers treat the message as carrying no options.
    #[error("Malformed option: {0}")]
    MalformedOption(String),

    /// Every entry in the pool is Offered or Bound.
    ///
    /// Surfaced on the wire as silence: no Offer is sent.
    #[error("No available IP addresses in pool")]
    PoolExhausted,

    /// A Request named an address that was never reserved for this client.
    #[error("Binding of {address} rejected for {mac}")]
    BindingRejected { mac: MacAddr, address: Ipv4Addr },

    /// An address lies outside the configured pool range.
    #[error("Address {0} is outside the configured pool range")]
    AddressOutOfRange(Ipv4Addr),

    /// Invalid server or client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without administrator privileges.
    #[error("Socket error: {0}")]
    Socket(String),

    /// The server answered with a message the client did not expect.
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// A specialized Result type for lease operations.
pub type Result<T> = std::result::Result<T, Error>;
