//! The TLV option codec carried in the options region of every message.
//!
//! Each option is a code (1 byte), a length (1 byte), and `length` bytes of
//! value. The region is terminated by [`OptionCode::End`] and never exceeds
//! [`OPTIONS_CAPACITY`] bytes.
//!
//! Unknown codes are skipped by length, so an unrecognized option never
//! fails a decode. Only an option whose length runs past the buffer is an
//! error, reported as [`Error::MalformedOption`].
//!
//! Numeric values (lease time) are big-endian on the wire.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Size of the options region in a message record.
pub const OPTIONS_CAPACITY: usize = 312;

/// Option codes understood by this implementation.
///
/// Unknown codes are handled via [`DhcpOption::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation). Zero-filled tails decode as padding.
    Pad = 0,
    /// Subnet mask, 4 bytes.
    SubnetMask = 1,
    /// Default gateway, 4 bytes.
    Router = 3,
    /// DNS server, 4 bytes.
    DnsServer = 6,
    /// Domain name, variable-length ASCII.
    DomainName = 15,
    /// Lease time in seconds, 4 bytes big-endian.
    LeaseTime = 51,
    /// Message type, 1 byte.
    MessageType = 53,
    /// End of options marker.
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DnsServer),
            15 => Ok(Self::DomainName),
            51 => Ok(Self::LeaseTime),
            53 => Ok(Self::MessageType),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// Message types, shared by the record header and option 53.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate an address.
    Discover = 1,
    /// Server reservation of an address.
    Offer = 2,
    /// Client request to bind (or renew) an address.
    Request = 3,
    /// Server confirmation of a binding.
    Ack = 4,
    /// Server refusal of a binding.
    Nak = 5,
    /// Client gives its address back.
    Release = 6,
    /// Client asks for configuration only.
    Inform = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Ack),
            5 => Ok(Self::Nak),
            6 => Ok(Self::Release),
            7 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// The two replies that carry network configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Offer,
    Ack,
}

impl From<ReplyKind> for MessageType {
    fn from(kind: ReplyKind) -> Self {
        match kind {
            ReplyKind::Offer => MessageType::Offer,
            ReplyKind::Ack => MessageType::Ack,
        }
    }
}

/// A typed option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    SubnetMask(Ipv4Addr),
    Router(Ipv4Addr),
    DnsServer(Ipv4Addr),
    DomainName(String),
    LeaseTime(u32),
    MessageType(MessageType),
    /// Unrecognized option, kept verbatim.
    Unknown(u8, Vec<u8>),
}

fn parse_ipv4(data: &[u8], what: &str) -> Result<Ipv4Addr> {
    let octets: [u8; 4] = data
        .try_into()
        .map_err(|_| Error::MalformedOption(format!("Invalid {} length {}", what, data.len())))?;
    Ok(Ipv4Addr::from(octets))
}

impl DhcpOption {
    /// Returns the option code for this option.
    pub fn option_code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::DomainName(_) => OptionCode::DomainName as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Parses an option from its code and raw value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedOption`] if the value length is wrong for a
    /// known code (e.g., a subnet mask that is not 4 bytes).
    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => Ok(Self::SubnetMask(parse_ipv4(data, "subnet mask")?)),
            Ok(OptionCode::Router) => Ok(Self::Router(parse_ipv4(data, "router")?)),
            Ok(OptionCode::DnsServer) => Ok(Self::DnsServer(parse_ipv4(data, "DNS server")?)),
            Ok(OptionCode::DomainName) => {
                Ok(Self::DomainName(String::from_utf8_lossy(data).to_string()))
            }
            Ok(OptionCode::LeaseTime) => {
                let bytes: [u8; 4] = data.try_into().map_err(|_| {
                    Error::MalformedOption(format!("Invalid lease time length {}", data.len()))
                })?;
                Ok(Self::LeaseTime(u32::from_be_bytes(bytes)))
            }
            Ok(OptionCode::MessageType) => {
                if data.len() != 1 {
                    return Err(Error::MalformedOption(
                        "Invalid message type length".to_string(),
                    ));
                }
                let message_type = MessageType::try_from(data[0]).map_err(|value| {
                    Error::MalformedOption(format!("Unknown message type: {}", value))
                })?;
                Ok(Self::MessageType(message_type))
            }
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => Err(Error::MalformedOption(
                "Pad/End should not be parsed as options".to_string(),
            )),
            Err(unknown_code) => Ok(Self::Unknown(unknown_code, data.to_vec())),
        }
    }

    /// Encodes the option to its wire format (code + length + value).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::SubnetMask(addr) | Self::Router(addr) | Self::DnsServer(addr) => {
                let mut result = vec![self.option_code(), 4];
                result.extend_from_slice(&addr.octets());
                result
            }
            Self::DomainName(name) => {
                let bytes = name.as_bytes();
                let len = bytes.len().min(255);
                let mut result = vec![OptionCode::DomainName as u8, len as u8];
                result.extend_from_slice(&bytes[..len]);
                result
            }
            Self::LeaseTime(seconds) => {
                let mut result = vec![OptionCode::LeaseTime as u8, 4];
                result.extend_from_slice(&seconds.to_be_bytes());
                result
            }
            Self::MessageType(message_type) => {
                vec![OptionCode::MessageType as u8, 1, *message_type as u8]
            }
            Self::Unknown(code, data) => {
                let len = data.len().min(255);
                let mut result = vec![*code, len as u8];
                result.extend_from_slice(&data[..len]);
                result
            }
        }
    }
}

/// Serializes options into a region of at most [`OPTIONS_CAPACITY`] bytes.
///
/// The result always ends with [`OptionCode::End`]. An option that would not
/// fit in front of the sentinel is left out.
pub fn encode_options(options: &[DhcpOption]) -> Vec<u8> {
    let mut region = Vec::with_capacity(OPTIONS_CAPACITY);
    for option in options {
        let encoded = option.encode();
        if region.len() + encoded.len() < OPTIONS_CAPACITY {
            region.extend_from_slice(&encoded);
        }
    }
    region.push(OptionCode::End as u8);
    region
}

/// Builds the configuration payload for an Offer or Ack.
pub fn encode(
    kind: ReplyKind,
    subnet: Ipv4Addr,
    gateway: Ipv4Addr,
    dns: Ipv4Addr,
    domain: &str,
    lease_seconds: u32,
) -> Vec<u8> {
    encode_options(&[
        DhcpOption::MessageType(kind.into()),
        DhcpOption::SubnetMask(subnet),
        DhcpOption::Router(gateway),
        DhcpOption::DnsServer(dns),
        DhcpOption::DomainName(domain.to_string()),
        DhcpOption::LeaseTime(lease_seconds),
    ])
}

/// Returns a lazy iterator over the `(code, value)` pairs in `region`.
///
/// Iteration stops at the sentinel or at the end of the buffer. The iterator
/// is `Clone`, so a sequence can be walked again from any point.
pub fn decode(region: &[u8]) -> Options<'_> {
    Options {
        data: region,
        index: 0,
        done: false,
    }
}

/// Iterator returned by [`decode`].
///
/// Yields at most one error, after which it is exhausted.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    data: &'a [u8],
    index: usize,
    done: bool,
}

impl<'a> Iterator for Options<'a> {
    type Item = Result<(u8, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        while self.index < self.data.len() {
            let code = self.data[self.index];

            if code == OptionCode::Pad as u8 {
                self.index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            if self.index + 1 >= self.data.len() {
                self.done = true;
                return Some(Err(Error::MalformedOption(format!(
                    "Option {} length missing",
                    code
                ))));
            }

            let length = self.data[self.index + 1] as usize;
            let start = self.index + 2;
            if start + length > self.data.len() {
                self.done = true;
                return Some(Err(Error::MalformedOption(format!(
                    "Option {} claims {} bytes, {} remain",
                    code,
                    length,
                    self.data.len() - start
                ))));
            }

            self.index = start + length;
            return Some(Ok((code, &self.data[start..start + length])));
        }

        self.done = true;
        None
    }
}

/// Network configuration carried by an Offer or Ack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    pub message_type: Option<MessageType>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub dns_server: Option<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub lease_seconds: Option<u32>,
}

impl NetworkConfig {
    /// Collects the recognized options in `region`; unknown codes are skipped.
    ///
    /// When an option appears twice, the first occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedOption`] if the region is truncated or a
    /// known option has an invalid value.
    pub fn from_options(region: &[u8]) -> Result<Self> {
        let mut config = Self::default();
        for entry in decode(region) {
            let (code, value) = entry?;
            match DhcpOption::parse(code, value)? {
                DhcpOption::MessageType(message_type) => {
                    config.message_type.get_or_insert(message_type);
                }
                DhcpOption::SubnetMask(mask) => {
                    config.subnet_mask.get_or_insert(mask);
                }
                DhcpOption::Router(gateway) => {
                    config.gateway.get_or_insert(gateway);
                }
                DhcpOption::DnsServer(dns) => {
                    config.dns_server.get_or_insert(dns);
                }
                DhcpOption::DomainName(domain) => {
                    config.domain_name.get_or_insert(domain);
                }
                DhcpOption::LeaseTime(seconds) => {
                    config.lease_seconds.get_or_insert(seconds);
                }
                DhcpOption::Unknown(..) => {}
            }
        }
        Ok(config)
    }
}
