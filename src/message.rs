//! Fixed-size message records exchanged over UDP.
//!
//! Every message is one 350-byte record. Text fields are NUL-padded ASCII;
//! the type is the only header field with a byte order.
//!
//! # Record Layout
//!
//! ```text
//! offset  size  field
//! ------  ----  -----------------------------------------------------
//!      0     4  message_type   u32 big-endian, 1=DISCOVER .. 7=INFORM
//!      4    18  client_mac     "XX:XX:XX:XX:XX:XX" + NUL
//!     22    16  address        dotted-quad IPv4 + NUL padding, or empty
//!     38   312  options        TLV, terminated by 255, zero padded
//! ```

use std::net::Ipv4Addr;

use tracing::warn;

use crate::error::{Error, Result};
use crate::mac::MacAddr;
use crate::options::{
    self, DhcpOption, MessageType, NetworkConfig, OPTIONS_CAPACITY, ReplyKind,
};

const MESSAGE_TYPE_SIZE: usize = 4;
const CLIENT_MAC_SIZE: usize = 18;
const ADDRESS_SIZE: usize = 16;

const CLIENT_MAC_OFFSET: usize = MESSAGE_TYPE_SIZE;
const ADDRESS_OFFSET: usize = CLIENT_MAC_OFFSET + CLIENT_MAC_SIZE;
const OPTIONS_OFFSET: usize = ADDRESS_OFFSET + ADDRESS_SIZE;

/// Size of the fixed header (everything before the options region).
pub const HEADER_SIZE: usize = OPTIONS_OFFSET;

/// Size of a complete record on the wire.
pub const MESSAGE_SIZE: usize = HEADER_SIZE + OPTIONS_CAPACITY;

/// A decoded message.
///
/// Use [`parse`](Self::parse) for incoming datagrams and the constructors
/// ([`discover`](Self::discover), [`reply`](Self::reply), ...) to build
/// outgoing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,

    pub client_mac: MacAddr,

    /// Requested address (client messages) or assigned address (replies).
    pub address: Option<Ipv4Addr>,

    /// Raw TLV options region, decoded lazily with [`options::decode`].
    pub options: Vec<u8>,
}

fn read_text(field: &[u8]) -> Result<&str> {
    let end = field.iter().position(|&byte| byte == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(str::trim)
        .map_err(|_| Error::InvalidMessage("Text field is not ASCII".to_string()))
}

fn write_text(buffer: &mut [u8], text: &str) {
    let bytes = text.as_bytes();
    // One byte stays NUL so the field is always terminated.
    let len = bytes.len().min(buffer.len() - 1);
    buffer[..len].copy_from_slice(&bytes[..len]);
}

impl Message {
    /// Parses a message record from raw bytes.
    ///
    /// A record may be shorter than [`MESSAGE_SIZE`] as long as the header is
    /// complete; the options region is then whatever follows the header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if:
    /// - The record is shorter than the 38-byte header
    /// - The message type is not 1..=7
    /// - The mac or address field does not parse
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidMessage(format!(
                "Message too short: {} bytes (minimum {})",
                data.len(),
                HEADER_SIZE
            )));
        }

        let raw_type = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let message_type = u8::try_from(raw_type)
            .ok()
            .and_then(|value| MessageType::try_from(value).ok())
            .ok_or_else(|| Error::InvalidMessage(format!("Unknown message type: {}", raw_type)))?;

        let client_mac: MacAddr =
            read_text(&data[CLIENT_MAC_OFFSET..CLIENT_MAC_OFFSET + CLIENT_MAC_SIZE])?.parse()?;

        let address_text = read_text(&data[ADDRESS_OFFSET..ADDRESS_OFFSET + ADDRESS_SIZE])?;
        let address = if address_text.is_empty() {
            None
        } else {
            Some(address_text.parse::<Ipv4Addr>().map_err(|_| {
                Error::InvalidMessage(format!("Invalid address field: {:?}", address_text))
            })?)
        };

        let options_end = data.len().min(MESSAGE_SIZE);
        let options = data[OPTIONS_OFFSET..options_end].to_vec();

        Ok(Self {
            message_type,
            client_mac,
            address,
            options,
        })
    }

    /// Encodes the message to a [`MESSAGE_SIZE`]-byte record.
    pub fn encode(&self) -> Vec<u8> {
        let mut record = vec![0u8; MESSAGE_SIZE];

        record[..CLIENT_MAC_OFFSET].copy_from_slice(&(self.message_type as u32).to_be_bytes());
        write_text(
            &mut record[CLIENT_MAC_OFFSET..ADDRESS_OFFSET],
            &self.client_mac.to_string(),
        );
        if let Some(address) = self.address {
            write_text(
                &mut record[ADDRESS_OFFSET..OPTIONS_OFFSET],
                &address.to_string(),
            );
        }

        let len = self.options.len().min(OPTIONS_CAPACITY);
        record[OPTIONS_OFFSET..OPTIONS_OFFSET + len].copy_from_slice(&self.options[..len]);

        record
    }

    fn client(message_type: MessageType, client_mac: MacAddr, address: Option<Ipv4Addr>) -> Self {
        Self {
            message_type,
            client_mac,
            address,
            options: options::encode_options(&[DhcpOption::MessageType(message_type)]),
        }
    }

    pub fn discover(client_mac: MacAddr) -> Self {
        Self::client(MessageType::Discover, client_mac, None)
    }

    pub fn request(client_mac: MacAddr, address: Ipv4Addr) -> Self {
        Self::client(MessageType::Request, client_mac, Some(address))
    }

    pub fn release(client_mac: MacAddr, address: Ipv4Addr) -> Self {
        Self::client(MessageType::Release, client_mac, Some(address))
    }

    pub fn inform(client_mac: MacAddr) -> Self {
        Self::client(MessageType::Inform, client_mac, None)
    }

    /// Creates an Offer or Ack for `request`, carrying `options`.
    pub fn reply(
        request: &Message,
        kind: ReplyKind,
        address: Option<Ipv4Addr>,
        options: Vec<u8>,
    ) -> Self {
        Self {
            message_type: kind.into(),
            client_mac: request.client_mac,
            address,
            options,
        }
    }

    /// Creates a Nak for `request`. No address, no configuration.
    pub fn nak(request: &Message) -> Self {
        Self {
            message_type: MessageType::Nak,
            client_mac: request.client_mac,
            address: None,
            options: options::encode_options(&[]),
        }
    }

    /// Decodes the options region into typed configuration.
    ///
    /// A malformed region is logged and treated as carrying no options.
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig::from_options(&self.options).unwrap_or_else(|error| {
            warn!(
                "Ignoring options of {} from {}: {}",
                self.message_type, self.client_mac, error
            );
            NetworkConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: MacAddr = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn raw_record(message_type: u32, mac: &str, address: &str) -> Vec<u8> {
        let mut record = vec![0u8; MESSAGE_SIZE];
        record[0..4].copy_from_slice(&message_type.to_be_bytes());
        record[4..4 + mac.len()].copy_from_slice(mac.as_bytes());
        record[22..22 + address.len()].copy_from_slice(address.as_bytes());
        record[38] = 255;
        record
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(HEADER_SIZE, 38);
        assert_eq!(MESSAGE_SIZE, 350);
    }

    #[test]
    fn test_parse_field_offsets() {
        let record = raw_record(3, "00:11:22:33:44:55", "192.168.1.10");
        let message = Message::parse(&record).unwrap();

        assert_eq!(message.message_type, MessageType::Request);
        assert_eq!(message.client_mac, MAC);
        assert_eq!(message.address, Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(message.options.len(), OPTIONS_CAPACITY);
        assert_eq!(message.options[0], 255);
    }

    #[test]
    fn test_empty_address_field_is_none() {
        let record = raw_record(1, "00:11:22:33:44:55", "");
        let message = Message::parse(&record).unwrap();
        assert_eq!(message.address, None);
    }

    #[test]
    fn test_encode_produces_correct_offsets() {
        let message = Message::request(MAC, Ipv4Addr::new(10, 0, 0, 200));
        let encoded = message.encode();

        assert_eq!(encoded.len(), MESSAGE_SIZE);
        assert_eq!(&encoded[0..4], &3u32.to_be_bytes());
        assert_eq!(&encoded[4..21], b"00:11:22:33:44:55");
        assert_eq!(encoded[21], 0);
        assert_eq!(&encoded[22..34], b"10.0.0.200");
        assert_eq!(encoded[34], 0);
        assert_eq!(&encoded[38..42], &[53, 1, 3, 255]);
    }

    #[test]
    fn test_roundtrip_reply() {
        let request = Message::discover(MAC);
        let payload = options::encode(
            ReplyKind::Offer,
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(8, 8, 8, 8),
            "example.local",
            120,
        );
        let offer = Message::reply(
            &request,
            ReplyKind::Offer,
            Some(Ipv4Addr::new(192, 168, 1, 10)),
            payload,
        );

        let parsed = Message::parse(&offer.encode()).unwrap();
        assert_eq!(parsed.message_type, MessageType::Offer);
        assert_eq!(parsed.client_mac, MAC);
        assert_eq!(parsed.address, Some(Ipv4Addr::new(192, 168, 1, 10)));

        let config = parsed.network_config();
        assert_eq!(config.message_type, Some(MessageType::Offer));
        assert_eq!(config.lease_seconds, Some(120));
    }

    #[test]
    fn test_nak_has_no_address_or_configuration() {
        let request = Message::request(MAC, Ipv4Addr::new(192, 168, 1, 99));
        let nak = Message::nak(&request);
        let parsed = Message::parse(&nak.encode()).unwrap();

        assert_eq!(parsed.message_type, MessageType::Nak);
        assert_eq!(parsed.address, None);
        assert_eq!(parsed.network_config(), NetworkConfig::default());
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(Message::parse(&[0u8; 37]).is_err());
        assert!(Message::parse(&[]).is_err());
    }

    #[test]
    fn test_header_only_record_has_no_options() {
        let record = raw_record(1, "00:11:22:33:44:55", "");
        let message = Message::parse(&record[..HEADER_SIZE]).unwrap();
        assert!(message.options.is_empty());
        assert_eq!(message.network_config(), NetworkConfig::default());
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        for raw in [0u32, 8, 256, u32::MAX] {
            let record = raw_record(raw, "00:11:22:33:44:55", "");
            assert!(Message::parse(&record).is_err(), "type {} accepted", raw);
        }
    }

    #[test]
    fn test_bad_text_fields_rejected() {
        let bad_mac = raw_record(1, "not-a-mac", "");
        assert!(Message::parse(&bad_mac).is_err());

        let bad_address = raw_record(3, "00:11:22:33:44:55", "300.1.1.1");
        assert!(Message::parse(&bad_address).is_err());
    }

    #[test]
    fn test_malformed_options_treated_as_absent() {
        let mut record = raw_record(2, "00:11:22:33:44:55", "192.168.1.10");
        record[38] = 51;
        record[39] = 200;
        record.truncate(HEADER_SIZE + 10);

        let message = Message::parse(&record).unwrap();
        assert_eq!(message.network_config(), NetworkConfig::default());
    }

    #[test]
    fn test_oversized_options_truncated_on_encode() {
        let mut message = Message::inform(MAC);
        message.options = vec![0u8; OPTIONS_CAPACITY + 50];
        assert_eq!(message.encode().len(), MESSAGE_SIZE);
    }
}
