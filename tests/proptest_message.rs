use std::net::Ipv4Addr;

use proptest::prelude::*;

use minidhcp::message::{HEADER_SIZE, MESSAGE_SIZE};
use minidhcp::options::{self, OPTIONS_CAPACITY};
use minidhcp::{DhcpOption, MacAddr, Message, MessageType, NetworkConfig, ReplyKind};

fn valid_header(message_type: u32) -> Vec<u8> {
    let mut record = vec![0u8; HEADER_SIZE];
    record[0..4].copy_from_slice(&message_type.to_be_bytes());
    record[4..21].copy_from_slice(b"00:11:22:33:44:55");
    record
}

fn message_type() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::Discover),
        Just(MessageType::Offer),
        Just(MessageType::Request),
        Just(MessageType::Ack),
        Just(MessageType::Nak),
        Just(MessageType::Release),
        Just(MessageType::Inform),
    ]
}

fn ipv4() -> impl Strategy<Value = Ipv4Addr> {
    any::<[u8; 4]>().prop_map(Ipv4Addr::from)
}

fn dhcp_option() -> impl Strategy<Value = DhcpOption> {
    prop_oneof![
        ipv4().prop_map(DhcpOption::SubnetMask),
        ipv4().prop_map(DhcpOption::Router),
        ipv4().prop_map(DhcpOption::DnsServer),
        "[a-z.]{0,300}".prop_map(DhcpOption::DomainName),
        any::<u32>().prop_map(DhcpOption::LeaseTime),
        message_type().prop_map(DhcpOption::MessageType),
        (100u8..=200, prop::collection::vec(any::<u8>(), 0..300))
            .prop_map(|(code, data)| DhcpOption::Unknown(code, data)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10000))]

    #[test]
    fn parse_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
        let _ = Message::parse(&data);
    }

    #[test]
    fn parse_never_panics_on_valid_header_with_random_options(
        options_data in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut record = valid_header(2);
        record.extend_from_slice(&options_data);
        if let Ok(message) = Message::parse(&record) {
            prop_assert!(message.options.len() <= OPTIONS_CAPACITY);
            let _ = message.network_config();
        }
    }

    #[test]
    fn decode_never_panics_and_fails_at_most_once(
        region in prop::collection::vec(any::<u8>(), 0..400)
    ) {
        let errors = options::decode(&region).filter(|entry| entry.is_err()).count();
        prop_assert!(errors <= 1);
        let _ = NetworkConfig::from_options(&region);
    }

    #[test]
    fn decode_is_restartable(
        region in prop::collection::vec(any::<u8>(), 0..400)
    ) {
        let first = options::decode(&region);
        let replay = first.clone();
        let a: Vec<_> = first.map(|entry| entry.ok()).collect();
        let b: Vec<_> = replay.map(|entry| entry.ok()).collect();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn short_records_always_rejected(
        data in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)
    ) {
        prop_assert!(Message::parse(&data).is_err());
    }

    #[test]
    fn unknown_message_types_always_rejected(raw_type in any::<u32>()) {
        prop_assume!(!(1..=7).contains(&raw_type));
        let mut record = valid_header(raw_type);
        record.push(255);
        prop_assert!(Message::parse(&record).is_err());
    }

    #[test]
    fn encoded_options_fit_and_end_with_sentinel(
        list in prop::collection::vec(dhcp_option(), 0..12)
    ) {
        let region = options::encode_options(&list);
        prop_assert!(region.len() <= OPTIONS_CAPACITY);
        prop_assert_eq!(region.last().copied(), Some(255));
        prop_assert!(options::decode(&region).all(|entry| entry.is_ok()));
    }

    #[test]
    fn reply_payload_recovers_configuration(
        subnet in ipv4(),
        gateway in ipv4(),
        dns in ipv4(),
        domain in "[a-z]{1,20}\\.[a-z]{2,5}",
        lease_seconds in any::<u32>(),
    ) {
        let region = options::encode(ReplyKind::Ack, subnet, gateway, dns, &domain, lease_seconds);
        let config = NetworkConfig::from_options(&region).unwrap();

        prop_assert_eq!(config.message_type, Some(MessageType::Ack));
        prop_assert_eq!(config.subnet_mask, Some(subnet));
        prop_assert_eq!(config.gateway, Some(gateway));
        prop_assert_eq!(config.dns_server, Some(dns));
        prop_assert_eq!(config.domain_name, Some(domain));
        prop_assert_eq!(config.lease_seconds, Some(lease_seconds));
    }

    #[test]
    fn records_are_always_full_size(
        mac in any::<[u8; 6]>(),
        address in prop::option::of(ipv4()),
        kind in message_type(),
        options_data in prop::collection::vec(any::<u8>(), 0..600),
    ) {
        let message = Message {
            message_type: kind,
            client_mac: MacAddr::new(mac),
            address,
            options: options_data,
        };
        let encoded = message.encode();
        prop_assert_eq!(encoded.len(), MESSAGE_SIZE);

        let parsed = Message::parse(&encoded).unwrap();
        prop_assert_eq!(parsed.message_type, kind);
        prop_assert_eq!(parsed.client_mac, MacAddr::new(mac));
        prop_assert_eq!(parsed.address, address);
    }
}
