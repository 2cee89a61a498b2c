use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use minidhcp::{
    ClientConfig, DhcpServer, EntryState, LeaseClient, LeaseEnd, MacAddr, Message, MessageType,
    ServerConfig,
};

fn mac(last: u8) -> MacAddr {
    MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, last])
}

async fn start_server(config: ServerConfig) -> (Arc<DhcpServer>, SocketAddr) {
    let config = ServerConfig {
        listen_address: Ipv4Addr::LOCALHOST,
        port: 0,
        sweep_interval_millis: 50,
        ..config
    };
    let server = Arc::new(DhcpServer::new(config).await.unwrap());
    let address = server.local_addr().unwrap();
    let running = Arc::clone(&server);
    tokio::spawn(async move { running.run().await });
    (server, address)
}

async fn client(server: SocketAddr, mac: MacAddr, max_renewals: u32) -> LeaseClient {
    let config = ClientConfig {
        server,
        bind: "127.0.0.1:0".parse().unwrap(),
        mac,
        max_renewals,
    };
    LeaseClient::bind(&config).await.unwrap()
}

async fn discover(server: SocketAddr, mac: MacAddr) -> Option<Message> {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(&Message::discover(mac).encode(), server)
        .await
        .unwrap();

    let mut buffer = [0u8; 1500];
    match tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buffer)).await {
        Ok(Ok((size, _))) => Some(Message::parse(&buffer[..size]).unwrap()),
        _ => None,
    }
}

async fn wait_for_free(server: &DhcpServer, expected: usize) -> bool {
    for _ in 0..50 {
        if server.pool().free_count().await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn three_address_pool_exhausts_and_reuses_released_address() {
    let (server, address) = start_server(ServerConfig {
        pool_start: Ipv4Addr::new(192, 168, 1, 10),
        pool_end: Ipv4Addr::new(192, 168, 1, 12),
        ..Default::default()
    })
    .await;

    let mut clients = Vec::new();
    let mut leases = Vec::new();
    for index in 1..=3 {
        let mut lease_client = client(address, mac(index), 3).await;
        let lease = lease_client.acquire().await.unwrap();
        leases.push(lease);
        clients.push(lease_client);
    }

    let bound: HashSet<_> = leases.iter().map(|lease| lease.assigned_address).collect();
    assert_eq!(bound.len(), 3);
    assert_eq!(server.pool().bound_count().await, 3);

    assert!(discover(address, mac(4)).await.is_none());

    let released = leases.remove(1);
    let released_address = released.assigned_address;
    clients[1].release(released).await;
    assert!(wait_for_free(&server, 1).await);

    let offer = discover(address, mac(4)).await.unwrap();
    assert_eq!(offer.message_type, MessageType::Offer);
    assert_eq!(offer.address, Some(released_address));

    let mut fourth = client(address, mac(4), 3).await;
    let lease = fourth.acquire().await.unwrap();
    assert_eq!(lease.assigned_address, released_address);
}

#[tokio::test]
async fn client_renews_then_releases() {
    let (server, address) = start_server(ServerConfig {
        pool_start: Ipv4Addr::new(10, 1, 0, 1),
        pool_end: Ipv4Addr::new(10, 1, 0, 4),
        lease_seconds: 1,
        ..Default::default()
    })
    .await;

    let mut lease_client = client(address, mac(1), 2).await;
    let lease = lease_client.acquire().await.unwrap();
    let assigned = lease.assigned_address;
    assert_eq!(lease.lease_seconds, 1);
    assert_eq!(
        server.pool().state_of(mac(1)).await,
        Some((assigned, EntryState::Bound))
    );

    let end = lease_client
        .maintain(lease, std::future::pending())
        .await
        .unwrap();
    assert_eq!(end, LeaseEnd::RenewalsExhausted);

    assert!(wait_for_free(&server, 4).await);
    assert_eq!(server.pool().state_of(mac(1)).await, None);
}

#[tokio::test]
async fn interrupted_client_releases_its_lease() {
    let (server, address) = start_server(ServerConfig {
        pool_start: Ipv4Addr::new(10, 2, 0, 1),
        pool_end: Ipv4Addr::new(10, 2, 0, 2),
        ..Default::default()
    })
    .await;

    let mut lease_client = client(address, mac(7), 3).await;
    let lease = lease_client.acquire().await.unwrap();
    assert_eq!(server.pool().bound_count().await, 1);

    let end = lease_client
        .maintain(lease, tokio::time::sleep(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(end, LeaseEnd::Interrupted);
    assert!(wait_for_free(&server, 2).await);
}

#[tokio::test]
async fn burst_of_discovers_offers_each_address_once() {
    let (server, address) = start_server(ServerConfig {
        pool_start: Ipv4Addr::new(10, 3, 0, 1),
        pool_end: Ipv4Addr::new(10, 3, 0, 10),
        max_workers: 4,
        ..Default::default()
    })
    .await;

    let mut handles = Vec::new();
    for index in 0..50u8 {
        handles.push(tokio::spawn(discover(address, mac(index))));
    }

    let mut offered = HashSet::new();
    let mut silent = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(offer) => {
                assert_eq!(offer.message_type, MessageType::Offer);
                assert!(offered.insert(offer.address.unwrap()));
            }
            None => silent += 1,
        }
    }

    assert_eq!(offered.len(), 10);
    assert_eq!(silent, 40);

    let snapshot = server.pool().snapshot().await;
    assert!(snapshot.iter().all(|entry| entry.state == EntryState::Offered));
    let owners: HashSet<_> = snapshot.iter().filter_map(|entry| entry.owner_mac).collect();
    assert_eq!(owners.len(), 10);
}
