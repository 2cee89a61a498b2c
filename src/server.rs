use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::journal::LeaseJournal;
use crate::message::Message;
use crate::pool::AddressPool;
use crate::transaction::{Outcome, TransactionHandler};

const RECV_BUFFER_SIZE: usize = 1500;

/// How long the dispatcher waits for a worker slot before going back to
/// the socket.
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(10);

pub struct DhcpServer {
    config: Arc<ServerConfig>,
    handler: TransactionHandler,
    socket: Arc<UdpSocket>,
    workers: Arc<Semaphore>,
}

impl DhcpServer {
    /// Validates `config`, binds the listening socket and restores any
    /// journaled leases.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let socket = Self::create_socket(&config)?;
        Self::with_socket(config, socket).await
    }

    /// Builds a server around an already bound socket.
    pub async fn with_socket(config: ServerConfig, socket: UdpSocket) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = AddressPool::from_config(&config)?;

        let journal = match &config.leases_file {
            Some(path) => {
                let journal = LeaseJournal::new(path);
                let records = journal.load().await?;
                let restored = pool.restore(&records).await;
                if restored > 0 {
                    info!("Restored {} leases from {}", restored, path);
                }
                if records.len() > restored {
                    journal.compact(&pool.leases().await).await?;
                    debug!(
                        "Compacted {} from {} to {} records",
                        path,
                        records.len(),
                        restored
                    );
                }
                Some(Arc::new(journal))
            }
            None => None,
        };

        info!("DHCP server starting on {}", socket.local_addr()?);
        info!(
            "IP pool: {} - {} ({} addresses)",
            config.pool_start,
            config.pool_end,
            config.pool_size()
        );

        let workers = Arc::new(Semaphore::new(
            config.max_workers.min(Semaphore::MAX_PERMITS),
        ));
        let handler = TransactionHandler::new(Arc::clone(&config), pool, journal);

        Ok(Self {
            config,
            handler,
            socket: Arc::new(socket),
            workers,
        })
    }

    fn create_socket(config: &ServerConfig) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = config.listen_socket_addr();
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    /// Runs the dispatch loop until the task is dropped.
    ///
    /// Every wake-up, whether from socket readiness or the sweep timer,
    /// sweeps expired leases first. A readable socket then yields at most one
    /// datagram, handed to a worker once a slot is free.
    pub async fn run(&self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let mut sweep_timer = tokio::time::interval(self.config.sweep_interval());
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("DHCP server ready and listening");

        loop {
            let readable = tokio::select! {
                result = self.socket.readable() => match result {
                    Ok(()) => true,
                    Err(error) => {
                        error!("Error waiting for socket: {}", error);
                        tokio::time::sleep(BACKPRESSURE_WAIT).await;
                        false
                    }
                },
                _ = sweep_timer.tick() => false,
            };

            self.sweep().await;

            if !readable {
                continue;
            }

            let Some(permit) = self.acquire_worker().await else {
                continue;
            };

            let (size, source) = match self.socket.try_recv_from(&mut buffer) {
                Ok(received) => received,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => continue,
                Err(error) => {
                    error!("Error receiving packet: {}", error);
                    continue;
                }
            };

            let data = buffer[..size].to_vec();
            let handler = self.handler.clone();
            let socket = Arc::clone(&self.socket);

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(error) = handle_datagram(&handler, &socket, &data, source).await {
                    warn!("Error handling packet from {}: {}", source, error);
                }
            });
        }
    }

    async fn acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        match Arc::clone(&self.workers).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(TryAcquireError::NoPermits) => {
                debug!(
                    "All {} workers busy, deferring datagram",
                    self.config.max_workers
                );
                let waiting = Arc::clone(&self.workers).acquire_owned();
                match tokio::time::timeout(BACKPRESSURE_WAIT, waiting).await {
                    Ok(Ok(permit)) => Some(permit),
                    _ => None,
                }
            }
            Err(TryAcquireError::Closed) => None,
        }
    }

    /// Reclaims expired offers and leases; returns how many were freed.
    pub async fn sweep(&self) -> usize {
        let reclaimed = self.handler.pool().sweep(Utc::now()).await;
        if reclaimed > 0 {
            info!("Reclaimed {} expired leases", reclaimed);
        }
        reclaimed
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pool(&self) -> &AddressPool {
        self.handler.pool()
    }
}

/// Decodes one datagram, handles it and unicasts any reply to `source`.
///
/// Replies always go back to the immediate sender, so a relay in front of
/// the client receives them.
async fn handle_datagram(
    handler: &TransactionHandler,
    socket: &UdpSocket,
    data: &[u8],
    source: SocketAddr,
) -> Result<()> {
    let message = Message::parse(data)?;

    info!(
        "{} from {} ({})",
        message.message_type, message.client_mac, source
    );

    let transaction = handler.handle(&message).await?;

    if let Outcome::Dropped(reason) = transaction.outcome {
        debug!(
            "Dropped {} from {}: {}",
            message.message_type, message.client_mac, reason
        );
    }

    if let Some(reply) = transaction.reply {
        socket.send_to(&reply.encode(), source).await?;
    }

    Ok(())
}
