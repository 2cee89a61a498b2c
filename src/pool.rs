//! Address pool and lease state.
//!
//! The pool owns every leasable address in a contiguous `[start, end]` range
//! and tracks, per address, whether it is free, offered to a client, or bound.
//!
//! # Entry States
//!
//! ```text
//! Free ──allocate──▶ Offered ──confirm──▶ Bound
//!  ▲                   │                   │
//!  └─────release/sweep─┴───release/sweep───┘
//! ```
//!
//! [`Pool`] is the plain state machine and takes the current time explicitly,
//! which keeps expiry deterministic in tests. [`AddressPool`] is the shared
//! handle used by the server: every operation runs under one
//! [`tokio::sync::Mutex`], so no caller ever observes a half-updated entry.
//!
//! The pool never logs. Callers decide what is worth reporting.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::mac::MacAddr;

/// Largest number of addresses a pool may hold (a /16).
pub const MAX_POOL_SIZE: u64 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    Free,
    Offered,
    Bound,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Offered => "offered",
            Self::Bound => "bound",
        };
        f.write_str(name)
    }
}

/// One leasable address and its assignment.
///
/// `owner_mac` and `lease_expiration` are set exactly when the entry is not
/// [`EntryState::Free`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    /// Host-order address value; fixed at construction.
    pub address: u32,
    pub state: EntryState,
    pub owner_mac: Option<MacAddr>,
    pub lease_expiration: Option<DateTime<Utc>>,
}

impl PoolEntry {
    fn new(address: u32) -> Self {
        Self {
            address,
            state: EntryState::Free,
            owner_mac: None,
            lease_expiration: None,
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.address)
    }

    pub fn is_free(&self) -> bool {
        self.state == EntryState::Free
    }

    fn reserve(&mut self, state: EntryState, mac: MacAddr, expiration: DateTime<Utc>) {
        self.state = state;
        self.owner_mac = Some(mac);
        self.lease_expiration = Some(expiration);
    }

    fn clear(&mut self) {
        self.state = EntryState::Free;
        self.owner_mac = None;
        self.lease_expiration = None;
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_free() && self.lease_expiration.is_some_and(|expiration| expiration <= now)
    }
}

/// A confirmed binding of an address to a client.
///
/// This is also the record format of the lease journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub mac: MacAddr,
    pub address: Ipv4Addr,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Seconds remaining until expiration, or 0 if expired.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// The pool state machine.
#[derive(Debug, Clone)]
pub struct Pool {
    entries: Vec<PoolEntry>,
    start: u32,
    offer_ttl: TimeDelta,
    lease_duration: TimeDelta,
}

impl Pool {
    /// Creates a pool with every address in `[start, end]` free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `start > end` or the range holds
    /// more than [`MAX_POOL_SIZE`] addresses.
    pub fn new(
        start: Ipv4Addr,
        end: Ipv4Addr,
        offer_ttl_seconds: u32,
        lease_seconds: u32,
    ) -> Result<Self> {
        let first = u32::from(start);
        let last = u32::from(end);
        if first > last {
            return Err(Error::InvalidConfig(format!(
                "Pool start {} is after pool end {}",
                start, end
            )));
        }
        let size = u64::from(last - first) + 1;
        if size > MAX_POOL_SIZE {
            return Err(Error::InvalidConfig(format!(
                "Pool {} - {} holds {} addresses (maximum {})",
                start, end, size, MAX_POOL_SIZE
            )));
        }

        Ok(Self {
            entries: (first..=last).map(PoolEntry::new).collect(),
            start: first,
            offer_ttl: TimeDelta::seconds(i64::from(offer_ttl_seconds)),
            lease_duration: TimeDelta::seconds(i64::from(lease_seconds)),
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::new(
            config.pool_start,
            config.pool_end,
            config.offer_ttl_seconds,
            config.lease_seconds,
        )
    }

    fn index_of(&self, address: Ipv4Addr) -> Option<usize> {
        let offset = u32::from(address).checked_sub(self.start)?;
        let index = usize::try_from(offset).ok()?;
        (index < self.entries.len()).then_some(index)
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.index_of(address).is_some()
    }

    pub fn entry(&self, address: Ipv4Addr) -> Option<&PoolEntry> {
        self.index_of(address).map(|index| &self.entries[index])
    }

    /// The non-free entry currently owned by `mac`, if any.
    pub fn entry_for(&self, mac: MacAddr) -> Option<&PoolEntry> {
        self.entries
            .iter()
            .find(|entry| !entry.is_free() && entry.owner_mac == Some(mac))
    }

    /// Reserves an address for `mac` and returns it.
    ///
    /// A client that already owns an entry gets that entry back: an Offered
    /// entry has its offer window restarted, a Bound entry is left as is.
    /// Otherwise the lowest Free address becomes Offered until
    /// `now + offer_ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no entry is Free.
    pub fn allocate(&mut self, mac: MacAddr, now: DateTime<Utc>) -> Result<Ipv4Addr> {
        let offer_expiration = now + self.offer_ttl;

        if let Some(owned) = self
            .entries
            .iter_mut()
            .find(|entry| !entry.is_free() && entry.owner_mac == Some(mac))
        {
            if owned.state == EntryState::Offered {
                owned.lease_expiration = Some(offer_expiration);
            }
            return Ok(owned.ip());
        }

        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.is_free())
            .ok_or(Error::PoolExhausted)?;
        entry.reserve(EntryState::Offered, mac, offer_expiration);
        Ok(entry.ip())
    }

    /// Binds `address` to `mac` until `now + lease_duration`.
    ///
    /// Succeeds only if the entry is Offered or Bound and owned by `mac`; a
    /// rejected confirm leaves the pool untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::AddressOutOfRange`] if `address` is not in the pool
    /// - [`Error::BindingRejected`] if the address is not reserved for `mac`
    pub fn confirm(&mut self, mac: MacAddr, address: Ipv4Addr, now: DateTime<Utc>) -> Result<Lease> {
        let index = self
            .index_of(address)
            .ok_or(Error::AddressOutOfRange(address))?;
        let expires_at = now + self.lease_duration;

        let entry = &mut self.entries[index];
        if entry.is_free() || entry.owner_mac != Some(mac) {
            return Err(Error::BindingRejected { mac, address });
        }

        entry.reserve(EntryState::Bound, mac, expires_at);
        Ok(Lease {
            mac,
            address,
            expires_at,
        })
    }

    /// Returns `address` to the free set.
    ///
    /// Releasing a free or out-of-range address is a no-op. Returns the
    /// previous owner when something was actually released.
    pub fn release(&mut self, address: Ipv4Addr) -> Option<MacAddr> {
        let index = self.index_of(address)?;
        let entry = &mut self.entries[index];
        let owner = if entry.is_free() { None } else { entry.owner_mac };
        entry.clear();
        owner
    }

    /// Frees every reserved entry whose expiration is at or before `now`.
    ///
    /// Returns the number of entries reclaimed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut reclaimed = 0;
        for entry in self.entries.iter_mut().filter(|entry| entry.is_expired(now)) {
            entry.clear();
            reclaimed += 1;
        }
        reclaimed
    }

    /// Re-binds journaled leases.
    ///
    /// The last record for an address wins. Records that are expired, out of
    /// range, or whose client already holds an earlier restored address are
    /// skipped. Returns the number of entries restored.
    pub fn restore(&mut self, leases: &[Lease], now: DateTime<Utc>) -> usize {
        let mut latest: HashMap<Ipv4Addr, &Lease> = HashMap::new();
        for lease in leases {
            latest.insert(lease.address, lease);
        }

        let mut current: Vec<&Lease> = latest
            .into_values()
            .filter(|lease| !lease.is_expired(now))
            .collect();
        current.sort_by_key(|lease| u32::from(lease.address));

        let mut restored = 0;
        for lease in current {
            let Some(index) = self.index_of(lease.address) else {
                continue;
            };
            if !self.entries[index].is_free() || self.entry_for(lease.mac).is_some() {
                continue;
            }
            self.entries[index].reserve(EntryState::Bound, lease.mac, lease.expires_at);
            restored += 1;
        }
        restored
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    /// Every Bound entry as a lease record, in address order.
    pub fn leases(&self) -> Vec<Lease> {
        self.entries
            .iter()
            .filter(|entry| entry.state == EntryState::Bound)
            .filter_map(|entry| {
                Some(Lease {
                    mac: entry.owner_mac?,
                    address: entry.ip(),
                    expires_at: entry.lease_expiration?,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_free()).count()
    }

    pub fn bound_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == EntryState::Bound)
            .count()
    }
}

/// Thread-safe handle to a [`Pool`].
///
/// Cloning is cheap; all clones share the same entries.
///
/// # Example
///
/// ```no_run
/// use minidhcp::{AddressPool, MacAddr, ServerConfig};
///
/// # async fn example() -> minidhcp::Result<()> {
/// let pool = AddressPool::from_config(&ServerConfig::default())?;
/// let mac = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
///
/// let address = pool.allocate(mac).await?;
/// let lease = pool.confirm(mac, address).await?;
/// pool.release(lease.address).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AddressPool {
    state: Arc<Mutex<Pool>>,
}

impl AddressPool {
    pub fn new(pool: Pool) -> Self {
        Self {
            state: Arc::new(Mutex::new(pool)),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Pool::from_config(config).map(Self::new)
    }

    /// Locks the pool for a sequence of operations that must not interleave
    /// with other callers, such as a change and the journal line recording it.
    pub async fn lock(&self) -> MutexGuard<'_, Pool> {
        self.state.lock().await
    }

    pub async fn allocate(&self, mac: MacAddr) -> Result<Ipv4Addr> {
        self.state.lock().await.allocate(mac, Utc::now())
    }

    pub async fn confirm(&self, mac: MacAddr, address: Ipv4Addr) -> Result<Lease> {
        self.state.lock().await.confirm(mac, address, Utc::now())
    }

    pub async fn release(&self, address: Ipv4Addr) -> Option<MacAddr> {
        self.state.lock().await.release(address)
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.state.lock().await.sweep(now)
    }

    pub async fn restore(&self, leases: &[Lease]) -> usize {
        self.state.lock().await.restore(leases, Utc::now())
    }

    /// State of the entry owned by `mac`, if it owns one.
    pub async fn state_of(&self, mac: MacAddr) -> Option<(Ipv4Addr, EntryState)> {
        let pool = self.state.lock().await;
        pool.entry_for(mac).map(|entry| (entry.ip(), entry.state))
    }

    /// A copy of every entry, in address order.
    pub async fn snapshot(&self) -> Vec<PoolEntry> {
        self.state.lock().await.entries().to_vec()
    }

    pub async fn leases(&self) -> Vec<Lease> {
        self.state.lock().await.leases()
    }

    pub async fn free_count(&self) -> usize {
        self.state.lock().await.free_count()
    }

    pub async fn bound_count(&self) -> usize {
        self.state.lock().await.bound_count()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }
}
