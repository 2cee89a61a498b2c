use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mac::MacAddr;
use crate::pool::MAX_POOL_SIZE;

/// Well-known server port.
pub const SERVER_PORT: u16 = 67;

/// Well-known client port, used when the client binds a fixed port.
pub const CLIENT_PORT: u16 = 68;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: Ipv4Addr,
    pub port: u16,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub domain_name: String,
    pub lease_seconds: u32,
    /// How long an Offer reserves its address while waiting for a Request.
    pub offer_ttl_seconds: u32,
    /// Upper bound on concurrently running message handlers.
    pub max_workers: usize,
    /// Idle wake-up period of the dispatcher; every wake runs a sweep.
    pub sweep_interval_millis: u64,
    /// Optional lease journal. Absent means leases live only in memory.
    pub leases_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: Ipv4Addr::UNSPECIFIED,
            port: SERVER_PORT,
            pool_start: Ipv4Addr::new(192, 168, 1, 10),
            pool_end: Ipv4Addr::new(192, 168, 1, 19),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            dns_server: Ipv4Addr::new(8, 8, 8, 8),
            domain_name: "example.local".to_string(),
            lease_seconds: 120,
            offer_ttl_seconds: 60,
            max_workers: 10,
            sweep_interval_millis: 1000,
            leases_file: None,
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);

        if start > end {
            return Err(Error::InvalidConfig(
                "pool_start must be less than or equal to pool_end".to_string(),
            ));
        }

        if self.pool_size() > MAX_POOL_SIZE {
            return Err(Error::InvalidConfig(format!(
                "pool holds {} addresses, maximum is {}",
                self.pool_size(),
                MAX_POOL_SIZE
            )));
        }

        if self.ip_in_pool(self.gateway) {
            return Err(Error::InvalidConfig(
                "gateway must not be within the pool range".to_string(),
            ));
        }

        if self.lease_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_seconds must be greater than 0".to_string(),
            ));
        }

        if self.offer_ttl_seconds == 0 {
            return Err(Error::InvalidConfig(
                "offer_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.max_workers == 0 {
            return Err(Error::InvalidConfig(
                "max_workers must be greater than 0".to_string(),
            ));
        }

        if self.sweep_interval_millis == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_millis must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn ip_in_pool(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);
        addr >= start && addr <= end
    }

    pub fn pool_size(&self) -> u64 {
        u64::from(u32::from(self.pool_end)) - u64::from(u32::from(self.pool_start)) + 1
    }

    pub fn listen_socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.listen_address, self.port))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_millis)
    }
}

/// Client-side settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    /// Local address; port 0 picks an ephemeral port.
    pub bind: SocketAddr,
    pub mac: MacAddr,
    pub max_renewals: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from((Ipv4Addr::LOCALHOST, SERVER_PORT)),
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            mac: MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            max_renewals: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_start_greater_than_end() {
        let config = ServerConfig {
            pool_start: Ipv4Addr::new(192, 168, 1, 200),
            pool_end: Ipv4Addr::new(192, 168, 1, 100),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_in_pool() {
        let config = ServerConfig {
            gateway: Ipv4Addr::new(192, 168, 1, 15),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        let zero_lease = ServerConfig {
            lease_seconds: 0,
            ..Default::default()
        };
        let zero_ttl = ServerConfig {
            offer_ttl_seconds: 0,
            ..Default::default()
        };
        let zero_workers = ServerConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(zero_lease.validate().is_err());
        assert!(zero_ttl.validate().is_err());
        assert!(zero_workers.validate().is_err());
    }

    #[test]
    fn test_pool_size() {
        let config = ServerConfig::default();
        assert_eq!(config.pool_size(), 10);

        let whole = ServerConfig {
            pool_start: Ipv4Addr::new(0, 0, 0, 0),
            pool_end: Ipv4Addr::new(255, 255, 255, 255),
            ..Default::default()
        };
        assert_eq!(whole.pool_size(), 1 << 32);
        assert!(whole.validate().is_err());
    }

    #[test]
    fn test_oversized_pool_rejected() {
        let half_space = ServerConfig {
            pool_start: Ipv4Addr::new(0, 0, 0, 0),
            pool_end: Ipv4Addr::new(127, 255, 255, 255),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            ..Default::default()
        };
        assert!(matches!(half_space.validate(), Err(Error::InvalidConfig(_))));

        let slash_16 = ServerConfig {
            pool_start: Ipv4Addr::new(10, 0, 0, 0),
            pool_end: Ipv4Addr::new(10, 0, 255, 255),
            ..Default::default()
        };
        assert!(slash_16.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"pool_start":"10.0.0.5","pool_end":"10.0.0.9"}"#).unwrap();
        assert_eq!(config.pool_start, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(config.lease_seconds, 120);
        assert_eq!(config.port, SERVER_PORT);
    }

    #[test]
    fn test_save_and_load() {
        struct TestGuard(&'static str);
        impl Drop for TestGuard {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(self.0);
            }
        }

        let path = "test_config_save_load.json";
        let _guard = TestGuard(path);
        let config = ServerConfig {
            lease_seconds: 300,
            leases_file: Some("leases.jsonl".to_string()),
            ..Default::default()
        };
        config.save(path).unwrap();

        let loaded = ServerConfig::load(path).unwrap();
        assert_eq!(loaded.lease_seconds, 300);
        assert_eq!(loaded.leases_file.as_deref(), Some("leases.jsonl"));
    }
}
