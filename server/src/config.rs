//! Server configuration.
//!
//! Loaded from a TOML file with option groups for the listener, buffers,
//! hand-off rings and the cuckoo table. Every option has a default so the
//! server can launch without a config file.

use cuckoo_cache::DisplacementPolicy;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

/// Server configuration loaded from a TOML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Detach from the controlling terminal. Accepted for compatibility;
    /// the server logs a notice and stays in the foreground.
    #[serde(default)]
    pub daemonize: bool,

    /// Write the process id here after startup.
    #[serde(default)]
    pub pid_filename: Option<PathBuf>,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub tcp: TcpConfig,

    #[serde(default)]
    pub buf: BufConfig,

    #[serde(default)]
    pub ring: RingConfig,

    #[serde(default)]
    pub array: ArrayConfig,

    #[serde(default)]
    pub cuckoo: CuckooSection,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub time: TimeConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Log destination. Stderr when unset.
    #[serde(default)]
    pub name: Option<PathBuf>,

    /// Log verbosity; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            name: None,
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum requests drained per connection per processing pass.
    #[serde(default = "default_request_poolsize")]
    pub request_poolsize: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_poolsize: default_request_poolsize(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpConfig {
    /// Listener backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Per-worker connection cap.
    #[serde(default = "default_tcp_poolsize")]
    pub poolsize: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
            poolsize: default_tcp_poolsize(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufConfig {
    /// Initial capacity of connection read/write buffers.
    #[serde(default = "default_buf_init_size")]
    pub init_size: usize,

    /// Per-worker free-list cap for recycled buffers.
    #[serde(default = "default_buf_sock_poolsize")]
    pub sock_poolsize: usize,
}

impl Default for BufConfig {
    fn default() -> Self {
        Self {
            init_size: default_buf_init_size(),
            sock_poolsize: default_buf_sock_poolsize(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RingConfig {
    /// Capacity of each acceptor-to-worker hand-off ring.
    #[serde(default = "default_ring_array_cap")]
    pub array_cap: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            array_cap: default_ring_array_cap(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArrayConfig {
    /// Sizing hint for per-worker event batches and connection slabs.
    #[serde(default = "default_array_nelem_delta")]
    pub nelem_delta: usize,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            nelem_delta: default_array_nelem_delta(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CuckooSection {
    /// Fixed slot byte size (header + max key + value).
    #[serde(default = "default_item_size")]
    pub item_size: usize,

    /// Number of slots.
    #[serde(default = "default_nitem")]
    pub nitem: usize,

    /// Victim selection policy: "random" or "expire_first".
    #[serde(default = "default_policy")]
    pub policy: String,

    /// Stamp items with CAS tokens.
    #[serde(default = "default_item_cas")]
    pub item_cas: bool,
}

impl Default for CuckooSection {
    fn default() -> Self {
        Self {
            item_size: default_item_size(),
            nitem: default_nitem(),
            policy: default_policy(),
            item_cas: default_item_cas(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of worker threads (default: number of CPUs).
    pub threads: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeConfig {
    /// Close connections idle for this many seconds; 0 disables the sweep.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u32,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    11211
}

fn default_request_poolsize() -> usize {
    128
}

fn default_backlog() -> u32 {
    1024
}

fn default_tcp_poolsize() -> usize {
    1024
}

fn default_buf_init_size() -> usize {
    16 * 1024
}

fn default_buf_sock_poolsize() -> usize {
    128
}

fn default_ring_array_cap() -> usize {
    1024
}

fn default_array_nelem_delta() -> usize {
    256
}

fn default_item_size() -> usize {
    512
}

fn default_nitem() -> usize {
    64 * 1024
}

fn default_policy() -> String {
    "random".to_string()
}

fn default_item_cas() -> bool {
    true
}

fn default_idle_timeout() -> u32 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemonize: false,
            pid_filename: None,
            log: LogConfig::default(),
            server: ServerConfig::default(),
            tcp: TcpConfig::default(),
            buf: BufConfig::default(),
            ring: RingConfig::default(),
            array: ArrayConfig::default(),
            cuckoo: CuckooSection::default(),
            workers: WorkersConfig::default(),
            time: TimeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.policy()?;

        if self.cuckoo.nitem == 0 {
            return Err("cuckoo.nitem must be nonzero".into());
        }
        if self.tcp.poolsize == 0 {
            return Err("tcp.poolsize must be nonzero".into());
        }
        if self.ring.array_cap == 0 {
            return Err("ring.array_cap must be nonzero".into());
        }
        if self.server.request_poolsize == 0 {
            return Err("server.request_poolsize must be nonzero".into());
        }

        Ok(())
    }

    /// Parsed displacement policy.
    pub fn policy(&self) -> Result<DisplacementPolicy, Box<dyn std::error::Error>> {
        Ok(self.cuckoo.policy.parse::<DisplacementPolicy>()?)
    }

    /// Resolve the bind address. The resolver may yield multiple addrinfos;
    /// the first one wins.
    pub fn bind_addr(&self) -> std::io::Result<SocketAddr> {
        (self.server.host.as_str(), self.server.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no address for {}:{}", self.server.host, self.server.port),
                )
            })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Default configuration template printed by `--print-config`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Cuckoo cache server configuration

# Detach from the controlling terminal (accepted, not performed)
daemonize = false

# Write the process id here after startup
# pid_filename = "/var/run/cuckoo-server.pid"

[log]
# Log destination; stderr when unset. Reopened on SIGTTIN.
# name = "/var/log/cuckoo-server.log"
level = "info"

[server]
host = "0.0.0.0"
port = 11211
# Maximum requests drained per connection per processing pass
request_poolsize = 128

[tcp]
backlog = 1024
# Per-worker connection cap
poolsize = 1024

[buf]
# Initial connection buffer capacity
init_size = 16384
# Per-worker recycled-buffer cap
sock_poolsize = 128

[ring]
# Acceptor-to-worker hand-off ring capacity
array_cap = 1024

[array]
# Per-worker event batch sizing hint
nelem_delta = 256

[cuckoo]
# Fixed slot byte size (header + max key + value)
item_size = 512
# Number of slots; total preallocation is nitem * item_size
nitem = 65536
# Victim selection: "random" or "expire_first"
policy = "random"
# Stamp items with CAS tokens
item_cas = true

[workers]
# Number of worker threads (default: number of CPUs)
# threads = 4

[time]
# Close connections idle for this many seconds; 0 disables
idle_timeout_secs = 300
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 11211);
        assert_eq!(config.cuckoo.item_size, 512);
        assert!(config.cuckoo.item_cas);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.server.port, 11211);
        assert_eq!(config.cuckoo.nitem, 65536);
        assert_eq!(config.time.idle_timeout_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 12321

            [cuckoo]
            policy = "expire_first"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 12321);
        assert_eq!(
            config.policy().unwrap(),
            DisplacementPolicy::ExpireFirst
        );
        assert_eq!(config.tcp.poolsize, 1024);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<Config, _> = toml::from_str("unknown_option = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_policy_rejected() {
        let config: Config = toml::from_str(
            r#"
            [cuckoo]
            policy = "lru"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bind_addr_resolution() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 11211);
    }
}
