use clap::Parser;
use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Startup parameters exactly as collected from the command line, before any
/// validation has happened.
#[derive(Debug, Clone, Parser)]
#[command(name = "raftcell")]
#[command(about = "Consensus-replicated single-value cell with an HTTP control plane")]
pub struct RawConfig {
    /// IP address or resolvable host name to bind on
    #[arg(short = 'a', long = "bind-address", default_value = "127.0.0.1")]
    pub bind_address: String,

    /// Port on which to bind consensus peer traffic
    #[arg(short = 'r', long = "raft-port", default_value_t = 7000)]
    pub raft_port: u32,

    /// Port on which to bind client HTTP traffic
    #[arg(short = 'p', long = "http-port", default_value_t = 8000)]
    pub http_port: u32,

    /// Directory in which to store the consensus log and snapshots
    #[arg(short = 'd', long = "data-dir", default_value = "raft")]
    pub data_dir: PathBuf,

    /// HTTP address of an existing cluster member to join
    #[arg(long = "join")]
    pub join_address: Option<String>,

    /// Bootstrap a new cluster with this node as the sole voting member
    #[arg(long = "bootstrap")]
    pub bootstrap: bool,
}

/// Fully resolved node configuration. Constructed once at startup and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub raft_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub join_address: Option<String>,
    pub bootstrap: bool,
}

/// A single failed configuration point and why it failed.
#[derive(Debug, Error)]
#[error("{point}: {cause}")]
pub struct ConfigError {
    pub point: &'static str,
    pub cause: String,
}

/// Every configuration failure found in one validation pass, so the operator
/// sees all problems at once instead of fixing them one restart at a time.
#[derive(Debug)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} error(s) occurred:", self.0.len())?;
        for err in &self.0 {
            writeln!(f, "  * {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// Validates and normalizes raw startup parameters. Pure: no directories are
/// created and no sockets are bound here.
pub fn resolve(raw: &RawConfig) -> Result<Config, ConfigErrors> {
    let mut errors = Vec::new();

    let bind_ip = match resolve_bind_address(&raw.bind_address) {
        Ok(ip) => Some(ip),
        Err(cause) => {
            errors.push(ConfigError {
                point: "bind-address",
                cause,
            });
            None
        }
    };

    for (point, port) in [("raft-port", raw.raft_port), ("http-port", raw.http_port)] {
        if !(1..=65535).contains(&port) {
            errors.push(ConfigError {
                point,
                cause: format!("port numbers must be in 1..=65535, got {port}"),
            });
        }
    }

    let data_dir = match absolute_data_dir(&raw.data_dir) {
        Ok(dir) => Some(dir),
        Err(cause) => {
            errors.push(ConfigError {
                point: "data-dir",
                cause,
            });
            None
        }
    };

    match (bind_ip, data_dir) {
        (Some(ip), Some(data_dir)) if errors.is_empty() => Ok(Config {
            raft_addr: SocketAddr::new(ip, raw.raft_port as u16),
            http_addr: SocketAddr::new(ip, raw.http_port as u16),
            data_dir,
            join_address: raw.join_address.clone(),
            bootstrap: raw.bootstrap,
        }),
        _ => Err(ConfigErrors(errors)),
    }
}

fn resolve_bind_address(addr: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(ip);
    }
    // Host-name style specifier: defer to the system resolver.
    match (addr, 0u16).to_socket_addrs() {
        Ok(mut addrs) => addrs
            .next()
            .map(|a| a.ip())
            .ok_or_else(|| format!("cannot resolve address: {addr}")),
        Err(err) => Err(format!("cannot resolve address {addr}: {err}")),
    }
}

fn absolute_data_dir(path: &Path) -> Result<PathBuf, String> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    match std::env::current_dir() {
        Ok(cwd) => Ok(cwd.join(path)),
        Err(err) => Err(format!("cannot determine working directory: {err}")),
    }
}
