//! Attaching to the compute cluster
//!
//! The worker pool is DataFusion's partition pool: every scan, join and
//! aggregate in a session is spread over `workers` partitions on the tokio
//! runtime. When a scheduler address is configured (directly or through a
//! scheduler file) it must be reachable before the session is created.

use datafusion::prelude::{SessionConfig, SessionContext};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::info;

use crate::error::{Error, Result};

pub const DEFAULT_INTERFACE: &str = "eth0";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// `tcp://host:port` or `host:port`
    pub scheduler_address: Option<String>,
    /// JSON file written by the scheduler, holding its address
    pub scheduler_file: Option<PathBuf>,
    pub workers: usize,
    pub interface: String,
    pub connect_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            scheduler_address: None,
            scheduler_file: None,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            interface: DEFAULT_INTERFACE.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Scheduler file contents
///
/// ```json
/// {"type": "Scheduler", "address": "tcp://10.0.0.1:8786", "workers": {}}
/// ```
#[derive(Debug, Deserialize)]
struct SchedulerFile {
    address: String,
}

/// Handle to an attached cluster
#[derive(Clone)]
pub struct ClusterConnection {
    ctx: SessionContext,
    address: Option<String>,
    workers: usize,
    interface: String,
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("session_id", &self.ctx.session_id())
            .field("address", &self.address)
            .field("workers", &self.workers)
            .field("interface", &self.interface)
            .finish()
    }
}

impl ClusterConnection {
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

/// Strip the `tcp://` scheme, leaving `host:port`
fn socket_address(address: &str) -> &str {
    address.strip_prefix("tcp://").unwrap_or(address)
}

fn resolve_address(config: &ClusterConfig) -> Result<Option<String>> {
    if let Some(address) = &config.scheduler_address {
        return Ok(Some(address.clone()));
    }

    match &config.scheduler_file {
        Some(path) => {
            let contents = fs::read_to_string(path).map_err(|e| {
                Error::Connection(format!(
                    "cannot read scheduler file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let file: SchedulerFile = serde_json::from_str(&contents).map_err(|e| {
                Error::Connection(format!(
                    "invalid scheduler file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(Some(file.address))
        }
        None => Ok(None),
    }
}

async fn probe(address: &str, timeout: Duration) -> Result<()> {
    let target = socket_address(address);
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(Error::Connection(format!(
            "scheduler {} unreachable: {}",
            address, e
        ))),
        Err(_) => Err(Error::Connection(format!(
            "timed out after {:?} connecting to scheduler {}",
            timeout, address
        ))),
    }
}

/// Attach to the cluster described by `config`.
pub async fn connect(config: &ClusterConfig) -> Result<ClusterConnection> {
    if config.workers == 0 {
        return Err(Error::Connection(
            "worker pool must have at least one worker".to_string(),
        ));
    }
    if config.interface.trim().is_empty() {
        return Err(Error::Connection("network interface is empty".to_string()));
    }

    let address = resolve_address(config)?;
    if let Some(address) = &address {
        probe(address, config.connect_timeout).await?;
    }

    let session_config = SessionConfig::new().with_target_partitions(config.workers);
    let ctx = SessionContext::new_with_config(session_config);

    info!(
        workers = config.workers,
        interface = %config.interface,
        scheduler = address.as_deref().unwrap_or("local"),
        "attached to cluster"
    );

    Ok(ClusterConnection {
        ctx,
        address,
        workers: config.workers,
        interface: config.interface.clone(),
    })
}
