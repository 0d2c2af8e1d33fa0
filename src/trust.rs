//! Single-instance bookkeeping for the local port.
//!
//! A run records the port it serves on (and its pid) in a small JSON file.
//! The next run first asks that port whether an instance is still answering;
//! if one is, the new process leaves without starting a second server.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::error::Result;
use crate::settings::persist;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub port: u16,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct PortTrust {
    path: PathBuf,
    route: String,
    preferred: Option<u16>,
}

impl PortTrust {
    /// `route` is the page probed on a recorded port to decide whether it
    /// belongs to a live instance.
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, route: S, preferred: Option<u16>) -> Self {
        Self {
            path: path.into(),
            route: route.into(),
            preferred,
        }
    }

    pub fn recorded(&self) -> Option<PortRecord> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Whether an instance already answers on the recorded port.
    pub async fn deep_check(&self) -> bool {
        let Some(record) = self.recorded() else {
            return false;
        };

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
        {
            Ok(client) => client,
            Err(_) => return false,
        };

        match client
            .get(format!("http://127.0.0.1:{}{}", record.port, self.route))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                log::info!(
                    "An instance (pid {}) already answers on port {}",
                    record.pid,
                    record.port
                );
                true
            }
            _ => false,
        }
    }

    /// Bind the recorded port if it is free, then the preferred one, then
    /// whatever the OS hands out.
    pub async fn bind(&self) -> Result<TcpListener> {
        let candidates = self
            .recorded()
            .map(|record| record.port)
            .into_iter()
            .chain(self.preferred)
            .chain(std::iter::once(0));

        let mut last = None;
        for port in candidates {
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => return Ok(listener),
                Err(err) => {
                    log::debug!("Port {port} unavailable: {err}");
                    last = Some(err);
                }
            }
        }

        Err(last
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no port available"))
            .into())
    }

    /// Record `port` as owned by this process until the lease is dropped.
    pub fn acquire(&self, port: u16) -> Result<PortLease> {
        let record = PortRecord {
            port,
            pid: std::process::id(),
        };
        persist(&self.path, serde_json::to_string(&record)?.as_bytes())?;
        log::debug!("Recorded port {port} in {}", self.path.display());

        Ok(PortLease {
            trust: self.clone(),
            record,
        })
    }
}

/// Ownership of the recorded port for the lifetime of the server.
#[derive(Debug)]
pub struct PortLease {
    trust: PortTrust,
    record: PortRecord,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.record.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        // Another run may have taken over the record in the meantime.
        if self.trust.recorded() == Some(self.record) {
            if let Err(err) = std::fs::remove_file(&self.trust.path) {
                log::warn!("Failed to release port record: {err}");
            }
        }
    }
}
