// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server configuration. Everything outside the wire protocol lives here:
//! listen address, minor-version window, lease and reaper intervals, slot
//! caps and the backchannel delivery budget.

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionLimits,
    #[serde(default)]
    pub backchannel: BackchannelConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP accept loop binds, e.g. `0.0.0.0:2049`.
    pub listen: String,
    /// Accepted COMPOUND minor-version window.
    #[serde(default)]
    pub min_minor_version: u32,
    #[serde(default = "default_max_minor")]
    pub max_minor_version: u32,
    /// Lease interval granted to clients; SEQUENCE renews it implicitly.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
    /// How often the reaper scans for expired clients.
    #[serde(default = "default_reaper_seconds")]
    pub reaper_interval_seconds: u64,
    /// Per-record I/O timeout once a record has started arriving. Idle
    /// waiting for the next record is unbounded.
    #[serde(default = "default_io_timeout_seconds")]
    pub io_timeout_seconds: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SessionLimits {
    /// Server-side cap on negotiated fore-channel slot counts.
    pub max_fore_slots: u32,
    /// Server-side cap on negotiated back-channel slot counts.
    pub max_back_slots: u32,
    /// Cap on `ca_maxrequestsize` / `ca_maxresponsesize`.
    pub max_request_bytes: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_fore_slots: 64,
            max_back_slots: 8,
            max_request_bytes: 1 << 20,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BackchannelConfig {
    /// Bounded callback queue depth per session; enqueue past it fails
    /// with a queue-full error rather than blocking the recall trigger.
    pub queue_depth: usize,
    /// Per-attempt wait for the client's CB_COMPOUND reply.
    pub reply_timeout_seconds: u64,
    /// Backed-off retries after the initial send; the backchannel fault
    /// is declared once the last retry fails.
    pub retry_attempts: u32,
    /// Backoff before the first retry; doubles per retry, so the default
    /// budget of 3 waits 5 s, 10 s and 20 s.
    pub retry_backoff_seconds: u64,
}

impl Default for BackchannelConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            reply_timeout_seconds: 10,
            retry_attempts: 3,
            retry_backoff_seconds: 5,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(&path).with_context(|| {
            format!("failed to read config {}", path.as_ref().display())
        })?;
        let cfg: Self = serde_yaml::from_str(&raw).with_context(|| {
            format!("failed to parse config {}", path.as_ref().display())
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.server.min_minor_version <= self.server.max_minor_version,
            "minor version window is inverted"
        );
        ensure!(self.server.max_minor_version <= 1, "only minor versions 0 and 1 exist here");
        ensure!(self.sessions.max_fore_slots > 0, "need at least one fore slot");
        ensure!(self.backchannel.retry_attempts > 0, "retry_attempts must be > 0");
        Ok(())
    }

    #[inline]
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.server.lease_seconds)
    }

    #[inline]
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.server.reaper_interval_seconds)
    }

    #[inline]
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.server.io_timeout_seconds)
    }

    #[inline]
    pub fn cb_reply_timeout(&self) -> Duration {
        Duration::from_secs(self.backchannel.reply_timeout_seconds)
    }

    #[inline]
    pub fn cb_backoff(&self) -> Duration {
        Duration::from_secs(self.backchannel.retry_backoff_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen: "127.0.0.1:2049".to_string(),
                min_minor_version: 0,
                max_minor_version: 1,
                lease_seconds: default_lease_seconds(),
                reaper_interval_seconds: default_reaper_seconds(),
                io_timeout_seconds: default_io_timeout_seconds(),
            },
            sessions: SessionLimits::default(),
            backchannel: BackchannelConfig::default(),
        }
    }
}

fn default_max_minor() -> u32 {
    1
}

fn default_lease_seconds() -> u64 {
    90
}

fn default_reaper_seconds() -> u64 {
    15
}

fn default_io_timeout_seconds() -> u64 {
    30
}
