//! Worker Flavors
//!
//! Convenience constructors for the worker roles used in integration tests.
//! A flavor only differs in executable, config file, arguments and the set
//! of events it watches for; everything else is a plain [`ProcessConfig`].
//!
//! [`ProcessConfig`]: super::ProcessConfig

use std::fmt;
use std::str::FromStr;

use super::builder::ProcessConfigBuilder;
use super::patterns::{CACHE_PUBLISHED, INDEX_KEY_INSERTED, TCP_LISTENING, TUNNEL_ESTABLISHED};
use super::settings::HarnessSettings;
use crate::error::{HarnessError, HarnessResult};

pub const CLIENT_CONFIG_FILE: &str = "client.conf";
pub const CLIENT_CONFIG_CONTENT: &str = "open-file-limit = 4096\n";
pub const INJECTOR_CONFIG_FILE: &str = "injector.conf";
pub const INJECTOR_CONFIG_CONTENT: &str = "open-file-limit = 32768\n";
pub const I2P_PRIVATE_KEY_PATH: &str = "i2p/i2p-private-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Proxy-side worker the browser talks to
    Client,
    /// Server-side worker that fetches and injects content
    Injector,
}

impl WorkerRole {
    pub fn executable_name(&self) -> &'static str {
        match self {
            WorkerRole::Client => "client",
            WorkerRole::Injector => "injector",
        }
    }

    pub fn config_file_name(&self) -> &'static str {
        match self {
            WorkerRole::Client => CLIENT_CONFIG_FILE,
            WorkerRole::Injector => INJECTOR_CONFIG_FILE,
        }
    }

    pub fn config_file_content(&self) -> &'static str {
        match self {
            WorkerRole::Client => CLIENT_CONFIG_CONTENT,
            WorkerRole::Injector => INJECTOR_CONFIG_CONTENT,
        }
    }

    fn default_args(&self) -> &'static [&'static str] {
        match self {
            WorkerRole::Client => &["--allow-private-targets"],
            WorkerRole::Injector => &["--allow-private-targets", "--log-level", "SILLY"],
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable_name())
    }
}

impl FromStr for WorkerRole {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(WorkerRole::Client),
            "injector" => Ok(WorkerRole::Injector),
            other => Err(HarnessError::config(
                "role",
                format!("unknown worker role '{other}' (expected client or injector)"),
            )),
        }
    }
}

/// Base configuration shared by every flavor of `role`
pub fn worker(settings: &HarnessSettings, role: WorkerRole, app_name: &str) -> HarnessResult<ProcessConfigBuilder> {
    let executable = settings.worker_executable(role.executable_name())?;

    Ok(settings
        .process(app_name)
        .executable(executable)
        .config_file(role.config_file_name(), role.config_file_content())
        .args(role.default_args().iter().copied())
        .env("MALLOC_CHECK_", "2")
        .event_pattern(TCP_LISTENING))
}

pub fn client(settings: &HarnessSettings, app_name: &str) -> HarnessResult<ProcessConfigBuilder> {
    worker(settings, WorkerRole::Client, app_name)
}

/// Client that stores what it fetches in the distributed cache
pub fn cache_client(settings: &HarnessSettings, app_name: &str) -> HarnessResult<ProcessConfigBuilder> {
    Ok(client(settings, app_name)?.event_pattern(CACHE_PUBLISHED))
}

/// Client reaching its injector over an anonymizing tunnel
pub fn i2p_client(settings: &HarnessSettings, app_name: &str) -> HarnessResult<ProcessConfigBuilder> {
    Ok(client(settings, app_name)?.event_pattern(TUNNEL_ESTABLISHED))
}

pub fn injector(settings: &HarnessSettings, app_name: &str) -> HarnessResult<ProcessConfigBuilder> {
    worker(settings, WorkerRole::Injector, app_name)
}

/// Injector that signs and announces responses to the cache index
pub fn cache_injector(settings: &HarnessSettings, app_name: &str) -> HarnessResult<ProcessConfigBuilder> {
    Ok(injector(settings, app_name)?
        .event_pattern(CACHE_PUBLISHED)
        .event_pattern(INDEX_KEY_INSERTED))
}

/// Injector listening on an anonymizing tunnel with a persistent identity
pub fn i2p_injector(
    settings: &HarnessSettings,
    app_name: &str,
    private_key: &str,
) -> HarnessResult<ProcessConfigBuilder> {
    Ok(injector(settings, app_name)?
        .event_pattern(TUNNEL_ESTABLISHED)
        .seed_file(I2P_PRIVATE_KEY_PATH, private_key))
}
