//! Configuration handling for the link service.
//!
//! Settings come from the `services.link` section of the shared config file
//! and are then overridden by `LINK_*` environment variables. Link tuning
//! keys are handed to [`LinkConfig::apply_setting`].

use anyhow::{bail, Context, Result};
use link_session::LinkConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "services.link.";
const ENV_PREFIX: &str = "LINK_";

/// Link service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Address to accept the peer on
    pub listen: Option<SocketAddr>,
    /// Address of the peer to dial
    pub connect: Option<SocketAddr>,
    /// Interval between stats reports
    pub stats_interval: Duration,
    /// Reliability and timing settings
    pub link: LinkConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: None,
            connect: None,
            stats_interval: Duration::from_secs(30),
            link: LinkConfig::default(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesSection>,
}

#[derive(Debug, Deserialize)]
struct ServicesSection {
    link: Option<LinkSection>,
}

#[derive(Debug, Deserialize)]
struct LinkSection {
    config: Option<HashMap<String, String>>,
}

impl ServiceConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();
        let path = config_path.as_ref();

        match std::fs::read_to_string(path) {
            Ok(content) => {
                let root: RootConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                config.apply_root_config(root)?;
                info!("Loaded configuration from {:?}", path);
            }
            Err(_) => warn!("Config file {:?} not found, using defaults", path),
        }

        config.apply_overrides(std::env::vars().filter_map(|(var, value)| {
            let name = env_key(&var)?;
            if is_known_setting(&name) {
                Some((name, value))
            } else {
                warn!("Ignoring unrecognized environment variable {}", var);
                None
            }
        }))?;

        config.validate()?;

        info!(
            "Final link configuration: listen={:?}, connect={:?}, base_timeout={:?}, max_attempts={}, heartbeat_interval={:?}",
            config.listen,
            config.connect,
            config.link.base_timeout,
            config.link.max_attempts,
            config.link.heartbeat_interval
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root: RootConfig) -> Result<()> {
        let entries = root
            .services
            .and_then(|services| services.link)
            .and_then(|link| link.config)
            .unwrap_or_default();

        let mut settings: Vec<(String, String)> = entries
            .into_iter()
            .filter_map(|(key, value)| match key.strip_prefix(KEY_PREFIX) {
                Some(name) => Some((name.to_string(), value)),
                None => {
                    warn!("Ignoring configuration key outside {}*: {}", KEY_PREFIX, key);
                    None
                }
            })
            .collect();
        // Deterministic order for error reporting
        settings.sort();

        self.apply_overrides(settings)
    }

    /// Apply `name = value` pairs, where `name` has no `services.link.` prefix
    pub fn apply_overrides<I>(&mut self, settings: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in settings {
            self.apply_setting(&name, &value)
                .with_context(|| format!("invalid setting {}{}", KEY_PREFIX, name))?;
            debug!("Applied setting {} = {}", name, value);
        }
        Ok(())
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.stats_interval.is_zero() {
            bail!("stats_interval must be non-zero");
        }
        self.link.validate().context("invalid link configuration")?;
        Ok(())
    }

    fn apply_setting(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "listen" => self.listen = Some(value.trim().parse()?),
            "connect" => self.connect = Some(value.trim().parse()?),
            "stats_interval" => self.stats_interval = humantime::parse_duration(value.trim())?,
            _ => self.link.apply_setting(name, value)?,
        }

        if self.listen.is_some() && self.connect.is_some() {
            bail!("listen and connect are mutually exclusive");
        }
        Ok(())
    }
}

fn is_known_setting(name: &str) -> bool {
    matches!(name, "listen" | "connect" | "stats_interval") || LinkConfig::SETTINGS.contains(&name)
}

/// Map `LINK_BASE_TIMEOUT` to `base_timeout`
fn env_key(var: &str) -> Option<String> {
    var.strip_prefix(ENV_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.to_ascii_lowercase())
}
