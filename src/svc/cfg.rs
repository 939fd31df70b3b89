//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{convert::TryFrom, env, path::PathBuf, time::Duration};

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_PARTITION: &str = "aws";

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load file '{0:?}', {1}")]
    File(PathBuf, ConfigError),
    #[error("failed to build configuration, {0}")]
    Build(ConfigError),
    #[error("failed to load configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
}

// -----------------------------------------------------------------------------
// CachePolicy enum

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum CachePolicy {
    #[serde(rename = "enabled")]
    #[default]
    Enabled,
    #[serde(rename = "disabled")]
    Disabled,
}

// -----------------------------------------------------------------------------
// Identity structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Identity {
    /// account identifier to use instead of asking the identity api
    #[serde(rename = "account", default)]
    pub account: Option<String>,
    #[serde(rename = "cache", default)]
    pub cache: CachePolicy,
    /// time to live of a cached account identifier, in seconds, a missing
    /// value keeps it for the lifetime of the context
    #[serde(rename = "ttl", default)]
    pub ttl: Option<u64>,
}

impl Identity {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "regions", default)]
    pub regions: Vec<String>,
    #[serde(rename = "partition")]
    pub partition: String,
    #[serde(rename = "identity", default)]
    pub identity: Identity,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            regions: vec![],
            partition: DEFAULT_PARTITION.to_string(),
            identity: Identity::default(),
        }
    }
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::builder()?
            .add_source(File::from(path.to_owned()).required(true))
            .build()
            .map_err(|err| Error::File(path, err))?
            .try_deserialize()
            .map_err(Error::Cast)
    }
}

impl Configuration {
    fn builder() -> Result<ConfigBuilder<DefaultState>, Error> {
        Ok(Config::builder()
            .set_default("partition", DEFAULT_PARTITION)
            .map_err(|err| Error::Default("partition".into(), err))?
            .set_default("regions", Vec::<String>::new())
            .map_err(|err| Error::Default("regions".into(), err))?
            .set_default("identity.cache", "enabled")
            .map_err(|err| Error::Default("identity.cache".into(), err))?
            .add_source(
                Environment::with_prefix(&env!("CARGO_PKG_NAME").replace('-', "_"))
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("regions")
                    .try_parsing(true),
            ))
    }

    #[cfg_attr(feature = "trace", tracing::instrument)]
    pub fn try_default() -> Result<Self, Error> {
        let mut paths = vec![
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
        ];

        if let Some(home) = env::var_os("HOME") {
            let home = PathBuf::from(home);

            paths.push(home.join(format!(".config/{}/config", env!("CARGO_PKG_NAME"))));
            paths.push(home.join(format!(".local/share/{}/config", env!("CARGO_PKG_NAME"))));
        }

        paths.push(PathBuf::from("config"));

        paths
            .into_iter()
            .fold(Self::builder()?, |builder, path| {
                builder.add_source(File::from(path).required(false))
            })
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Cast)
    }

    /// log hints about the loaded configuration
    pub fn help(&self) {
        if self.regions.is_empty() {
            warn!("No region is configured, enumeration of live instances will return nothing");
        }

        if let Some(account) = &self.identity.account {
            info!(
                account = account.as_str(),
                "Use the configured account identifier, identity api will not be queried"
            );
        }
    }
}
