use std::{
    collections::BTreeMap,
    fmt,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::error::Error;

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DNS_PORT: u16 = 53;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResolverType {
    Doh,
    Doh3,
    Legacy,
}

impl fmt::Display for ResolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverType::Doh => write!(f, "doh"),
            ResolverType::Doh3 => write!(f, "doh3"),
            ResolverType::Legacy => write!(f, "legacy"),
        }
    }
}

/// One upstream resolution target.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, derive_builder::Builder)]
pub struct UpstreamConfig {
    #[builder(setter(into), default)]
    #[serde(default)]
    name: String,

    #[serde(rename = "type")]
    resolver_type: ResolverType,

    #[builder(setter(into))]
    endpoint: String,

    /// Pins the endpoint host to this address instead of asking the OS resolver.
    #[builder(setter(strip_option), default)]
    #[serde(default)]
    bootstrap_ip: Option<IpAddr>,

    #[builder(setter(strip_option), default)]
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl UpstreamConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolver_type(&self) -> ResolverType {
        self.resolver_type
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn bootstrap_ip(&self) -> Option<IpAddr> {
        self.bootstrap_ip
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_UPSTREAM_TIMEOUT)
    }

    /// Parses the endpoint of a DoH/DoH3 upstream.
    pub fn endpoint_url(&self) -> Result<url::Url, Error> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", self.endpoint, e)))?;
        match url.scheme() {
            "https" | "http" => {}
            scheme => {
                return Err(Error::InvalidUrl(format!(
                    "{}: unsupported scheme {} for {} upstream",
                    self.endpoint, scheme, self.resolver_type
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(Error::InvalidUrl(format!("{}: missing host", self.endpoint)));
        }
        Ok(url)
    }

    /// Parses the endpoint of a legacy upstream, `ip` or `ip:port`.
    pub fn legacy_addr(&self) -> Result<SocketAddr, Error> {
        if let Ok(addr) = self.endpoint.parse::<SocketAddr>() {
            return Ok(addr);
        }
        self.endpoint
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
            .map_err(|_| {
                Error::InvalidUrl(format!(
                    "{}: legacy upstream expects ip or ip:port",
                    self.endpoint
                ))
            })
    }

    pub fn validate(&self) -> Result<(), Error> {
        match self.resolver_type {
            ResolverType::Doh | ResolverType::Doh3 => self.endpoint_url().map(|_| ()),
            ResolverType::Legacy => self.legacy_addr().map(|_| ()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, derive_builder::Builder)]
pub struct OsDnsConfig {
    #[builder(setter(into))]
    interface: String,

    #[builder(setter(strip_option), default)]
    #[serde(default, with = "humantime_serde")]
    reconfig_timeout: Option<Duration>,
}

impl OsDnsConfig {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn reconfig_timeout(&self) -> Option<Duration> {
        self.reconfig_timeout
    }
}

pub trait LoggingConfigLoader {
    fn get_file_logger_config(&self) -> FileLoggerConfig;

    fn get_console_logger_config(&self) -> ConsoleLoggerConfig;
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct FileLoggerConfig {
    pub level: Option<String>,
    pub file: Option<String>,
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct ConsoleLoggerConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default, derive_builder::Builder)]
pub struct LoggingConfig {
    #[builder(setter(into, strip_option), default = None)]
    #[serde(default)]
    file_logger: Option<FileLoggerConfig>,
    #[builder(setter(into, strip_option), default = None)]
    #[serde(default)]
    console_logger: Option<ConsoleLoggerConfig>,
}

impl LoggingConfigLoader for &LoggingConfig {
    fn get_file_logger_config(&self) -> FileLoggerConfig {
        self.file_logger.clone().unwrap_or_default()
    }

    fn get_console_logger_config(&self) -> ConsoleLoggerConfig {
        self.console_logger.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub upstream: BTreeMap<String, UpstreamConfig>,
    #[serde(default)]
    pub os_dns: Option<OsDnsConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Parses an embedded TOML document. Upstreams without an explicit
    /// name take their table key.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let mut config: Config = toml::from_str(text).map_err(anyhow::Error::from)?;
        for (key, upstream) in config.upstream.iter_mut() {
            if upstream.name.is_empty() {
                upstream.name = key.clone();
            }
            upstream.validate()?;
        }
        Ok(config)
    }
}
