//! Pointing the host's resolver configuration at the local proxy.

#[cfg(unix)]
pub mod direct;
#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub mod nm;
pub mod nm_settings;
pub mod noop;
pub mod retry;

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    time::Duration,
};

use hickory_proto::rr::Name;

use crate::common::error::Error;

pub use noop::NoopConfigurator;
pub use retry::{set_dns_with_retry, RetryPolicy};

/// How long a configurator keeps retrying `set_dns` unless told otherwise.
pub const DEFAULT_RECONFIG_TIMEOUT: Duration = Duration::from_secs(1);

/// The desired DNS posture of one interface.
///
/// An empty `match_domains` routes every domain through the nameservers;
/// a non-empty one is split DNS.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct OSConfig {
    pub nameservers: Vec<IpAddr>,
    pub search_domains: Vec<Name>,
    pub match_domains: Vec<Name>,
}

/// Parses `domain` as a fully-qualified name, adding the trailing dot if
/// missing.
pub fn fqdn(domain: &str) -> Result<Name, Error> {
    let domain = domain.trim_end_matches('.');
    Ok(Name::from_ascii(format!("{}.", domain))?)
}

impl OSConfig {
    pub fn new(nameservers: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            nameservers: nameservers.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_search_domains<'a>(
        mut self,
        domains: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, Error> {
        for d in domains {
            self.search_domains.push(fqdn(d)?);
        }
        Ok(self)
    }

    pub fn with_match_domains<'a>(
        mut self,
        domains: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, Error> {
        for d in domains {
            self.match_domains.push(fqdn(d)?);
        }
        Ok(self)
    }

    pub fn is_split_dns(&self) -> bool {
        !self.match_domains.is_empty()
    }

    /// Deduplicated IPv4 nameservers, IPv4-mapped IPv6 included.
    pub fn ipv4_nameservers(&self) -> Vec<Ipv4Addr> {
        let mut seen = HashSet::new();
        self.nameservers
            .iter()
            .filter_map(|ip| match ip.to_canonical() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .filter(|ip| seen.insert(*ip))
            .collect()
    }

    pub fn ipv6_nameservers(&self) -> Vec<Ipv6Addr> {
        let mut seen = HashSet::new();
        self.nameservers
            .iter()
            .filter_map(|ip| match ip.to_canonical() {
                IpAddr::V6(v6) => Some(v6),
                IpAddr::V4(_) => None,
            })
            .filter(|ip| seen.insert(*ip))
            .collect()
    }

    /// The combined search list: search domains, then `~`-prefixed match
    /// domains, then `~.` when nothing is split. A domain is emitted once,
    /// in the form it was first seen.
    pub fn search_list(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut search = Vec::new();
        for dom in &self.search_domains {
            if seen.insert(dom.to_lowercase()) {
                search.push(dom.to_string());
            }
        }
        for dom in &self.match_domains {
            if seen.insert(dom.to_lowercase()) {
                search.push(format!("~{}", dom));
            }
        }
        if self.match_domains.is_empty() {
            search.push("~.".to_owned());
        }
        search
    }
}

/// Relative preference of a connection's DNS servers. Lower wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DnsPriority {
    /// Overrides every other connection.
    Highest = i32::MIN,
    /// Strongest priority that does not hard-override.
    Medium = 1,
    /// Below all built-in automatic priorities.
    Lower = 200,
}

impl DnsPriority {
    pub fn compute(family_nameservers: usize, split_dns: bool) -> Self {
        match (family_nameservers, split_dns) {
            (0, _) => DnsPriority::Lower,
            (_, true) => DnsPriority::Medium,
            (_, false) => DnsPriority::Highest,
        }
    }

    pub fn value(self) -> i32 {
        self as i32
    }
}

/// Applies DNS settings to one interface through a platform mechanism.
pub trait OSConfigurator: Send + Sync {
    /// Makes one attempt at applying `config`. Callers that expect the
    /// interface to come up late wrap this in [`set_dns_with_retry`].
    fn set_dns(&self, config: &OSConfig) -> Result<(), Error>;

    fn close(&self) -> Result<(), Error>;

    fn mode(&self) -> &'static str;

    fn reconfig_timeout(&self) -> Duration {
        DEFAULT_RECONFIG_TIMEOUT
    }
}

/// Picks the configurator suited to this host for `interface`.
#[cfg(target_os = "linux")]
pub fn new_os_configurator(interface: &str) -> Result<Box<dyn OSConfigurator>, Error> {
    linux::new_os_configurator(interface)
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn new_os_configurator(interface: &str) -> Result<Box<dyn OSConfigurator>, Error> {
    tracing::info!(interface, "dns: using direct mode");
    Ok(Box::new(direct::DirectManager::new()))
}

#[cfg(not(unix))]
pub fn new_os_configurator(interface: &str) -> Result<Box<dyn OSConfigurator>, Error> {
    tracing::warn!(interface, "dns: os configuration is not supported, using noop mode");
    Ok(Box::new(NoopConfigurator))
}
