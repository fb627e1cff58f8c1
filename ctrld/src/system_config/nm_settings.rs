//! Typed view of the NetworkManager connection properties touched when
//! pointing an interface at the proxy. Converted to the D-Bus variant map
//! only at the IPC boundary.

use std::net::{IpAddr, Ipv6Addr};

use super::{DnsPriority, OSConfig};

/// Properties NetworkManager returns from `GetAppliedConnection` but
/// rejects on `Reapply`. Their content is carried by `address-data`.
pub const DEPRECATED_PROPERTIES: [&str; 2] = ["addresses", "routes"];

pub const IPV6_METHOD_AUTO: &str = "auto";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4DnsSection {
    /// Addresses as host-endian integers of the network-order octets.
    pub dns: Vec<u32>,
    pub dns_search: Vec<String>,
    pub dns_priority: DnsPriority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6DnsSection {
    pub method: &'static str,
    /// Addresses currently on the interface, restaged as /128s.
    pub address_data: Vec<Ipv6Addr>,
    pub ignore_auto_routes: bool,
    pub ignore_auto_dns: bool,
    pub never_default: bool,
    pub dns: Vec<[u8; 16]>,
    pub dns_search: Vec<String>,
    pub dns_priority: DnsPriority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmDnsSettings {
    pub ipv4: Ipv4DnsSection,
    pub ipv6: Ipv6DnsSection,
}

impl NmDnsSettings {
    /// `live_addrs` are the addresses currently assigned to the interface;
    /// only the IPv6 ones are kept.
    pub fn new(config: &OSConfig, live_addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        let dns_v4: Vec<u32> = config
            .ipv4_nameservers()
            .iter()
            .map(|ip| u32::from_ne_bytes(ip.octets()))
            .collect();
        let dns_v6: Vec<[u8; 16]> = config
            .ipv6_nameservers()
            .iter()
            .map(|ip| ip.octets())
            .collect();
        let address_data = live_addrs
            .into_iter()
            .filter_map(|ip| match ip.to_canonical() {
                IpAddr::V6(v6) => Some(v6),
                IpAddr::V4(_) => None,
            })
            .collect();

        let search = config.search_list();
        let split = config.is_split_dns();

        Self {
            ipv4: Ipv4DnsSection {
                dns_priority: DnsPriority::compute(dns_v4.len(), split),
                dns: dns_v4,
                dns_search: search.clone(),
            },
            ipv6: Ipv6DnsSection {
                method: IPV6_METHOD_AUTO,
                address_data,
                ignore_auto_routes: true,
                ignore_auto_dns: true,
                never_default: true,
                dns_priority: DnsPriority::compute(dns_v6.len(), split),
                dns: dns_v6,
                dns_search: search,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn single_ipv4_full_routing() {
        let config = OSConfig::new(["10.0.0.1".parse().unwrap()]);
        let settings = NmDnsSettings::new(&config, []);

        assert_eq!(
            settings.ipv4,
            Ipv4DnsSection {
                dns: vec![u32::from_ne_bytes([10, 0, 0, 1])],
                dns_search: vec!["~.".to_owned()],
                dns_priority: DnsPriority::Highest,
            }
        );
        assert!(settings.ipv6.dns.is_empty());
        assert_eq!(settings.ipv6.dns_priority, DnsPriority::Lower);
        assert_eq!(settings.ipv6.dns_search, vec!["~."]);
    }

    #[test]
    fn ipv6_section_flags_and_addresses() {
        let config = OSConfig::new(["2001:db8::53".parse().unwrap()])
            .with_match_domains(["corp.example"])
            .unwrap();
        let live: Vec<IpAddr> = vec![
            Ipv4Addr::new(192, 168, 1, 20).into(),
            "2001:db8::20".parse().unwrap(),
            "fe80::1".parse().unwrap(),
        ];
        let settings = NmDnsSettings::new(&config, live);

        let v6 = &settings.ipv6;
        assert_eq!(v6.method, "auto");
        assert!(v6.ignore_auto_routes && v6.ignore_auto_dns && v6.never_default);
        assert_eq!(
            v6.address_data,
            vec![
                "2001:db8::20".parse::<Ipv6Addr>().unwrap(),
                "fe80::1".parse().unwrap()
            ]
        );
        assert_eq!(
            v6.dns,
            vec!["2001:db8::53".parse::<Ipv6Addr>().unwrap().octets()]
        );
        assert_eq!(v6.dns_priority, DnsPriority::Medium);
        assert_eq!(v6.dns_search, vec!["~corp.example."]);

        assert!(settings.ipv4.dns.is_empty());
        assert_eq!(settings.ipv4.dns_priority, DnsPriority::Lower);
    }
}
