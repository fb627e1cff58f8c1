use std::{collections::HashMap, net::IpAddr, time::Duration};

use dbus::{
    arg::{PropMap, RefArg, Variant},
    blocking::Connection,
    Path,
};
use network_interface::{NetworkInterface, NetworkInterfaceConfig as _};

use super::{
    nm_settings::{NmDnsSettings, DEPRECATED_PROPERTIES},
    OSConfig, OSConfigurator,
};
use crate::common::error::Error;

const NM_BUS_NAME: &str = "org.freedesktop.NetworkManager";
const NM_OBJECT_PATH: &str = "/org/freedesktop/NetworkManager";
const NM_INTERFACE: &str = "org.freedesktop.NetworkManager";
const NM_DEVICE_INTERFACE: &str = "org.freedesktop.NetworkManager.Device";

/// `section -> property -> variant`, as exchanged with NetworkManager.
pub type ConnectionSettings = HashMap<String, PropMap>;

fn variant<T: RefArg + 'static>(v: T) -> Variant<Box<dyn RefArg>> {
    Variant(Box::new(v))
}

/// Writes `dns` into the applied connection `settings`. Properties not
/// named here are left untouched.
pub fn apply_settings(dns: &NmDnsSettings, settings: &mut ConnectionSettings) {
    let ipv4 = settings.entry("ipv4".to_owned()).or_default();
    ipv4.insert("dns".to_owned(), variant(dns.ipv4.dns.clone()));
    ipv4.insert("dns-search".to_owned(), variant(dns.ipv4.dns_search.clone()));
    ipv4.insert(
        "dns-priority".to_owned(),
        variant(dns.ipv4.dns_priority.value()),
    );
    for prop in DEPRECATED_PROPERTIES {
        ipv4.remove(prop);
    }

    let ipv6 = settings.entry("ipv6".to_owned()).or_default();
    ipv6.insert("method".to_owned(), variant(dns.ipv6.method.to_owned()));
    if !dns.ipv6.address_data.is_empty() {
        let addrs: Vec<PropMap> = dns
            .ipv6
            .address_data
            .iter()
            .map(|ip| {
                let mut entry = PropMap::new();
                entry.insert("address".to_owned(), variant(ip.to_string()));
                entry.insert("prefix".to_owned(), variant(128u32));
                entry
            })
            .collect();
        ipv6.insert("address-data".to_owned(), variant(addrs));
    }
    ipv6.insert(
        "ignore-auto-routes".to_owned(),
        variant(dns.ipv6.ignore_auto_routes),
    );
    ipv6.insert(
        "ignore-auto-dns".to_owned(),
        variant(dns.ipv6.ignore_auto_dns),
    );
    ipv6.insert("never-default".to_owned(), variant(dns.ipv6.never_default));
    let dns_v6: Vec<Vec<u8>> = dns.ipv6.dns.iter().map(|b| b.to_vec()).collect();
    ipv6.insert("dns".to_owned(), variant(dns_v6));
    ipv6.insert("dns-search".to_owned(), variant(dns.ipv6.dns_search.clone()));
    ipv6.insert(
        "dns-priority".to_owned(),
        variant(dns.ipv6.dns_priority.value()),
    );
    for prop in DEPRECATED_PROPERTIES {
        ipv6.remove(prop);
    }
}

fn interface_addrs(interface: &str) -> Vec<IpAddr> {
    let ifaces = match NetworkInterface::show() {
        Ok(ifaces) => ifaces,
        Err(e) => {
            tracing::debug!(?e, interface, "failed to list interface addresses");
            return Vec::new();
        }
    };
    ifaces
        .into_iter()
        .filter(|i| i.name == interface)
        .flat_map(|i| i.addr)
        .map(|a| a.ip())
        .collect()
}

/// Configures DNS on one interface through NetworkManager's applied
/// connection. Each attempt opens its own system bus connection.
pub struct NmManager {
    interface: String,
    call_timeout: Duration,
}

impl NmManager {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            call_timeout: super::DEFAULT_RECONFIG_TIMEOUT,
        }
    }

    fn try_set(&self, config: &OSConfig) -> Result<(), Error> {
        let conn = Connection::new_system().map_err(Error::ipc("connecting to system bus"))?;

        let nm = conn.with_proxy(NM_BUS_NAME, NM_OBJECT_PATH, self.call_timeout);
        let (device_path,): (Path<'static>,) = nm
            .method_call(NM_INTERFACE, "GetDeviceByIpIface", (self.interface.as_str(),))
            .map_err(Error::ipc("getDeviceByIpIface"))?;

        let device = conn.with_proxy(NM_BUS_NAME, device_path, self.call_timeout);
        let (mut settings, version): (ConnectionSettings, u64) = device
            .method_call(NM_DEVICE_INTERFACE, "GetAppliedConnection", (0u32,))
            .map_err(Error::ipc("getAppliedConnection"))?;

        let dns = NmDnsSettings::new(config, interface_addrs(&self.interface));
        apply_settings(&dns, &mut settings);

        let () = device
            .method_call(NM_DEVICE_INTERFACE, "Reapply", (settings, version, 0u32))
            .map_err(Error::ipc("reapply"))?;

        tracing::info!(
            interface = %self.interface,
            ipv4_priority = dns.ipv4.dns_priority.value(),
            ipv6_priority = dns.ipv6.dns_priority.value(),
            "dns: applied network-manager settings"
        );
        Ok(())
    }
}

impl OSConfigurator for NmManager {
    fn set_dns(&self, config: &OSConfig) -> Result<(), Error> {
        self.try_set(config)
    }

    // Settings go away with the interface.
    fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "network-manager"
    }
}
