use std::{
    cell::RefCell,
    io::{self, BufRead, Cursor},
    time::Duration,
};

use anyhow::Context;

use super::{direct::DirectManager, nm::NmManager, OSConfigurator};
use crate::common::error::Error;

const RESOLV_CONF: &str = "/etc/resolv.conf";
const PING_TIMEOUT: Duration = Duration::from_secs(1);

const NM_BUS_NAME: &str = "org.freedesktop.NetworkManager";
const NM_OBJECT_PATH: &str = "/org/freedesktop/NetworkManager";
const NM_DNS_MANAGER_PATH: &str = "/org/freedesktop/NetworkManager/DnsManager";

/// Who wrote `/etc/resolv.conf`, judged from its leading comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvOwner {
    SystemdResolved,
    NetworkManager,
    Resolvconf,
    Unknown,
}

pub fn resolv_owner(bs: &[u8]) -> ResolvOwner {
    let mut likely = ResolvOwner::Unknown;
    for line in Cursor::new(bs).lines() {
        let Ok(line) = line else {
            return likely;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // only the comment header counts
        if !line.starts_with('#') {
            return likely;
        }
        if line.contains("systemd-resolved") {
            likely = ResolvOwner::SystemdResolved;
        } else if line.contains("NetworkManager") {
            likely = ResolvOwner::NetworkManager;
        } else if line.contains("resolvconf") {
            likely = ResolvOwner::Resolvconf;
        }
    }
    likely
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsMode {
    Direct,
    NetworkManager,
}

impl DnsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsMode::Direct => "direct",
            DnsMode::NetworkManager => "network-manager",
        }
    }
}

type ReadFileFn = dyn Fn(&str) -> io::Result<Vec<u8>>;
type DbusPingFn = dyn Fn(&str, &str) -> anyhow::Result<()>;
type NmIsUsingResolvedFn = dyn Fn() -> anyhow::Result<()>;

/// The host facts mode detection depends on, swappable in tests.
pub(crate) struct OSConfigEnv {
    read_file: Box<ReadFileFn>,
    dbus_ping: Box<DbusPingFn>,
    nm_is_using_resolved: Box<NmIsUsingResolvedFn>,
}

impl OSConfigEnv {
    fn system() -> Self {
        Self {
            read_file: Box::new(|path: &str| std::fs::read(path)),
            dbus_ping: Box::new(dbus_ping),
            nm_is_using_resolved: Box::new(nm_is_using_resolved),
        }
    }
}

fn dbus_ping(name: &str, object_path: &str) -> anyhow::Result<()> {
    let conn = dbus::blocking::Connection::new_system()?;
    let proxy = conn.with_proxy(name, object_path, PING_TIMEOUT);
    let () = proxy.method_call("org.freedesktop.DBus.Peer", "Ping", ())?;
    Ok(())
}

/// Whether NetworkManager hands DNS over to systemd-resolved.
fn nm_is_using_resolved() -> anyhow::Result<()> {
    let conn =
        dbus::blocking::Connection::new_system().context("failed to connect to system bus")?;
    let proxy = conn.with_proxy(NM_BUS_NAME, NM_DNS_MANAGER_PATH, PING_TIMEOUT);

    let (value,): (dbus::arg::Variant<Box<dyn dbus::arg::RefArg + 'static>>,) = proxy
        .method_call(
            "org.freedesktop.DBus.Properties",
            "Get",
            ("org.freedesktop.NetworkManager.DnsManager", "Mode"),
        )
        .context("failed to get NM dns mode property")?;

    if value.0.as_str() != Some("systemd-resolved") {
        anyhow::bail!(
            "NetworkManager is not using systemd-resolved, found: {:?}",
            value
        );
    }
    Ok(())
}

/// Collects detection facts and logs them in one line when dropped.
#[derive(Default)]
struct ModeFacts(RefCell<Vec<(&'static str, &'static str)>>);

impl ModeFacts {
    fn note(&self, key: &'static str, value: &'static str) {
        self.0.borrow_mut().push((key, value));
    }
}

impl Drop for ModeFacts {
    fn drop(&mut self) {
        let facts = self.0.borrow();
        if !facts.is_empty() {
            let facts: Vec<String> = facts.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            tracing::info!("dns: [{}]", facts.join(" "));
        }
    }
}

pub(crate) fn dns_mode(env: &OSConfigEnv) -> anyhow::Result<DnsMode> {
    let facts = ModeFacts::default();

    let nm_up = (env.dbus_ping)(NM_BUS_NAME, NM_OBJECT_PATH).is_ok();
    if nm_up {
        facts.note("nm-ping", "yes");
    }

    let content = match (env.read_file)(RESOLV_CONF) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            facts.note("rc", "missing");
            return Ok(DnsMode::Direct);
        }
        Err(e) => return Err(e).context("reading /etc/resolv.conf"),
    };

    match resolv_owner(&content) {
        ResolvOwner::NetworkManager => {
            facts.note("rc", "nm");
            if !nm_up {
                facts.note("nm", "not-running");
                return Ok(DnsMode::Direct);
            }
            Ok(DnsMode::NetworkManager)
        }
        ResolvOwner::SystemdResolved => {
            facts.note("rc", "resolved");
            if !nm_up {
                return Ok(DnsMode::Direct);
            }
            if let Err(e) = (env.nm_is_using_resolved)() {
                tracing::debug!(?e, "nm is not pushing dns to resolved");
                facts.note("nm-resolved", "no");
                return Ok(DnsMode::Direct);
            }
            facts.note("nm-resolved", "yes");
            Ok(DnsMode::NetworkManager)
        }
        ResolvOwner::Resolvconf => {
            facts.note("rc", "resolvconf");
            Ok(DnsMode::Direct)
        }
        ResolvOwner::Unknown => {
            facts.note("rc", "unknown");
            Ok(DnsMode::Direct)
        }
    }
}

pub fn new_os_configurator(interface: &str) -> Result<Box<dyn OSConfigurator>, Error> {
    let env = OSConfigEnv::system();
    let mode = dns_mode(&env).context("failed to detect dns mode")?;
    tracing::info!(interface, "dns: using {} mode", mode.as_str());

    Ok(match mode {
        DnsMode::NetworkManager => Box::new(NmManager::new(interface)),
        DnsMode::Direct => Box::new(DirectManager::new()),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(
        "# This is /run/systemd/resolve/stub-resolv.conf managed by man:systemd-resolved(8).\n\
         nameserver 127.0.0.53\n",
        ResolvOwner::SystemdResolved
    )]
    #[case(
        "# Generated by NetworkManager\nnameserver 192.168.1.1\n",
        ResolvOwner::NetworkManager
    )]
    #[case(
        "# Dynamic resolv.conf(5) file for glibc resolver(3) generated by resolvconf(8)\n",
        ResolvOwner::Resolvconf
    )]
    #[case("nameserver 1.1.1.1\n# Generated by NetworkManager\n", ResolvOwner::Unknown)]
    #[case("", ResolvOwner::Unknown)]
    fn owner_from_header(#[case] text: &str, #[case] want: ResolvOwner) {
        assert_eq!(resolv_owner(text.as_bytes()), want);
    }

    fn fake_env(
        resolv_conf: Option<&'static str>,
        nm_up: bool,
        nm_resolved: bool,
    ) -> OSConfigEnv {
        OSConfigEnv {
            read_file: Box::new(move |_: &str| -> io::Result<Vec<u8>> {
                match resolv_conf {
                    Some(text) => Ok(text.as_bytes().to_vec()),
                    None => Err(io::ErrorKind::NotFound.into()),
                }
            }),
            dbus_ping: Box::new(move |_: &str, _: &str| {
                if nm_up {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("service unknown"))
                }
            }),
            nm_is_using_resolved: Box::new(move || {
                if nm_resolved {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("dns mode is default"))
                }
            }),
        }
    }

    const NM_RC: &str = "# Generated by NetworkManager\nnameserver 192.168.1.1\n";
    const RESOLVED_RC: &str = "# managed by man:systemd-resolved(8)\nnameserver 127.0.0.53\n";

    #[rstest]
    #[case(None, true, true, DnsMode::Direct)]
    #[case(Some(NM_RC), true, false, DnsMode::NetworkManager)]
    #[case(Some(NM_RC), false, false, DnsMode::Direct)]
    #[case(Some(RESOLVED_RC), true, true, DnsMode::NetworkManager)]
    #[case(Some(RESOLVED_RC), true, false, DnsMode::Direct)]
    #[case(Some(RESOLVED_RC), false, true, DnsMode::Direct)]
    #[case(Some("nameserver 9.9.9.9\n"), true, true, DnsMode::Direct)]
    fn mode_selection(
        #[case] rc: Option<&'static str>,
        #[case] nm_up: bool,
        #[case] nm_resolved: bool,
        #[case] want: DnsMode,
    ) {
        let env = fake_env(rc, nm_up, nm_resolved);
        assert_eq!(dns_mode(&env).unwrap(), want);
    }

    #[test]
    fn unreadable_resolv_conf_is_an_error() {
        let mut env = fake_env(None, true, true);
        env.read_file = Box::new(|_: &str| -> io::Result<Vec<u8>> {
            Err(io::ErrorKind::PermissionDenied.into())
        });
        assert!(dns_mode(&env).is_err());
    }
}
