use anyhow::Context;
use resolv_conf::ScopedIp;

use super::DnsServerAddr;
use crate::common::error::Error;

const RESOLV_CONF: &str = "/etc/resolv.conf";

pub(super) fn dns_server_addrs() -> Result<Vec<DnsServerAddr>, Error> {
    let buf =
        std::fs::read(RESOLV_CONF).with_context(|| format!("failed to read {}", RESOLV_CONF))?;
    parse_resolv_conf(&buf)
}

fn parse_resolv_conf(buf: &[u8]) -> Result<Vec<DnsServerAddr>, Error> {
    let conf = resolv_conf::Config::parse(buf).context("failed to parse resolv.conf")?;
    Ok(conf
        .nameservers
        .iter()
        .map(|ns| match ns {
            ScopedIp::V4(ip) => DnsServerAddr::V4(ip.octets()),
            ScopedIp::V6(ip, _) => DnsServerAddr::V6(ip.octets()),
        })
        .collect())
}
