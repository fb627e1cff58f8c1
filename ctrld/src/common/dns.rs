use std::net::{IpAddr, SocketAddr};

use tokio::net::lookup_host;

use super::error::Error;

/// Resolves the socket addresses of an upstream endpoint. A bootstrap ip
/// short-circuits name resolution so reaching the upstream never depends
/// on the system resolver being replaced.
pub async fn socket_addrs(
    url: &url::Url,
    bootstrap_ip: Option<IpAddr>,
) -> Result<Vec<SocketAddr>, Error> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

    if let Some(ip) = bootstrap_ip {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    // if host is an ip address, return it directly
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs = lookup_host((host, port)).await?.collect::<Vec<_>>();
    tracing::debug!(?addrs, host, "system dns lookup done");
    if addrs.is_empty() {
        return Err(Error::NotFound);
    }
    Ok(addrs)
}
