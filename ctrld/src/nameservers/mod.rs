//! Discovery of the nameservers the OS is using before the proxy takes over.

#[cfg(not(windows))]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(not(windows))]
use self::unix as platform;
#[cfg(windows)]
use self::windows as platform;

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use crate::common::{config::DEFAULT_DNS_PORT, error::Error};

/// Suggested first size for the adapter enumeration buffer.
pub const INITIAL_ADAPTER_BUFFER_SIZE: u32 = 15000;

// ERROR_BUFFER_OVERFLOW
const BUFFER_OVERFLOW_CODE: i32 = 111;

/// A DNS server socket address copied out of OS-owned memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsServerAddr {
    V4([u8; 4]),
    V6([u8; 16]),
    /// Address family the decoder does not understand.
    Other(u16),
}

impl DnsServerAddr {
    fn ip(&self) -> Option<IpAddr> {
        match *self {
            DnsServerAddr::V4(b) => Some(Ipv4Addr::from(b).into()),
            // fec0::/10 entries are placeholder defaults on unrelated adapters
            DnsServerAddr::V6(b) if b[0] == 0xfe && b[1] == 0xc0 => None,
            DnsServerAddr::V6(b) => Some(Ipv6Addr::from(b).into()),
            DnsServerAddr::Other(_) => None,
        }
    }
}

/// Formats the retained addresses as `host:53`, keeping their order.
pub fn collect_nameservers(addrs: impl IntoIterator<Item = DnsServerAddr>) -> Vec<String> {
    addrs
        .into_iter()
        .filter_map(|a| a.ip())
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT).to_string())
        .collect()
}

/// The nameservers configured on this host, as `ip:53` strings. Discovery
/// is best effort: any failure yields an empty list.
pub fn nameservers() -> Vec<String> {
    match platform::dns_server_addrs() {
        Ok(addrs) => {
            let ns = collect_nameservers(addrs);
            tracing::debug!(?ns, "discovered os nameservers");
            ns
        }
        Err(e) => {
            tracing::warn!(?e, "failed to discover os nameservers");
            Vec::new()
        }
    }
}

/// Outcome of one call into an OS function that fills a caller buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    /// The buffer was too small; the required size was written back.
    BufferOverflow,
    Os(i32),
}

/// Calls `call` with a buffer of `size` bytes until it fits. The buffer is
/// 8-byte aligned so it can hold OS records directly. Returns `None` when
/// the call succeeds but reports an empty result.
///
/// An overflow that does not ask for more than the current size is treated
/// as a permanent failure.
pub fn fill_growing_buffer<F>(initial: u32, mut call: F) -> Result<Option<Vec<u64>>, Error>
where
    F: FnMut(*mut u8, &mut u32) -> Result<(), CallError>,
{
    let mut size = initial;
    loop {
        let supplied = size;
        let mut buf = vec![0u64; (supplied as usize).div_ceil(8)];
        match call(buf.as_mut_ptr() as *mut u8, &mut size) {
            Ok(()) if size == 0 => return Ok(None),
            Ok(()) => return Ok(Some(buf)),
            Err(CallError::BufferOverflow) if size > supplied => {
                tracing::trace!(supplied, required = size, "adapter buffer too small");
            }
            Err(CallError::BufferOverflow) => {
                return Err(Error::IOError(io::Error::from_raw_os_error(
                    BUFFER_OVERFLOW_CODE,
                )))
            }
            Err(CallError::Os(code)) => {
                return Err(Error::IOError(io::Error::from_raw_os_error(code)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    fn v6(s: &str) -> DnsServerAddr {
        DnsServerAddr::V6(s.parse::<Ipv6Addr>().unwrap().octets())
    }

    #[test]
    fn site_local_and_unknown_families_are_dropped() {
        let addrs = vec![
            DnsServerAddr::V4([192, 168, 1, 1]),
            v6("fec0:0:0:ffff::1"),
            DnsServerAddr::Other(17),
            v6("2001:4860:4860::8888"),
            v6("fec0:0:0:ffff::2"),
            DnsServerAddr::V4([8, 8, 8, 8]),
            DnsServerAddr::V4([192, 168, 1, 1]),
        ];
        assert_eq!(
            collect_nameservers(addrs),
            vec![
                "192.168.1.1:53",
                "[2001:4860:4860::8888]:53",
                "8.8.8.8:53",
                "192.168.1.1:53",
            ]
        );
    }

    #[test]
    fn fec0_filter_checks_only_leading_bytes() {
        // fe80:: is link-local, not site-local
        assert_eq!(
            collect_nameservers([v6("fe80::1"), v6("fec0::1")]),
            vec!["[fe80::1]:53"]
        );
    }

    /// Plays back a scripted sequence of OS responses, counting attempts.
    fn scripted(
        responses: Vec<(Result<(), CallError>, u32)>,
    ) -> (
        impl FnMut(*mut u8, &mut u32) -> Result<(), CallError>,
        std::rc::Rc<std::cell::Cell<usize>>,
    ) {
        let attempts = std::rc::Rc::new(std::cell::Cell::new(0));
        let counter = attempts.clone();
        let mut responses = VecDeque::from(responses);
        let call = move |_ptr: *mut u8, size: &mut u32| {
            counter.set(counter.get() + 1);
            let (ret, reported) = responses.pop_front().expect("unexpected extra call");
            *size = reported;
            ret
        };
        (call, attempts)
    }

    #[test]
    fn growing_sizes_terminate_after_n_plus_two_attempts() {
        // S0 < S1 < S2 then success: n = 2
        let (call, attempts) = scripted(vec![
            (Err(CallError::BufferOverflow), 16000),
            (Err(CallError::BufferOverflow), 17000),
            (Err(CallError::BufferOverflow), 18000),
            (Ok(()), 18000),
        ]);
        let buf = fill_growing_buffer(INITIAL_ADAPTER_BUFFER_SIZE, call)
            .unwrap()
            .unwrap();
        assert_eq!(attempts.get(), 4);
        assert_eq!(buf.len() * 8, 18000);
    }

    #[test]
    fn repeated_size_is_an_error() {
        let (call, attempts) = scripted(vec![
            (Err(CallError::BufferOverflow), 16000),
            (Err(CallError::BufferOverflow), 16000),
        ]);
        let err = fill_growing_buffer(INITIAL_ADAPTER_BUFFER_SIZE, call).unwrap_err();
        assert!(matches!(err, Error::IOError(_)), "{:?}", err);
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn other_os_error_is_fatal() {
        let (call, attempts) = scripted(vec![(Err(CallError::Os(87)), 15000)]);
        match fill_growing_buffer(INITIAL_ADAPTER_BUFFER_SIZE, call) {
            Err(Error::IOError(e)) => assert_eq!(e.raw_os_error(), Some(87)),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn empty_success_means_no_adapters() {
        let (call, _) = scripted(vec![(Ok(()), 0)]);
        assert!(fill_growing_buffer(INITIAL_ADAPTER_BUFFER_SIZE, call)
            .unwrap()
            .is_none());
    }
}
