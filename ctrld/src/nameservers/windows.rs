use std::ptr::null_mut;

use windows_sys::Win32::{
    Foundation::{ERROR_BUFFER_OVERFLOW, NO_ERROR},
    NetworkManagement::IpHelper::{
        GetAdaptersAddresses, GAA_FLAG_INCLUDE_PREFIX, IP_ADAPTER_ADDRESSES_LH,
    },
    Networking::WinSock::{AF_INET, AF_INET6, AF_UNSPEC, SOCKADDR, SOCKADDR_IN, SOCKADDR_IN6},
};

use super::{fill_growing_buffer, CallError, DnsServerAddr, INITIAL_ADAPTER_BUFFER_SIZE};
use crate::common::error::Error;

unsafe fn decode_sockaddr(sa: *const SOCKADDR) -> Option<DnsServerAddr> {
    if sa.is_null() {
        return None;
    }
    match (*sa).sa_family {
        AF_INET => {
            let sin = &*(sa as *const SOCKADDR_IN);
            Some(DnsServerAddr::V4(sin.sin_addr.S_un.S_addr.to_ne_bytes()))
        }
        AF_INET6 => {
            let sin6 = &*(sa as *const SOCKADDR_IN6);
            Some(DnsServerAddr::V6(sin6.sin6_addr.u.Byte))
        }
        family => Some(DnsServerAddr::Other(family)),
    }
}

/// Walks every adapter's DNS server list. All addresses are copied out
/// before the adapter buffer is dropped.
pub(super) fn dns_server_addrs() -> Result<Vec<DnsServerAddr>, Error> {
    let buf = fill_growing_buffer(INITIAL_ADAPTER_BUFFER_SIZE, |ptr, size| {
        let ret = unsafe {
            GetAdaptersAddresses(
                AF_UNSPEC as u32,
                GAA_FLAG_INCLUDE_PREFIX,
                null_mut(),
                ptr as *mut IP_ADAPTER_ADDRESSES_LH,
                size,
            )
        };
        match ret {
            NO_ERROR => Ok(()),
            ERROR_BUFFER_OVERFLOW => Err(CallError::BufferOverflow),
            code => Err(CallError::Os(code as i32)),
        }
    })?;
    let Some(buf) = buf else {
        return Ok(Vec::new());
    };

    let mut addrs = Vec::new();
    let mut adapter = buf.as_ptr() as *const IP_ADAPTER_ADDRESSES_LH;
    while !adapter.is_null() {
        let aa = unsafe { &*adapter };
        let mut dns = aa.FirstDnsServerAddress;
        while !dns.is_null() {
            let entry = unsafe { &*dns };
            if let Some(addr) = unsafe { decode_sockaddr(entry.Address.lpSockaddr) } {
                addrs.push(addr);
            }
            dns = entry.Next;
        }
        adapter = aa.Next;
    }
    Ok(addrs)
}
