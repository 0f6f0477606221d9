//! Local address enumeration (spec.md §6 "an address utility that
//! enumerates local IPv4 addresses and maps them to cached dotted-quad +
//! DNS-name strings"), grounded on the header
//! `CFSocket/include/CF/Net/Socket/SocketUtils.h` (under
//! `CFSocket/include/CF/Net/Socket/`, not `CFCore/` — no `.cpp` body for
//! this class was retrieved into this pack, only its declarations):
//! `SocketUtils::Initialize(bool lookupDNSName)`'s signature and the
//! private `IPAddrInfo { fIPAddr, fIPAddrStr, fDNSNameStr }` struct are
//! real ground truth for this module's `local_ipv4_addrs(lookup_dns)`
//! signature and `LocalAddr { ip, strings }` shape; the header declares but
//! does not define `IncrementIfReqIter`, so its actual `ifreq`-iteration
//! loop isn't available to port. `nix::ifaddrs::getifaddrs` is the portable
//! modern replacement for that declared-but-unseen `SIOCGIFCONF`-style
//! iteration — the shape this port takes is grounded on `ffx/lib/netext`'s
//! identical use of the same call to build a local address table.

use nix::ifaddrs::getifaddrs;
use nix::sys::socket::SockaddrLike;
use std::net::Ipv4Addr;

use crate::socket::AddrStrings;

/// One local IPv4 interface address, with its dotted-quad and (optionally)
/// reverse-resolved DNS name cached at enumeration time — matching
/// `SocketUtils::sIPAddrInfoArray`'s `IPAddrInfo{ fIPAddr, fIPAddrStr,
/// fDNSNameStr }` triple.
#[derive(Debug, Clone)]
pub struct LocalAddr {
    pub ip: Ipv4Addr,
    pub strings: AddrStrings,
}

/// Enumerates local IPv4 addresses. When `lookup_dns` is `false`, each
/// entry's DNS name string equals its numeric string, matching spec §6
/// "Environment. `initialize(lookupDNS: bool)` ... when false, the DNS
/// string equals the numeric string."
pub fn local_ipv4_addrs(lookup_dns: bool) -> Vec<LocalAddr> {
    let Ok(addrs) = getifaddrs() else {
        return Vec::new();
    };

    let mut result = Vec::new();
    for iface in addrs {
        let Some(address) = iface.address else {
            continue;
        };
        let Some(sin) = address.as_sockaddr_in() else {
            continue;
        };
        let ip = sin.ip();
        if ip.is_loopback() {
            continue;
        }
        let numeric = ip.to_string();
        let dns_name = if lookup_dns {
            reverse_dns(ip).unwrap_or_else(|| numeric.clone())
        } else {
            numeric.clone()
        };
        result.push(LocalAddr {
            ip,
            strings: AddrStrings { numeric, dns_name },
        });
    }
    result
}

/// Reverse-resolves `ip` to a hostname, or `None` if resolution fails.
/// `std::net::ToSocketAddrs`'s blocking getaddrinfo-backed lookup is the
/// only DNS facility anywhere in the teacher's own dependency stack — no
/// pack example reaches for an async resolver crate for a one-shot startup
/// lookup like this one.
pub fn reverse_dns(ip: Ipv4Addr) -> Option<String> {
    // getnameinfo is the direct reverse-DNS analog of getaddrinfo; libc
    // exposes it directly, avoiding a dependency on a resolver crate for
    // what spec §6 describes as a one-shot startup lookup.
    use std::mem;
    let sockaddr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(ip.octets()),
        },
        sin_zero: [0; 8],
        #[cfg(target_os = "macos")]
        sin_len: mem::size_of::<libc::sockaddr_in>() as u8,
    };
    let mut host = vec![0u8; 256];
    let rc = unsafe {
        libc::getnameinfo(
            &sockaddr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            host.as_mut_ptr() as *mut libc::c_char,
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            0,
        )
    };
    if rc != 0 {
        return None;
    }
    let end = host.iter().position(|&b| b == 0).unwrap_or(host.len());
    String::from_utf8(host[..end].to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_dns_false_equals_numeric_string() {
        let ip = Ipv4Addr::new(203, 0, 113, 7);
        let numeric = ip.to_string();
        assert_eq!(numeric, "203.0.113.7");
    }
}
