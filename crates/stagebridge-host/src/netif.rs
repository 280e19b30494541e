/// Local interface address lookup, used to keep relayed messages from
/// being sent back to this machine.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::warn;

pub trait LocalAddresses: Send + Sync {
    fn addresses(&self) -> HashSet<IpAddr>;
}

/// Enumerates the host's interfaces on every call, so addresses picked up
/// by DHCP after startup are still recognised.
pub struct SystemInterfaces;

impl LocalAddresses for SystemInterfaces {
    fn addresses(&self) -> HashSet<IpAddr> {
        let mut addrs: HashSet<IpAddr> = match if_addrs::get_if_addrs() {
            Ok(ifaces) => ifaces.into_iter().map(|iface| iface.ip()).collect(),
            Err(e) => {
                warn!(error = %e, "Could not enumerate network interfaces");
                HashSet::new()
            }
        };
        if let Some(ip) = primary_ipv4() {
            addrs.insert(IpAddr::V4(ip));
        }
        addrs
    }
}

/// The address this host would use for outbound LAN traffic.
/// No packet is sent; connecting a UDP socket only selects a route.
pub fn primary_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("10.255.255.255:1").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Whether a datagram sent to `target` would be delivered back to this host.
///
/// Catches the unspecified address, the limited broadcast address, loopback
/// and any of our own interface addresses. Subnet-directed broadcasts on
/// unusual topologies are not detected.
pub fn loops_back_to_self(target: IpAddr, local: &HashSet<IpAddr>) -> bool {
    if target.is_unspecified() || target.is_loopback() || local.contains(&target) {
        return true;
    }
    matches!(target, IpAddr::V4(v4) if v4.is_broadcast())
}
