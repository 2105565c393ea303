use std::net::Ipv4Addr;

use anyhow::anyhow;
use log::error;
use mac_address::mac_address_by_name;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig, V4IfAddr};

use crate::{DjLinkError, Result};

/// The local interface the virtual device announces from.
#[derive(Clone, Debug)]
pub(crate) struct Interface {
    pub name: String,
    pub addr: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub mac_addr: [u8; 6],
}

fn ipv4_iface(iface: &NetworkInterface) -> Option<(String, V4IfAddr)> {
    if let Some(addr) = iface.addr {
        match addr {
            Addr::V4(a) if !a.ip.is_loopback() => Some((iface.name.clone(), a)),
            _ => None,
        }
    } else {
        None
    }
}

fn network(addr: Ipv4Addr, netmask: Ipv4Addr) -> u32 {
    u32::from(addr) & u32::from(netmask)
}

// Interfaces whose subnet contains `peer`.
fn matching(ifaces: &[(String, V4IfAddr)], peer: Ipv4Addr) -> Vec<(String, V4IfAddr)> {
    ifaces
        .iter()
        .filter(|(_, a)| match a.netmask {
            Some(mask) => network(a.ip, mask) == network(peer, mask),
            None => false,
        })
        .cloned()
        .collect()
}

fn finish(name: String, a: V4IfAddr) -> Result<Interface> {
    let broadcast = match a.broadcast {
        Some(b) => b,
        None => {
            let mask = a.netmask.unwrap_or(Ipv4Addr::new(255, 255, 255, 0));
            Ipv4Addr::from(u32::from(a.ip) | !u32::from(mask))
        }
    };

    let mac = mac_address_by_name(&name)
        .map_err(|e| anyhow!("failed to look up mac address: {}", e))?
        .ok_or(anyhow!("failed to look up mac address for {}", name))?;

    Ok(Interface {
        name,
        addr: a.ip,
        broadcast,
        mac_addr: mac.bytes(),
    })
}

/// Picks the interface to announce from. A configured name wins;
/// otherwise the subnet of the first peer we heard decides; with
/// neither, the first usable IPv4 interface is taken.
pub(crate) fn select_interface(
    configured: Option<&str>,
    peer: Option<Ipv4Addr>,
) -> Result<Interface> {
    let all_interfaces =
        NetworkInterface::show().map_err(|e| anyhow!("can't get network interfaces: {}", e))?;
    let ifaces: Vec<(String, V4IfAddr)> =
        all_interfaces.iter().filter_map(|i| ipv4_iface(i)).collect();

    if let Some(iface_name) = configured {
        let (name, a) = ifaces
            .into_iter()
            .find(|(name, _)| name == iface_name)
            .ok_or(anyhow!("Can't find interface \"{}\".", iface_name))?;
        return finish(name, a);
    }

    if let Some(peer) = peer {
        let matches = matching(&ifaces, peer);
        if matches.len() > 1 {
            let names: Vec<&str> = matches.iter().map(|(name, _)| name.as_str()).collect();
            error!(
                target: "djlink",
                "interfaces {:?} all see the subnet of {}; duplicate packets will corrupt the device table",
                names, peer
            );
        }
        return match matches.into_iter().next() {
            Some((name, a)) => finish(name, a),
            None => Err(DjLinkError::NoMatchingInterface { peer }),
        };
    }

    let (name, a) = ifaces
        .into_iter()
        .next()
        .ok_or(anyhow!("Can't find a default interface."))?;
    finish(name, a)
}
