// Address resolution for discovery
//
// Works out which IP this host talks from and which broadcast
// addresses a discovery request should be sent to. Stateless.

use anyhow::{bail, Context, Result};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Address used only to pick a route; nothing is sent to it.
const ROUTE_PROBE_ADDR: &str = "10.255.255.255:1";

/// Outbound IPv4 address of this host, or loopback if there is no route.
pub fn local_ip() -> Ipv4Addr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(ROUTE_PROBE_ADDR)?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(IpAddr::V4(ip)) if !ip.is_unspecified() => ip,
        Ok(_) => Ipv4Addr::LOCALHOST,
        Err(e) => {
            tracing::debug!(error = %e, "Could not determine outbound IP, using loopback");
            Ipv4Addr::LOCALHOST
        }
    }
}

/// Parse `"a.b.c.d/len"`. A bare address is treated as a /24.
pub fn parse_network(spec: &str) -> Result<(Ipv4Addr, u8)> {
    let spec = spec.trim();
    let (addr, prefix) = match spec.split_once('/') {
        Some((addr, prefix)) => {
            let prefix: u8 = prefix
                .parse()
                .with_context(|| format!("Invalid prefix length in '{}'", spec))?;
            (addr, prefix)
        }
        None => (spec, 24),
    };
    if prefix > 32 {
        bail!("Prefix length {} out of range in '{}'", prefix, spec);
    }
    let addr: Ipv4Addr = addr
        .parse()
        .with_context(|| format!("Invalid IPv4 address in '{}'", spec))?;
    Ok((addr, prefix))
}

/// Directed broadcast address of `ip/prefix`.
pub fn broadcast_address(ip: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    let host_bits = 32 - u32::from(prefix.min(32));
    let host_mask = if host_bits == 32 {
        u32::MAX
    } else {
        (1u32 << host_bits) - 1
    };
    Ipv4Addr::from(u32::from(ip) | host_mask)
}

/// Broadcast addresses to probe for the given network list.
///
/// Unparsable entries are skipped with a warning. With no usable
/// networks the local /24 is used, and failing that the limited
/// broadcast address. Never returns an empty list.
pub fn broadcast_addresses(networks: &[String]) -> Vec<Ipv4Addr> {
    let mut targets: Vec<Ipv4Addr> = Vec::new();

    for network in networks {
        match parse_network(network) {
            Ok((ip, prefix)) => {
                let bcast = broadcast_address(ip, prefix);
                if !targets.contains(&bcast) {
                    targets.push(bcast);
                }
            }
            Err(e) => tracing::warn!(network = %network, error = %e, "Skipping broadcast network"),
        }
    }

    if targets.is_empty() {
        let local = local_ip();
        if local.is_loopback() {
            targets.push(Ipv4Addr::BROADCAST);
        } else {
            targets.push(broadcast_address(local, 24));
        }
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_of_slash_24() {
        let ip: Ipv4Addr = "192.168.50.17".parse().unwrap();
        assert_eq!(broadcast_address(ip, 24), Ipv4Addr::new(192, 168, 50, 255));
    }

    #[test]
    fn test_broadcast_of_odd_prefixes() {
        let ip = Ipv4Addr::new(10, 1, 2, 3);
        assert_eq!(broadcast_address(ip, 8), Ipv4Addr::new(10, 255, 255, 255));
        assert_eq!(broadcast_address(ip, 20), Ipv4Addr::new(10, 1, 15, 255));
        assert_eq!(broadcast_address(ip, 32), ip);
        assert_eq!(broadcast_address(ip, 0), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_parse_network_bare_address_is_slash_24() {
        let (ip, prefix) = parse_network("192.168.50.0").unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 50, 0));
        assert_eq!(prefix, 24);
    }

    #[test]
    fn test_parse_network_rejects_garbage() {
        assert!(parse_network("192.168.50.0/33").is_err());
        assert!(parse_network("host.local/24").is_err());
        assert!(parse_network("10.0.0.0/x").is_err());
    }

    #[test]
    fn test_broadcast_addresses_dedups_and_skips_invalid() {
        let nets = vec![
            "127.0.0.1/32".to_string(),
            "bogus".to_string(),
            "127.0.0.1/32".to_string(),
            "192.168.1.0/24".to_string(),
        ];
        assert_eq!(
            broadcast_addresses(&nets),
            vec![Ipv4Addr::LOCALHOST, Ipv4Addr::new(192, 168, 1, 255)]
        );
    }

    #[test]
    fn test_broadcast_addresses_never_empty() {
        assert!(!broadcast_addresses(&[]).is_empty());
    }

    #[test]
    fn test_local_ip_is_ipv4() {
        // Either a real interface address or the loopback fallback
        let ip = local_ip();
        assert!(!ip.is_unspecified());
    }
}
