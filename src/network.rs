use std::net::{IpAddr, Ipv4Addr};
use anyhow::{Result, anyhow};
use ipnet::IpNet;

use crate::probe::Target;

/// Expand a host spec (IPs, hostnames, `IP1-IP2` ranges, CIDR blocks,
/// comma separated) into host strings. Hostnames are kept unresolved so the
/// engine resolves them per probe.
pub fn parse_hosts(host_spec: &str) -> Result<Vec<String>> {
    let mut hosts = Vec::new();

    for part in host_spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('/') {
            hosts.extend(parse_cidr(part)?.into_iter().map(|ip| ip.to_string()));
        } else if part.contains('-') && part.parse::<IpAddr>().is_err() && looks_like_ip_range(part) {
            hosts.extend(parse_ip_range(part)?.into_iter().map(|ip| ip.to_string()));
        } else {
            hosts.push(part.to_string());
        }
    }

    let mut seen = std::collections::HashSet::new();
    hosts.retain(|h| seen.insert(h.clone()));

    if hosts.is_empty() {
        return Err(anyhow!("No hosts in specification: {}", host_spec));
    }
    Ok(hosts)
}

fn looks_like_ip_range(part: &str) -> bool {
    part.split('-').all(|side| side.trim().parse::<IpAddr>().is_ok())
}

fn parse_cidr(cidr: &str) -> Result<Vec<IpAddr>> {
    let network: IpNet = cidr.parse()
        .map_err(|_| anyhow!("Invalid CIDR notation: {}", cidr))?;

    match network {
        IpNet::V4(net) => Ok(net.hosts().map(IpAddr::V4).collect()),
        IpNet::V6(net) => Ok(net.hosts().take(1000).map(IpAddr::V6).collect()),
    }
}

fn parse_ip_range(range: &str) -> Result<Vec<IpAddr>> {
    let parts: Vec<&str> = range.split('-').collect();
    if parts.len() != 2 {
        return Err(anyhow!("Invalid IP range format: {}", range));
    }

    let start_ip: IpAddr = parts[0].trim().parse()
        .map_err(|_| anyhow!("Invalid start IP: {}", parts[0]))?;
    let end_ip: IpAddr = parts[1].trim().parse()
        .map_err(|_| anyhow!("Invalid end IP: {}", parts[1]))?;

    match (start_ip, end_ip) {
        (IpAddr::V4(start), IpAddr::V4(end)) => {
            let start_u32 = u32::from(start);
            let end_u32 = u32::from(end);

            if start_u32 > end_u32 {
                return Err(anyhow!("Start IP must be less than or equal to end IP"));
            }
            if end_u32 - start_u32 > 10000 {
                return Err(anyhow!("IP range too large (max 10000 addresses)"));
            }

            Ok((start_u32..=end_u32).map(|ip| IpAddr::V4(Ipv4Addr::from(ip))).collect())
        }
        (IpAddr::V6(_), IpAddr::V6(_)) => Err(anyhow!("IPv6 ranges not yet supported")),
        _ => Err(anyhow!("Start and end IP must be the same version")),
    }
}

/// Parse `22,80,443` / `500-510` style port lists.
pub fn parse_ports(port_spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();

    for part in port_spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let start: u16 = start.trim().parse()
                .map_err(|_| anyhow!("Invalid port: {}", start))?;
            let end: u16 = end.trim().parse()
                .map_err(|_| anyhow!("Invalid port: {}", end))?;
            if start == 0 || start > end {
                return Err(anyhow!("Invalid port range: {}", part));
            }
            ports.extend(start..=end);
        } else {
            let port: u16 = part.parse()
                .map_err(|_| anyhow!("Invalid port: {}", part))?;
            if port == 0 {
                return Err(anyhow!("Port 0 is not probeable"));
            }
            ports.push(port);
        }
    }

    ports.sort_unstable();
    ports.dedup();

    if ports.is_empty() {
        return Err(anyhow!("No ports in specification: {}", port_spec));
    }
    Ok(ports)
}

/// Parse a single `host:port` (or `[v6]:port`) target.
pub fn parse_target(spec: &str) -> Result<Target> {
    let spec = spec.trim();
    let (host, port) = spec
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Target must be host:port: {}", spec))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(anyhow!("Target host is empty: {}", spec));
    }
    let port: u16 = port.parse()
        .map_err(|_| anyhow!("Invalid port in target {}", spec))?;
    if port == 0 {
        return Err(anyhow!("Port 0 is not probeable"));
    }

    Ok(Target::new(host, port))
}

/// Cartesian product of a host spec and a port spec.
pub fn expand_targets(host_spec: &str, port_spec: &str) -> Result<Vec<Target>> {
    let hosts = parse_hosts(host_spec)?;
    let ports = parse_ports(port_spec)?;

    Ok(hosts
        .iter()
        .flat_map(|host| ports.iter().map(move |&port| Target::new(host.clone(), port)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_host() {
        let hosts = parse_hosts("192.168.1.1").unwrap();
        assert_eq!(hosts, vec!["192.168.1.1".to_string()]);
    }

    #[test]
    fn test_parse_hostname_kept() {
        let hosts = parse_hosts("plc.local").unwrap();
        assert_eq!(hosts, vec!["plc.local".to_string()]);
    }

    #[test]
    fn test_parse_hyphenated_hostname_not_a_range() {
        let hosts = parse_hosts("cam-01.example.net").unwrap();
        assert_eq!(hosts, vec!["cam-01.example.net".to_string()]);
    }

    #[test]
    fn test_parse_cidr() {
        let hosts = parse_hosts("192.168.1.0/30").unwrap();
        assert_eq!(hosts.len(), 2);
        assert!(hosts.contains(&"192.168.1.1".to_string()));
        assert!(hosts.contains(&"192.168.1.2".to_string()));
    }

    #[test]
    fn test_parse_ip_range() {
        let hosts = parse_hosts("10.0.0.1-10.0.0.3").unwrap();
        assert_eq!(hosts.len(), 3);
        assert_eq!(hosts[2], "10.0.0.3");
    }

    #[test]
    fn test_parse_reversed_range() {
        assert!(parse_hosts("10.0.0.5-10.0.0.1").is_err());
    }

    #[test]
    fn test_parse_ports_mixed() {
        let ports = parse_ports("502,80,8000-8002,80").unwrap();
        assert_eq!(ports, vec![80, 502, 8000, 8001, 8002]);
    }

    #[test]
    fn test_parse_ports_invalid() {
        assert!(parse_ports("abc").is_err());
        assert!(parse_ports("100-50").is_err());
        assert!(parse_ports("0").is_err());
    }

    #[test]
    fn test_parse_target() {
        let target = parse_target("127.0.0.1:22").unwrap();
        assert_eq!(target.host, "127.0.0.1");
        assert_eq!(target.port, 22);

        let v6 = parse_target("[::1]:502").unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.port, 502);

        assert!(parse_target("127.0.0.1").is_err());
        assert!(parse_target("host:notaport").is_err());
    }

    #[test]
    fn test_expand_targets() {
        let targets = expand_targets("10.0.0.1,10.0.0.2", "22,80").unwrap();
        assert_eq!(targets.len(), 4);
        assert_eq!(targets[0].key(), "10.0.0.1:22");
        assert_eq!(targets[3].key(), "10.0.0.2:80");
    }
}
