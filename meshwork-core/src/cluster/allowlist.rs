//! Address and datacenter allow-lists for join admission

use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;

use super::node_state::DEFAULT_DATACENTER;
use crate::error::{MeshworkError, MeshworkResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AddressRule {
    Host(String),
    HostPort(String),
    Network(IpNet),
}

/// Exact host, `host:port` or CIDR entries. An empty list allows everyone.
#[derive(Debug, Clone, Default)]
pub struct AddressAllowlist {
    rules: Vec<AddressRule>,
}

impl AddressAllowlist {
    pub fn parse(entries: &[String]) -> MeshworkResult<Self> {
        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
            let rule = if entry.contains('/') {
                let net = entry.parse::<IpNet>().map_err(|e| {
                    MeshworkError::configuration(
                        "security.allowed_addresses",
                        format!("invalid CIDR '{}': {}", entry, e),
                    )
                })?;
                AddressRule::Network(net)
            } else if split_host_port(entry).is_some() {
                AddressRule::HostPort(entry.to_string())
            } else {
                AddressRule::Host(entry.trim_matches(|c| c == '[' || c == ']').to_string())
            };
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn allows(&self, address: &str) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        let host = split_host_port(address).map(|(h, _)| h).unwrap_or(address);
        let ip = host.parse::<IpAddr>().ok();

        self.rules.iter().any(|rule| match rule {
            AddressRule::HostPort(exact) => exact == address,
            AddressRule::Host(h) => h == host,
            AddressRule::Network(net) => ip.is_some_and(|ip| net.contains(&ip)),
        })
    }
}

/// Split `host:port`, handling bracketed IPv6 hosts
fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        (host, tail.strip_prefix(':')?)
    } else {
        let (host, port) = address.rsplit_once(':')?;
        // A bare IPv6 address is a host, not host:port
        if host.contains(':') {
            return None;
        }
        (host, port)
    };
    let port = port.parse().ok()?;
    Some((host, port))
}

/// Datacenter labels allowed to join. An empty list allows every datacenter.
#[derive(Debug, Clone, Default)]
pub struct DatacenterAllowlist {
    allowed: HashSet<String>,
}

impl DatacenterAllowlist {
    pub fn new(entries: &[String]) -> Self {
        let allowed = entries
            .iter()
            .map(|dc| if dc.is_empty() { DEFAULT_DATACENTER.to_string() } else { dc.clone() })
            .collect();
        Self { allowed }
    }

    pub fn allows(&self, datacenter: &str) -> bool {
        let dc = if datacenter.is_empty() { DEFAULT_DATACENTER } else { datacenter };
        self.allowed.is_empty() || self.allowed.contains(dc)
    }
}
