//! Address pool runtime: enumerates allocatable IPv4 hosts and IPv6/delegated
//! prefixes from configured CIDRs, and hands them out FIFO.

use std::collections::VecDeque;
use std::sync::Mutex;

use ipnet::{Ipv4Net, Ipv6Net};
use rand::seq::SliceRandom;
use tracing::{instrument, warn};

use crate::config::AddressPool;
use crate::error::RadGuardError;

const IPV6_PREFIX_LEN: u8 = 64;
const IPV6_DELEGATED_PREFIX_LEN: u8 = 56;

/// A single named pool's live allocation state. Each pool gets its own
/// mutex; allocate/restore hold it only for the duration of a `Vec` pop/push.
#[derive(Debug)]
pub struct PoolRuntime {
    ipv4: Mutex<VecDeque<std::net::Ipv4Addr>>,
    ipv6: Mutex<VecDeque<Ipv6Net>>,
    ipv6_delegated: Mutex<VecDeque<Ipv6Net>>,
}

impl PoolRuntime {
    /// Builds a runtime from a config pool, expanding CIDRs up front.
    /// CIDR parse failures are config errors, not runtime errors.
    pub fn build(pool: &AddressPool) -> Result<Self, RadGuardError> {
        let mut ipv4 = expand_ipv4_hosts(&pool.ipv4)?;
        let mut ipv6 = expand_ipv6_prefixes(&pool.ipv6, IPV6_PREFIX_LEN)?;
        let mut ipv6_delegated = expand_ipv6_prefixes(&pool.ipv6_delegated, IPV6_DELEGATED_PREFIX_LEN)?;

        if pool.shuffle {
            let mut rng = rand::rng();
            ipv4.make_contiguous().shuffle(&mut rng);
            ipv6.make_contiguous().shuffle(&mut rng);
            ipv6_delegated.make_contiguous().shuffle(&mut rng);
        }

        Ok(PoolRuntime {
            ipv4: Mutex::new(ipv4),
            ipv6: Mutex::new(ipv6),
            ipv6_delegated: Mutex::new(ipv6_delegated),
        })
    }

    #[instrument(level = "debug", skip(self))]
    pub fn allocate_ipv4(&self) -> Option<String> {
        let mut guard = self.ipv4.lock().expect("pool mutex poisoned");
        let addr = guard.pop_front();
        if addr.is_none() {
            warn!("ipv4 pool exhausted");
        }
        addr.map(|a| a.to_string())
    }

    #[instrument(level = "debug", skip(self))]
    pub fn allocate_ipv6(&self) -> Option<String> {
        let mut guard = self.ipv6.lock().expect("pool mutex poisoned");
        let net = guard.pop_front();
        if net.is_none() {
            warn!("ipv6 pool exhausted");
        }
        net.map(|n| n.to_string())
    }

    #[instrument(level = "debug", skip(self))]
    pub fn allocate_ipv6_delegated(&self) -> Option<String> {
        let mut guard = self.ipv6_delegated.lock().expect("pool mutex poisoned");
        let net = guard.pop_front();
        if net.is_none() {
            warn!("ipv6 delegated pool exhausted");
        }
        net.map(|n| n.to_string())
    }

    pub fn restore_ipv4(&self, addr: std::net::Ipv4Addr) {
        self.ipv4.lock().expect("pool mutex poisoned").push_back(addr);
    }

    pub fn restore_ipv6(&self, net: Ipv6Net) {
        self.ipv6.lock().expect("pool mutex poisoned").push_back(net);
    }

    pub fn restore_ipv6_delegated(&self, net: Ipv6Net) {
        self.ipv6_delegated
            .lock()
            .expect("pool mutex poisoned")
            .push_back(net);
    }
}

fn expand_ipv4_hosts(cidrs: &[String]) -> Result<VecDeque<std::net::Ipv4Addr>, RadGuardError> {
    let mut hosts = VecDeque::new();
    for cidr in cidrs {
        let net: Ipv4Net = cidr
            .parse()
            .map_err(|e| RadGuardError::ConfigError(format!("invalid ipv4 CIDR {cidr}: {e}")))?;
        hosts.extend(net.hosts());
    }
    Ok(hosts)
}

/// Keeps a network as-is if its prefix is already at or past `target_len`,
/// otherwise splits it into `target_len` subnets.
fn expand_ipv6_prefixes(
    cidrs: &[String],
    target_len: u8,
) -> Result<VecDeque<Ipv6Net>, RadGuardError> {
    let mut prefixes = VecDeque::new();
    for cidr in cidrs {
        let net: Ipv6Net = cidr
            .parse()
            .map_err(|e| RadGuardError::ConfigError(format!("invalid ipv6 CIDR {cidr}: {e}")))?;
        if net.prefix_len() >= target_len {
            prefixes.push_back(net);
        } else {
            let subnets = net
                .subnets(target_len)
                .map_err(|e| RadGuardError::ConfigError(format!("bad subnet split for {cidr}: {e}")))?;
            prefixes.extend(subnets);
        }
    }
    Ok(prefixes)
}

/// All configured pools, built once at startup and looked up by name on
/// every Access-Request. Pool lookups by a missing name return `None` — the
/// reply builder surfaces that as `"pool missing"`, not pool exhaustion.
#[derive(Debug, Default)]
pub struct PoolRuntimes {
    runtimes: std::collections::HashMap<String, PoolRuntime>,
}

impl PoolRuntimes {
    pub fn build(pools: &indexmap::IndexMap<String, AddressPool>) -> Result<Self, RadGuardError> {
        let mut runtimes = std::collections::HashMap::new();
        for (name, pool) in pools {
            runtimes.insert(name.clone(), PoolRuntime::build(pool)?);
        }
        Ok(PoolRuntimes { runtimes })
    }

    pub fn get(&self, name: &str) -> Option<&PoolRuntime> {
        self.runtimes.get(name)
    }
}
