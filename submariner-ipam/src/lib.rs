use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use ipnet::Ipv4Net;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("pool exhausted: requested {requested} addresses, {available} available")]
    PoolExhausted { requested: usize, available: usize },

    #[error("address {0} is not part of the pool")]
    NotInPool(Ipv4Addr),
}

/// A finite pool of IPv4 addresses carved from a single CIDR.
///
/// The pool spans every address of the block. Addresses are handed out in
/// ascending order so repeated runs against the same pool state allocate the
/// same addresses.
pub struct IpPool {
    network: Ipv4Net,
    state: Mutex<State>,
}

struct State {
    free: BTreeSet<Ipv4Addr>,
    allocated: BTreeSet<Ipv4Addr>,
}

impl IpPool {
    pub fn new(network: Ipv4Net) -> Self {
        let start = u32::from(network.network());
        let end = u32::from(network.broadcast());
        let free = (start..=end).map(Ipv4Addr::from).collect();

        Self {
            network,
            state: Mutex::new(State {
                free,
                allocated: BTreeSet::new(),
            }),
        }
    }

    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    /// Total number of addresses in the pool.
    pub fn size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.free.len() + state.allocated.len()
    }

    pub fn available(&self) -> usize {
        self.state.lock().unwrap().free.len()
    }

    /// Reserves `count` unallocated addresses, lowest first. Fails without
    /// mutating the pool when fewer than `count` are free.
    pub fn allocate(&self, count: usize) -> Result<Vec<Ipv4Addr>> {
        let mut state = self.state.lock().unwrap();
        if state.free.len() < count {
            return Err(Error::PoolExhausted {
                requested: count,
                available: state.free.len(),
            });
        }

        let ips: Vec<Ipv4Addr> = state.free.iter().take(count).copied().collect();
        for ip in &ips {
            state.free.remove(ip);
            state.allocated.insert(*ip);
        }

        Ok(ips)
    }

    /// Marks specific addresses as allocated, e.g. when re-adopting a
    /// persisted allocation on startup. Already-allocated addresses are
    /// accepted silently; any address outside the pool fails the whole call
    /// without mutating it.
    pub fn reserve(&self, ips: &[Ipv4Addr]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for ip in ips {
            if !self.network.contains(ip) {
                return Err(Error::NotInPool(*ip));
            }
        }

        for ip in ips {
            state.free.remove(ip);
            state.allocated.insert(*ip);
        }

        Ok(())
    }

    /// Returns addresses to the pool. Already-free addresses are accepted
    /// silently; any address outside the pool fails the whole call without
    /// mutating it.
    pub fn release(&self, ips: &[Ipv4Addr]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for ip in ips {
            if !self.network.contains(ip) {
                return Err(Error::NotInPool(*ip));
            }
        }

        for ip in ips {
            state.allocated.remove(ip);
            state.free.insert(*ip);
        }

        Ok(())
    }

    #[cfg(test)]
    fn snapshot(&self) -> (BTreeSet<Ipv4Addr>, BTreeSet<Ipv4Addr>) {
        let state = self.state.lock().unwrap();
        (state.free.clone(), state.allocated.clone())
    }
}
