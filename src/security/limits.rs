//! Per-address connection budgets.
//!
//! # Responsibilities
//! - Count concurrently open connections per source address
//! - Refuse admission above the configured ceiling
//! - Release the slot when the connection closes, however it ends
//!
//! # Design Decisions
//! - One ceiling for every address, no per-tenant override
//! - Rejection is immediate; over-limit sockets are never queued
//! - Entries are removed at zero so the map only holds live addresses

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::RejectReason;

/// Admission control keyed by source address.
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    counts: Arc<DashMap<IpAddr, usize>>,
    ceiling: usize,
}

impl ConnectionLimiter {
    pub fn new(ceiling: usize) -> Self {
        Self {
            counts: Arc::new(DashMap::new()),
            ceiling,
        }
    }

    /// Admit a connection from `addr`.
    ///
    /// The returned budget must be held for the connection's lifetime.
    pub fn admit(&self, addr: IpAddr) -> Result<ConnectionBudget, RejectReason> {
        match self.counts.entry(addr) {
            Entry::Occupied(mut entry) => {
                if *entry.get() >= self.ceiling {
                    return Err(RejectReason::TooManyConnections);
                }
                *entry.get_mut() += 1;
            }
            Entry::Vacant(entry) => {
                if self.ceiling == 0 {
                    return Err(RejectReason::TooManyConnections);
                }
                entry.insert(1);
            }
        }
        Ok(ConnectionBudget {
            counts: Arc::clone(&self.counts),
            addr,
        })
    }

    /// Open connections currently charged to `addr`.
    pub fn active(&self, addr: IpAddr) -> usize {
        self.counts.get(&addr).map(|c| *c).unwrap_or(0)
    }

    /// Number of addresses with at least one open connection.
    pub fn tracked_addresses(&self) -> usize {
        self.counts.len()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}

/// A slot in an address's budget, released on drop.
#[derive(Debug)]
pub struct ConnectionBudget {
    counts: Arc<DashMap<IpAddr, usize>>,
    addr: IpAddr,
}

impl ConnectionBudget {
    pub fn addr(&self) -> IpAddr {
        self.addr
    }
}

impl Drop for ConnectionBudget {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.counts.entry(self.addr) {
            let count = entry.get_mut();
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.remove();
            }
        }
    }
}
