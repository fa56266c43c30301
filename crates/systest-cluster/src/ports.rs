//! Port offset allocation.
//!
//! Every process the harness starts listens on `base + offset` for one or
//! more well-known base ports. The allocator hands out offsets that were
//! never handed out before for the same base in this process, and whose
//! ports could be bound at allocation time. Bases form separate namespaces:
//! a coordinator offset and a server offset may be numerically equal, but
//! no absolute port is ever reserved twice.
//!
//! Nothing stops a process outside the harness from grabbing a port between
//! allocation and spawn; the random window makes that unlikely.

use crate::{Error, Result};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, TcpListener};
use std::ops::Range;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use systest_config::PortSettings;
use tracing::debug;

static GLOBAL: LazyLock<Arc<PortAllocator>> =
    LazyLock::new(|| Arc::new(PortAllocator::from_settings(&PortSettings::default())));

/// Hands out non-overlapping port offsets.
#[derive(Debug)]
pub struct PortAllocator {
    window: Range<u16>,
    max_attempts: u32,
    ledger: Mutex<Ledger>,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Offsets per base port namespace.
    offsets: HashMap<u16, HashSet<u16>>,
    /// Every absolute port reserved so far, across namespaces.
    ports: HashSet<u16>,
}

impl PortAllocator {
    /// Creates an allocator drawing offsets from `window`.
    pub fn new(window: Range<u16>, max_attempts: u32) -> Self {
        assert!(!window.is_empty(), "offset window must not be empty");
        Self {
            window,
            max_attempts,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn from_settings(settings: &PortSettings) -> Self {
        Self::new(
            settings.offset_min..settings.offset_max,
            settings.max_attempts,
        )
    }

    /// The allocator shared by everything in this process.
    pub fn global() -> Arc<PortAllocator> {
        Arc::clone(&GLOBAL)
    }

    /// Returns a fresh offset for `base`.
    pub fn allocate_offset(&self, base: u16) -> Result<u16> {
        self.allocate_offset_with(base, &[])
    }

    /// Returns a fresh offset for `base` that also reserves
    /// `companion + offset` for every companion base. The offset is
    /// recorded under `base`; the absolute ports are reserved globally so
    /// different namespaces never land on the same port.
    pub fn allocate_offset_with(&self, base: u16, companions: &[u16]) -> Result<u16> {
        let mut rng = rand::thread_rng();
        let mut guard = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        let ledger = &mut *guard;
        let taken = ledger.offsets.entry(base).or_default();

        for _ in 0..self.max_attempts {
            let offset = rng.gen_range(self.window.clone());
            if taken.contains(&offset) {
                continue;
            }

            let ports: Option<Vec<u16>> = std::iter::once(base)
                .chain(companions.iter().copied())
                .map(|b| b.checked_add(offset))
                .collect();
            let Some(ports) = ports else {
                continue;
            };
            if ports.iter().any(|p| ledger.ports.contains(p)) {
                continue;
            }
            if !ports.iter().all(|&p| port_is_free(p)) {
                continue;
            }

            taken.insert(offset);
            ledger.ports.extend(ports);
            debug!(base, offset, "allocated port offset");
            return Ok(offset);
        }

        Err(Error::PortsExhausted {
            base,
            attempts: self.max_attempts,
        })
    }

    /// Offsets handed out so far for `base`, sorted.
    pub fn allocated(&self, base: u16) -> Vec<u16> {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        let mut offsets: Vec<u16> = ledger
            .offsets
            .get(&base)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        offsets.sort_unstable();
        offsets
    }
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ephemeral_port() -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_offsets_are_distinct() {
        let allocator = PortAllocator::from_settings(&PortSettings::default());
        let offsets: Vec<u16> = (0..50)
            .map(|_| allocator.allocate_offset(9080).unwrap())
            .collect();

        let unique: HashSet<u16> = offsets.iter().copied().collect();
        assert_eq!(unique.len(), offsets.len());
        assert_eq!(allocator.allocated(9080).len(), 50);
    }

    #[test]
    fn test_namespaces_are_independent() {
        let allocator = PortAllocator::new(15000..15001, 8);

        // A one-slot window: both bases get the same offset
        let coordinator = allocator.allocate_offset(5080).unwrap();
        let server = allocator.allocate_offset(9080).unwrap();
        assert_eq!(coordinator, 15000);
        assert_eq!(server, 15000);
    }

    #[test]
    fn test_absolute_ports_never_collide_across_namespaces() {
        let allocator = PortAllocator::new(15000..15001, 8);

        // 5080 + 15000 is already reserved, so base 5079 + companion 5080 cannot fit
        allocator.allocate_offset(5080).unwrap();
        let err = allocator.allocate_offset_with(5079, &[5080]).unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { base: 5079, .. }));
    }

    #[test]
    fn test_companion_ports_are_reserved() {
        let allocator = PortAllocator::new(15000..15001, 8);

        // A coordinator's HTTP companion (6080 + 15000) blocks any later
        // allocation that would reuse that port as its own companion
        allocator.allocate_offset_with(5080, &[6080]).unwrap();
        let err = allocator.allocate_offset_with(9080, &[6080]).unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { base: 9080, .. }));
        assert!(allocator.allocated(9080).is_empty());
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let base = ephemeral_port();
        let allocator = PortAllocator::new(0..1, 4);

        assert_eq!(allocator.allocate_offset(base).unwrap(), 0);
        let err = allocator.allocate_offset(base).unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { attempts: 4, .. }));
    }

    #[test]
    fn test_busy_port_is_skipped() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy = listener.local_addr().unwrap().port();
        let allocator = PortAllocator::new(0..1, 4);

        let err = allocator.allocate_offset(busy).unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { .. }));
        assert!(allocator.allocated(busy).is_empty());
    }

    #[test]
    fn test_busy_companion_is_skipped() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy = listener.local_addr().unwrap().port();
        let base = ephemeral_port();
        let allocator = PortAllocator::new(0..1, 4);

        assert!(allocator.allocate_offset_with(base, &[busy]).is_err());
    }

    #[test]
    fn test_offset_overflow_is_never_returned() {
        let allocator = PortAllocator::new(65000..65010, 16);
        assert!(allocator.allocate_offset(9080).is_err());
    }

    #[test]
    fn test_concurrent_allocation() {
        let allocator = PortAllocator::from_settings(&PortSettings::default());

        let offsets: Vec<u16> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..10)
                            .map(|_| allocator.allocate_offset(7080).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let unique: HashSet<u16> = offsets.iter().copied().collect();
        assert_eq!(unique.len(), 80);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_offsets_pairwise_distinct(count in 1usize..40, base in 1000u16..10000) {
            let allocator = PortAllocator::from_settings(&PortSettings::default());
            let mut seen = HashSet::new();
            for _ in 0..count {
                let offset = allocator.allocate_offset(base).unwrap();
                prop_assert!(seen.insert(offset));
            }
        }
    }
}
