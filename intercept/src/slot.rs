//! Write-once storage for pre-patch function addresses.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Holds the address a symbol resolved to before it was rebound.
///
/// Single writer, many readers: the committer publishes the address exactly
/// once with a compare-exchange from zero, and replacement functions read it
/// with acquire loads for the rest of the process lifetime. A published slot
/// can never be overwritten.
#[derive(Debug)]
pub struct OriginalSlot {
    address: AtomicUsize,
}

impl OriginalSlot {
    pub const fn new() -> Self {
        Self {
            address: AtomicUsize::new(0),
        }
    }

    /// Publish `address`. Returns false if the slot was already populated or
    /// `address` is null.
    pub fn publish(&self, address: usize) -> bool {
        address != 0
            && self
                .address
                .compare_exchange(0, address, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    #[inline]
    pub fn get(&self) -> Option<usize> {
        match self.address.load(Ordering::Acquire) {
            0 => None,
            address => Some(address),
        }
    }

    #[inline]
    pub fn is_populated(&self) -> bool {
        self.get().is_some()
    }
}

impl Default for OriginalSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_starts_empty() {
        let slot = OriginalSlot::new();
        assert_eq!(slot.get(), None);
        assert!(!slot.is_populated());
    }

    #[test]
    fn slot_publishes_once() {
        let slot = OriginalSlot::new();
        assert!(slot.publish(0x1000));
        assert!(!slot.publish(0x2000));
        assert_eq!(slot.get(), Some(0x1000));
    }

    #[test]
    fn slot_rejects_null() {
        let slot = OriginalSlot::new();
        assert!(!slot.publish(0));
        assert!(slot.publish(0x1000));
    }

    #[test]
    fn concurrent_publishers_leave_exactly_one_winner() {
        static SLOT: OriginalSlot = OriginalSlot::new();

        let winners: usize = (1..=8usize)
            .map(|i| std::thread::spawn(move || SLOT.publish(i * 0x1000) as usize))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();

        assert_eq!(winners, 1);
        assert!(SLOT.is_populated());
    }
}
