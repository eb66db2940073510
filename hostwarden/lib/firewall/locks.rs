use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::SourceAddress;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

type LockTable = Arc<Mutex<HashMap<SourceAddress, Arc<AsyncMutex<()>>>>>;

/// Per-address critical sections.
///
/// Entries are created on first use and dropped again once nobody holds or waits for them, so
/// the table only ever contains addresses that are being worked on.
#[derive(Debug, Clone, Default)]
pub struct AddressLocks {
    table: LockTable,
}

/// Exclusive hold on one or more addresses. Released on drop.
#[derive(Debug)]
pub struct AddressGuard {
    table: LockTable,
    held: Vec<(SourceAddress, Option<OwnedMutexGuard<()>>)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AddressLocks {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `address`.
    pub async fn lock(&self, address: &SourceAddress) -> AddressGuard {
        self.lock_all([address]).await
    }

    /// Waits for exclusive access to every address in `addresses`.
    ///
    /// Addresses are taken in sorted order so two callers locking overlapping sets cannot
    /// deadlock. Duplicates are locked once.
    pub async fn lock_all<'a>(
        &self,
        addresses: impl IntoIterator<Item = &'a SourceAddress>,
    ) -> AddressGuard {
        let mut addresses: Vec<SourceAddress> = addresses.into_iter().cloned().collect();
        addresses.sort();
        addresses.dedup();

        let mut guard = AddressGuard {
            table: self.table.clone(),
            held: Vec::with_capacity(addresses.len()),
        };

        for address in addresses {
            let mutex = self
                .table
                .lock()
                .entry(address.clone())
                .or_default()
                .clone();

            // Registered before awaiting so a cancelled wait still cleans up its entry.
            guard.held.push((address, None));
            let owned = mutex.lock_owned().await;
            if let Some(slot) = guard.held.last_mut() {
                slot.1 = Some(owned);
            }
        }

        guard
    }

    /// Number of addresses currently held or waited for.
    pub fn active(&self) -> usize {
        self.table.lock().len()
    }
}

impl AddressGuard {
    /// The addresses held, in locking order.
    pub fn addresses(&self) -> impl Iterator<Item = &SourceAddress> {
        self.held.iter().map(|(address, _)| address)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for AddressGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        for (address, owned) in self.held.drain(..).rev() {
            drop(owned);

            // The table holds one reference. Anyone else holding one is waiting.
            let idle = table
                .get(&address)
                .is_some_and(|mutex| Arc::strong_count(mutex) == 1);
            if idle {
                table.remove(&address);
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(s: &str) -> SourceAddress {
        SourceAddress::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_same_address_is_exclusive() {
        let locks = AddressLocks::new();
        let a = addr("10.0.0.1");

        let guard = locks.lock(&a).await;
        let contender = {
            let locks = locks.clone();
            let a = a.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&a).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_addresses_do_not_block() {
        let locks = AddressLocks::new();
        let _a = locks.lock(&addr("10.0.0.1")).await;

        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&addr("10.0.0.2")))
            .await
            .expect("different address should lock immediately");

        assert_eq!(locks.active(), 2);
        drop(b);
        assert_eq!(locks.active(), 1);
    }

    #[tokio::test]
    async fn test_lock_all_sorts_and_dedups() {
        let locks = AddressLocks::new();
        let b = addr("10.0.0.2");
        let a = addr("10.0.0.1");

        let guard = locks.lock_all([&b, &a, &b]).await;
        let held: Vec<_> = guard.addresses().map(|a| a.as_str()).collect();
        assert_eq!(held, ["10.0.0.1", "10.0.0.2"]);

        drop(guard);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_cleans_up() {
        let locks = AddressLocks::new();
        let a = addr("10.0.0.1");

        let guard = locks.lock(&a).await;
        let waited = tokio::time::timeout(Duration::from_millis(20), locks.lock(&a)).await;
        assert!(waited.is_err());

        drop(guard);
        assert_eq!(locks.active(), 0);
    }
}
