//! Per-device serialization
//!
//! A tag's radio handles one GATT transaction at a time, so every operation
//! on an address runs under that address's lock. Different addresses never
//! contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Held for the whole of one device operation
///
/// Shared between the operation and its open connection, so the lock is only
/// released once the connection has been torn down, even when the operation
/// future is dropped mid-flight.
pub type DeviceGuard = Arc<OwnedMutexGuard<()>>;

/// Registry of per-address locks
#[derive(Debug, Default, Clone)]
pub struct DeviceLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(address: &str) -> String {
        address.to_ascii_uppercase()
    }

    fn handle(&self, address: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Held guards and waiters keep their own clone; the rest are idle.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(Self::key(address)).or_default())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Wait for exclusive access to `address`
    pub async fn acquire(&self, address: &str) -> DeviceGuard {
        let lock = self.handle(address);
        if lock.try_lock().is_err() {
            tracing::debug!(address, "waiting for device lock");
        }
        Arc::new(lock.lock_owned().await)
    }

    /// Whether an operation currently holds `address`
    pub fn is_locked(&self, address: &str) -> bool {
        self.handle(address).try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_address_is_exclusive() {
        let locks = DeviceLocks::new();
        let guard = locks.acquire("aa:bb").await;
        assert!(locks.is_locked("AA:BB"));
        assert!(!locks.is_locked("CC:DD"));

        let held = Arc::clone(&guard);
        drop(guard);
        assert!(locks.is_locked("AA:BB"));
        drop(held);
        assert!(!locks.is_locked("AA:BB"));
    }

    #[tokio::test]
    async fn released_addresses_are_forgotten() {
        let locks = DeviceLocks::new();
        let held = locks.acquire("AA").await;
        drop(locks.acquire("BB").await);
        drop(locks.acquire("CC").await);
        assert_eq!(locks.tracked(), 2);

        let _dd = locks.acquire("DD").await;
        assert_eq!(locks.tracked(), 2);
        assert!(locks.is_locked("AA"));

        drop(held);
        let _ee = locks.acquire("EE").await;
        assert_eq!(locks.tracked(), 2);
        assert!(!locks.is_locked("AA"));
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let locks = DeviceLocks::new();
        let guard = locks.acquire("AA").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.acquire("AA").await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
