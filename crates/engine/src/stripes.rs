//! Lock striping.

use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

/// A fixed set of async mutexes selected by key.
///
/// Keys that map to the same stripe exclude each other; that is the price
/// of a bounded lock table.
pub struct Stripes {
    locks: Box<[Mutex<()>]>,
}

impl Stripes {
    /// `count` is clamped to at least one stripe.
    pub fn new(count: usize) -> Self {
        let locks = (0..count.max(1)).map(|_| Mutex::new(())).collect();
        Self { locks }
    }

    fn index_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = std::hash::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.locks.len() as u64) as usize
    }

    pub async fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, ()> {
        self.locks[self.index_of(key)].lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_same_key_same_stripe() {
        let stripes = Stripes::new(16);
        assert_eq!(stripes.index_of("doc1"), stripes.index_of("doc1"));
        assert_eq!(stripes.index_of(&42u32), stripes.index_of(&42u32));
        assert_eq!(Stripes::new(0).locks.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_exclusive() {
        let stripes = Arc::new(Stripes::new(8));
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let (stripes, inside) = (stripes.clone(), inside.clone());
                tokio::spawn(async move {
                    let _guard = stripes.lock("bucket").await;
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
