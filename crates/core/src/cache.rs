use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

/// Memoising cache with at most one in-flight computation per key.
///
/// Concurrent callers for the same key wait on the first caller's
/// computation. A failed computation is not cached; the next caller retries.
#[derive(Debug)]
pub struct SingleFlight<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self { cells: Mutex::new(HashMap::new()) }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cells.entry(key).or_default())
        };
        cell.get_or_try_init(init).await.cloned()
    }

    /// Cached value, if computed.
    pub fn peek(&self, key: &K) -> Option<V> {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.get(key).and_then(|c| c.get().cloned())
    }

    /// Drop a cached value so the next caller recomputes it.
    pub fn invalidate(&self, key: &K) {
        self.cells.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let cache: Arc<SingleFlight<&'static str, String>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_init("persona", || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>("summary".to_owned())
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), "summary");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.peek(&"persona").as_deref(), Some("summary"));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: SingleFlight<u32, u32> = SingleFlight::new();
        let err = cache.get_or_try_init(1, || async { Err::<u32, _>("boom") }).await;
        assert_eq!(err, Err("boom"));
        assert!(cache.peek(&1).is_none());
        let ok = cache.get_or_try_init(1, || async { Ok::<_, &str>(7) }).await;
        assert_eq!(ok, Ok(7));
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let cache: SingleFlight<u32, u32> = SingleFlight::new();
        cache.get_or_try_init(1, || async { Ok::<_, ()>(1) }).await.unwrap();
        cache.invalidate(&1);
        let v = cache.get_or_try_init(1, || async { Ok::<_, ()>(2) }).await.unwrap();
        assert_eq!(v, 2);
    }
}
