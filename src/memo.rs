//! Single-flight task memoization.
//!
//! Long-running work (compiles, browser launches, teardown) is spawned onto
//! the runtime once and observed through a [`Shared`] future, so every caller
//! attaches to the same in-flight task and dropping a caller never cancels it.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TaskMap`] | Keyed table of single-flight tasks |
//! | [`AsyncOnce`] | Runs one task exactly once |

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Result cloned out to every waiter of a shared task.
pub type SharedResult<T> = std::result::Result<T, Arc<Error>>;

/// A spawned task that any number of callers may await.
pub type SharedTask<T> = Shared<BoxFuture<'static, SharedResult<T>>>;

/// Spawns `future` and returns a shareable handle to its result.
pub fn spawn_shared<T, F>(future: F) -> SharedTask<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(future);
    async move {
        match handle.await {
            Ok(result) => result.map_err(Arc::new),
            Err(join_error) => Err(Arc::new(Error::from(join_error))),
        }
    }
    .boxed()
    .shared()
}

// ============================================================================
// TaskMap
// ============================================================================

/// Keyed table of single-flight tasks.
///
/// At most one task exists per key. Entries are only removed by [`drain`].
///
/// [`drain`]: TaskMap::drain
pub struct TaskMap<K, T: Clone> {
    tasks: Mutex<FxHashMap<K, SharedTask<T>>>,
}

impl<K, T> TaskMap<K, T>
where
    K: Eq + Hash,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the task for `key`, starting it with `start` if absent.
    ///
    /// The boolean is `true` when this call started the task.
    pub fn get_or_start<F, Fut>(&self, key: K, start: F) -> (SharedTask<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get(&key) {
            return (task.clone(), false);
        }

        let task = spawn_shared(start());
        tasks.insert(key, task.clone());
        (task, true)
    }

    /// Returns the task for `key` if one was started.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<SharedTask<T>>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.tasks.lock().get(key).cloned()
    }

    /// Returns handles to every task.
    #[must_use]
    pub fn values(&self) -> Vec<SharedTask<T>> {
        self.tasks.lock().values().cloned().collect()
    }

    /// Removes and returns every task.
    pub fn drain(&self) -> Vec<SharedTask<T>> {
        self.tasks.lock().drain().map(|(_, task)| task).collect()
    }

    /// Returns the number of tasks started.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns `true` if no task was started.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl<K, T> Default for TaskMap<K, T>
where
    K: Eq + Hash,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// AsyncOnce
// ============================================================================

/// Runs a task at most once; later callers observe the same completion.
///
/// State is `None` until the first call, then the in-flight or completed task.
pub struct AsyncOnce<T: Clone> {
    task: Mutex<Option<SharedTask<T>>>,
}

impl<T> AsyncOnce<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a holder that has not run yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            task: Mutex::new(None),
        }
    }

    /// Starts the task on first call and awaits its result.
    pub async fn run<F, Fut>(&self, start: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let task = {
            let mut slot = self.task.lock();
            slot.get_or_insert_with(|| spawn_shared(start())).clone()
        };
        task.await
    }

    /// Returns `true` once the task has been started.
    #[inline]
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.task.lock().is_some()
    }
}

impl<T> Default for AsyncOnce<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_map_single_flight() {
        let map: TaskMap<&'static str, usize> = TaskMap::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let start = |runs: Arc<AtomicUsize>| {
            move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(runs.fetch_add(1, Ordering::SeqCst) + 1)
            }
        };

        let (first, started_first) = map.get_or_start("a", start(Arc::clone(&runs)));
        let (second, started_second) = map.get_or_start("a", start(Arc::clone(&runs)));

        assert!(started_first);
        assert!(!started_second);
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(second.await.unwrap(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn test_task_map_failure_is_cached() {
        let map: TaskMap<u32, ()> = TaskMap::new();

        let (task, _) = map.get_or_start(1, || async { Err(Error::config("bad")) });
        assert!(task.await.is_err());

        let (task, started) = map.get_or_start(1, || async { Ok(()) });
        assert!(!started);
        assert!(task.await.is_err());
    }

    #[tokio::test]
    async fn test_task_survives_dropped_caller() {
        let map: TaskMap<u32, u32> = TaskMap::new();
        let (task, _) = map.get_or_start(7, || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(42)
        });
        drop(task);

        let again = map.get(&7).expect("task should stay registered");
        assert_eq!(again.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_drain_empties_map() {
        let map: TaskMap<u32, u32> = TaskMap::new();
        let _ = map.get_or_start(1, || async { Ok(1) });
        let _ = map.get_or_start(2, || async { Ok(2) });

        let drained = map.drain();
        assert_eq!(drained.len(), 2);
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_async_once_runs_once() {
        let once: AsyncOnce<()> = AsyncOnce::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let make = |runs: Arc<AtomicUsize>| {
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };

        let (a, b) = tokio::join!(
            once.run(make(Arc::clone(&runs))),
            once.run(make(Arc::clone(&runs)))
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert!(once.has_run());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
