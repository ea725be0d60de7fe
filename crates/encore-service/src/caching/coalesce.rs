use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};

type Operation<T> = BoxFuture<'static, Option<T>>;

/// An operation that is currently running for some key.
///
/// The registry only holds a weak handle: the operation is kept alive by the callers awaiting it,
/// and is dropped together with the last of them.
struct PendingOperation<T> {
    id: u64,
    result: WeakShared<Operation<T>>,
}

struct Registry<K, T> {
    next_id: u64,
    operations: HashMap<K, PendingOperation<T>>,
}

/// Releases the registry slot of an operation once it settles or is dropped.
struct SettleGuard<K: Eq + Hash, T> {
    registry: Arc<Mutex<Registry<K, T>>>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, T> Drop for SettleGuard<K, T> {
    fn drop(&mut self) {
        let removed = {
            let mut registry = self
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match registry.operations.get(&self.key) {
                // The slot might already belong to a newer operation after a `clear`.
                Some(pending) if pending.id == self.id => registry.operations.remove(&self.key),
                _ => None,
            }
        };
        drop(removed);
    }
}

/// Deduplicates concurrent operations per key.
///
/// While an operation for a key is running, [`run_exclusive`](Self::run_exclusive) attaches every
/// further call for the same key to it, and all of them observe the same result.
pub struct InFlight<K, T> {
    name: &'static str,
    registry: Arc<Mutex<Registry<K, T>>>,
}

impl<K, T> Clone for InFlight<K, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<K, T> std::fmt::Debug for InFlight<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self
            .registry
            .try_lock()
            .map(|r| r.operations.len())
            .unwrap_or_default();
        f.debug_struct("InFlight")
            .field("name", &self.name)
            .field("pending", &pending)
            .finish()
    }
}

impl<K, T> InFlight<K, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                operations: HashMap::new(),
            })),
        }
    }

    /// Runs the operation created by `operation` unless one is already running for `key`, in
    /// which case its result is awaited instead.
    ///
    /// The factory is only invoked for the call that actually starts the operation. Looking up a
    /// running operation and registering a new one happen under the same lock, so two callers can
    /// never both start one.
    ///
    /// Resolves to `None` if the operation panicked.
    pub async fn run_exclusive<F, Fut>(&self, key: K, operation: F) -> Option<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let result = {
            let mut registry = self.registry.lock().unwrap();
            let running = registry
                .operations
                .get(&key)
                .and_then(|pending| pending.result.upgrade());

            match running {
                Some(result) => {
                    metric!(counter("fetch.coalesced") += 1, "resource" => self.name);
                    result
                }
                None => {
                    registry.next_id += 1;
                    let id = registry.next_id;
                    let guard = SettleGuard {
                        registry: Arc::clone(&self.registry),
                        key: key.clone(),
                        id,
                    };
                    let result = start_operation(self.name, guard, operation);
                    // A `Shared` that was never polled can always be downgraded.
                    if let Some(weak) = result.downgrade() {
                        registry
                            .operations
                            .insert(key, PendingOperation { id, result: weak });
                    }
                    result
                }
            }
        };

        result.await
    }

    /// Whether an operation for `key` is currently registered.
    pub fn is_pending(&self, key: &K) -> bool {
        self.registry.lock().unwrap().operations.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.registry.lock().unwrap().operations.len()
    }

    /// Detaches the running operation for `key`, if any.
    ///
    /// Its current waiters are unaffected, the next call for `key` starts a new operation.
    pub fn detach(&self, key: &K) -> bool {
        let removed = self.registry.lock().unwrap().operations.remove(key);
        removed.is_some()
    }

    /// Detaches all running operations.
    ///
    /// Callers that are already waiting still receive their results, but new calls will start
    /// fresh operations.
    pub fn clear(&self) {
        let operations = std::mem::take(&mut self.registry.lock().unwrap().operations);
        drop(operations);
    }
}

fn start_operation<K, T, F, Fut>(
    name: &'static str,
    guard: SettleGuard<K, T>,
    operation: F,
) -> Shared<Operation<T>>
where
    K: Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    async move {
        // The factory is called in here so that a panic while creating the operation is caught
        // just like one while running it.
        let result = AssertUnwindSafe(async move { operation().await })
            .catch_unwind()
            .await;
        drop(guard);

        match result {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!(resource = name, "Coalesced operation panicked");
                None
            }
        }
    }
    .boxed()
    .shared()
}
