//! # Model Resource Cache
//!
//! Single-flight lazy cache for heavy backend resources (loaded models).
//! Loading the same large model into memory twice because two requests
//! arrived together is the failure mode this module exists to prevent.
//!
//! ## Algorithm:
//! - A ready entry is returned immediately
//! - For an unseen key, the first caller installs a shared in-flight load;
//!   every concurrent caller for that key awaits the same load and observes
//!   the same outcome, success or failure
//! - A failed load is removed, so the next caller after the failure retries
//! - Successful resources live for the process lifetime; there is no
//!   eviction in the base design (a bounded wrapper is the extension point)

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use thiserror::Error;

/// A resource load failed. Cloneable so every waiter on a shared in-flight
/// load can receive the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resource load failed: {message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

type LoadFuture<T> = Shared<BoxFuture<'static, Result<T, LoadError>>>;

enum Slot<T> {
    Ready(T),
    Loading(LoadFuture<T>),
}

/// Single-flight cache keyed by model identifier.
///
/// `T` is a cheaply-cloneable handle to the heavy resource (typically an
/// `Arc`). The map lock is only held to inspect or swap a slot, never while
/// a load is running; the per-key exclusivity comes from all callers
/// awaiting one shared future.
pub struct ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    entries: Mutex<HashMap<String, Slot<T>>>,
}

impl<T> ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached resource for `identifier`, loading it via `loader`
    /// if this is the first access.
    ///
    /// Exactly one loader runs per key at a time; concurrent callers block
    /// on the in-flight load and share its result. The shared future is
    /// driven by whichever waiters are still polling, so a caller that goes
    /// away mid-load does not strand the others.
    pub async fn acquire<F, Fut>(&self, identifier: &str, loader: F) -> Result<T, LoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LoadError>> + Send + 'static,
    {
        let load = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(identifier) {
                Some(Slot::Ready(resource)) => return Ok(resource.clone()),
                Some(Slot::Loading(load)) => load.clone(),
                None => {
                    let load: LoadFuture<T> = loader().boxed().shared();
                    entries.insert(identifier.to_string(), Slot::Loading(load.clone()));
                    load
                }
            }
        };

        let result = load.clone().await;

        // Settle the slot. Whoever wakes first does it; the pointer check
        // keeps a stale waiter from clobbering a newer load for the key.
        let mut entries = self.entries.lock().unwrap();
        if let Some(Slot::Loading(current)) = entries.get(identifier) {
            if current.ptr_eq(&load) {
                match &result {
                    Ok(resource) => {
                        entries.insert(identifier.to_string(), Slot::Ready(resource.clone()));
                    }
                    Err(_) => {
                        entries.remove(identifier);
                    }
                }
            }
        }

        result
    }

    /// Whether a ready resource is cached for `identifier`.
    pub fn is_loaded(&self, identifier: &str) -> bool {
        matches!(
            self.entries.lock().unwrap().get(identifier),
            Some(Slot::Ready(_))
        )
    }

    /// Number of ready entries (in-flight loads excluded).
    pub fn loaded_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }
}

impl<T> Default for ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
