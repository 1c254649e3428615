//! Integer handles for long-lived engine objects.
//!
//! A [`HandleTable`] owns the objects and hands out [`Handle`]s that are
//! passed by value across the orchestration boundary. Ids come from one
//! process-wide counter, so a handle is never reused and a stale handle can
//! never alias a newer object, even one of another kind.
//!
//! Each entry carries a [`CancellationToken`] that is cancelled when the
//! handle is closed, letting in-flight operations that use the object stop.

use crate::error::EngineError;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// A typed reference to an object in a [`HandleTable`].
pub struct Handle<T> {
    id: u64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Rebuild a handle from its wire form.
    pub fn from_raw(id: u64) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    /// The wire form of this handle.
    pub fn raw(self) -> u64 {
        self.id
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.id)
    }
}

impl<T> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

struct Entry<T> {
    value: Arc<T>,
    token: CancellationToken,
}

/// Owner of all open objects of one kind.
pub struct HandleTable<T> {
    kind: &'static str,
    entries: Mutex<HashMap<u64, Entry<T>>>,
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("kind", &self.kind)
            .field("open", &self.len())
            .finish()
    }
}

impl<T> HandleTable<T> {
    /// An empty table whose errors name `kind`.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Entry<T>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn invalid(&self, handle: Handle<T>) -> EngineError {
        EngineError::InvalidHandle {
            kind: self.kind,
            id: handle.id,
        }
    }

    /// Take ownership of `value` and issue a new handle for it.
    pub fn open(&self, value: T) -> Handle<T> {
        self.open_arc(Arc::new(value))
    }

    /// Like [`open`](Self::open) for an already shared value.
    pub fn open_arc(&self, value: Arc<T>) -> Handle<T> {
        let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(
            id,
            Entry {
                value,
                token: CancellationToken::new(),
            },
        );
        debug!(kind = self.kind, handle = id, "handle opened");
        Handle::from_raw(id)
    }

    /// The object behind `handle`.
    pub fn get(&self, handle: Handle<T>) -> Result<Arc<T>, EngineError> {
        self.entries()
            .get(&handle.id)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| self.invalid(handle))
    }

    /// The token cancelled when `handle` closes.
    pub fn token(&self, handle: Handle<T>) -> Result<CancellationToken, EngineError> {
        self.entries()
            .get(&handle.id)
            .map(|entry| entry.token.clone())
            .ok_or_else(|| self.invalid(handle))
    }

    /// Release `handle`, cancelling operations that use it.
    ///
    /// Closing succeeds exactly once; later closes fail like any unknown
    /// handle. The object is returned so the caller can finish releasing it.
    pub fn close(&self, handle: Handle<T>) -> Result<Arc<T>, EngineError> {
        let entry = self
            .entries()
            .remove(&handle.id)
            .ok_or_else(|| self.invalid(handle))?;
        entry.token.cancel();
        debug!(kind = self.kind, handle = handle.id, "handle closed");
        Ok(entry.value)
    }

    /// Whether `handle` is open.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.entries().contains_key(&handle.id)
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no handles are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A token cancelled as soon as any of `tokens` is.
///
/// Used to tie one operation to every handle it reads. A watcher task runs
/// until the returned token is cancelled, so cancel it when the operation
/// ends.
pub fn linked_token(tokens: Vec<CancellationToken>) -> CancellationToken {
    let linked = CancellationToken::new();
    if tokens.iter().any(CancellationToken::is_cancelled) {
        linked.cancel();
        return linked;
    }
    if tokens.is_empty() {
        return linked;
    }
    let watcher = linked.clone();
    tokio::spawn(async move {
        let mut set = tokio::task::JoinSet::new();
        for token in tokens {
            set.spawn(async move { token.cancelled().await });
        }
        tokio::select! {
            _ = watcher.cancelled() => {},
            Some(_) = set.join_next() => watcher.cancel(),
        }
    });
    linked
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_open_get_close() {
        let table = HandleTable::new("config");
        let handle = table.open("hello".to_string());
        assert_eq!(*assert_ok!(table.get(handle)), "hello");
        assert_eq!(table.len(), 1);

        assert_ok!(table.close(handle));
        assert!(table.is_empty());
        let err = assert_err!(table.get(handle));
        assert!(matches!(err, EngineError::InvalidHandle { kind: "config", .. }));
    }

    #[test]
    fn test_close_exactly_once() {
        let table = HandleTable::new("state");
        let handle = table.open(1u32);
        assert_ok!(table.close(handle));
        assert_err!(table.close(handle));
    }

    #[test]
    fn test_ids_never_reused_across_tables() {
        let a: HandleTable<u8> = HandleTable::new("a");
        let b: HandleTable<u8> = HandleTable::new("b");
        let first = a.open(1);
        assert_ok!(a.close(first));
        let second = b.open(2);
        assert_ne!(first.raw(), second.raw());
        assert!(!b.contains(Handle::from_raw(first.raw())));
    }

    #[test]
    fn test_unknown_handle() {
        let table: HandleTable<u8> = HandleTable::new("plan");
        assert_err!(table.get(Handle::from_raw(u64::MAX)));
    }

    #[tokio::test]
    async fn test_linked_watchers_exit_with_linked_token() {
        let source = CancellationToken::new();
        for _ in 0..20 {
            linked_token(vec![source.clone()]).cancel();
        }
        let metrics = tokio::runtime::Handle::current().metrics();
        for _ in 0..100 {
            if metrics.num_alive_tasks() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(metrics.num_alive_tasks(), 0);
        assert!(!source.is_cancelled());
    }

    #[test]
    fn test_close_cancels_token() {
        let table = HandleTable::new("plan");
        let handle = table.open(());
        let token = assert_ok!(table.token(handle));
        assert!(!token.is_cancelled());
        assert_ok!(table.close(handle));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_linked_token_follows_any_source() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let linked = linked_token(vec![a.clone(), b.clone()]);
        assert!(!linked.is_cancelled());
        b.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), linked.cancelled())
            .await
            .expect("linked token cancelled");
    }

    #[tokio::test]
    async fn test_linked_token_already_cancelled() {
        let a = CancellationToken::new();
        a.cancel();
        assert!(linked_token(vec![a]).is_cancelled());
    }
}
