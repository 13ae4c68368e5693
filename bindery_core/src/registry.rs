//! Scope registries: thread-safe caches of created values.
//!
//! A registry maps opaque [`ScopeKey`]s to [`Reference`]s. Retrieval goes
//! through [`ScopeRegistry::get_or_create`], which guarantees that under
//! concurrent access the creator runs at most once per cache miss: losers
//! block on the registry's creation lock and then observe the winner's value.
//! A failed creation stores nothing, so a later retrieval may try again.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::erased::{Erased, ErasedKey};
use crate::error::Result;
use crate::reference::Reference;

/// Values cached in a scope may implement this to be notified when they are
/// evicted (removed, cleared, or displaced). The hook runs exactly once per
/// eviction, after the value is no longer reachable from the registry.
pub trait Closeable: Send + Sync {
    fn close(&self);
}

impl<T> Closeable for Arc<T>
where
    T: Closeable + ?Sized,
{
    fn close(&self) {
        (**self).close();
    }
}

/// Eviction hook stored alongside a cached entry, captured where the concrete
/// value type is still known.
pub type CloseFn = Arc<dyn Fn(&Erased) + Send + Sync>;

/// Key of one cached slot: the identity of the binding occupying it plus the
/// call argument (unit for singletons).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    slot: u64,
    arg: ErasedKey,
}

impl ScopeKey {
    /// A key for the binding slot `slot` called with `arg`.
    #[must_use]
    pub fn new(slot: u64, arg: ErasedKey) -> Self {
        Self { slot, arg }
    }
}

/// What a creation produces: the value itself, the reference wrapping it, and
/// an optional eviction hook.
pub struct Created {
    pub value: Erased,
    pub reference: Box<dyn Reference>,
    pub close: Option<CloseFn>,
}

/// A mutable, thread-safe cache mapping scope keys to lazily-created values.
pub trait ScopeRegistry: Send + Sync {
    /// Returns the cached value for `key` if its reference is still valid;
    /// otherwise runs `create`, stores the result, and returns the fresh
    /// value.
    ///
    /// With `sync = true` the creator runs at most once per cache miss, even
    /// under contention. `sync = false` skips the creation lock and is only
    /// correct when the caller already guarantees exclusive access.
    ///
    /// # Errors
    ///
    /// Propagates `create` failures without storing anything.
    fn get_or_create(
        &self,
        key: ScopeKey,
        sync: bool,
        create: &mut dyn FnMut() -> Result<Created>,
    ) -> Result<Erased>;

    /// The cached value for `key`, if present and still valid.
    ///
    /// # Errors
    ///
    /// Propagates lazy-reference failures.
    fn get(&self, key: &ScopeKey) -> Result<Option<Erased>>;

    /// Snapshot of the currently held entries.
    fn entries(&self) -> Vec<(ScopeKey, Arc<dyn Reference>)>;

    /// Evicts `key`, invoking its close hook if one was registered.
    fn remove(&self, key: &ScopeKey);

    /// Evicts everything, invoking close hooks.
    fn clear(&self);
}

struct Entry {
    reference: Arc<dyn Reference>,
    close: Option<CloseFn>,
}

impl Entry {
    fn from_created(created: Created) -> (Erased, Self) {
        let Created {
            value,
            reference,
            close,
        } = created;
        (
            value,
            Self {
                reference: Arc::from(reference),
                close,
            },
        )
    }

    /// Runs the close hook on whatever the reference still resolves to.
    /// Called after the entry has been unlinked from its registry.
    fn close(self) {
        if let Some(close) = self.close
            && let Ok(Some(value)) = self.reference.get()
        {
            close(&value);
        }
    }
}

/// Standard [`ScopeRegistry`] implementation: any number of entries.
pub struct MultiItemRegistry {
    cache: Mutex<HashMap<ScopeKey, Entry>>,
    // Registry-wide creation lock. Reentrant so that a value under
    // construction may resolve another value cached in this same registry
    // from the same thread.
    creation: ReentrantMutex<()>,
}

impl MultiItemRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            creation: ReentrantMutex::new(()),
        }
    }

    /// The number of currently held entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    fn probe(&self, key: &ScopeKey) -> Result<Option<Erased>> {
        // The reference is resolved outside the map lock: per-thread
        // references may run a creator in `get`.
        let reference = self.cache.lock().get(key).map(|e| Arc::clone(&e.reference));
        match reference {
            Some(reference) => reference.get(),
            None => Ok(None),
        }
    }
}

impl Default for MultiItemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeRegistry for MultiItemRegistry {
    fn get_or_create(
        &self,
        key: ScopeKey,
        sync: bool,
        create: &mut dyn FnMut() -> Result<Created>,
    ) -> Result<Erased> {
        if let Some(value) = self.probe(&key)? {
            return Ok(value);
        }

        let _guard = if sync { Some(self.creation.lock()) } else { None };

        // Another thread may have won the race while this one was blocked on
        // the creation lock.
        if let Some(value) = self.probe(&key)? {
            return Ok(value);
        }

        let (value, entry) = Entry::from_created(create()?);
        self.cache.lock().insert(key, entry);
        Ok(value)
    }

    fn get(&self, key: &ScopeKey) -> Result<Option<Erased>> {
        self.probe(key)
    }

    fn entries(&self) -> Vec<(ScopeKey, Arc<dyn Reference>)> {
        self.cache
            .lock()
            .iter()
            .map(|(key, entry)| (key.clone(), Arc::clone(&entry.reference)))
            .collect()
    }

    fn remove(&self, key: &ScopeKey) {
        // Serialized against in-flight creations through the creation lock.
        let _guard = self.creation.lock();
        let removed = self.cache.lock().remove(key);
        if let Some(entry) = removed {
            entry.close();
        }
    }

    fn clear(&self) {
        let _guard = self.creation.lock();
        let drained: Vec<Entry> = {
            let mut cache = self.cache.lock();
            cache.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.close();
        }
    }
}

/// [`ScopeRegistry`] specialized to hold at most one entry. Storing a
/// different key displaces (and closes) the previous occupant.
pub struct SingleItemRegistry {
    slot: Mutex<Option<(ScopeKey, Entry)>>,
    creation: ReentrantMutex<()>,
}

impl SingleItemRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            creation: ReentrantMutex::new(()),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }

    fn probe(&self, key: &ScopeKey) -> Result<Option<Erased>> {
        let reference = {
            let slot = self.slot.lock();
            match &*slot {
                Some((held, entry)) if held == key => Some(Arc::clone(&entry.reference)),
                _ => None,
            }
        };
        match reference {
            Some(reference) => reference.get(),
            None => Ok(None),
        }
    }
}

impl Default for SingleItemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeRegistry for SingleItemRegistry {
    fn get_or_create(
        &self,
        key: ScopeKey,
        sync: bool,
        create: &mut dyn FnMut() -> Result<Created>,
    ) -> Result<Erased> {
        if let Some(value) = self.probe(&key)? {
            return Ok(value);
        }

        let _guard = if sync { Some(self.creation.lock()) } else { None };

        if let Some(value) = self.probe(&key)? {
            return Ok(value);
        }

        let (value, entry) = Entry::from_created(create()?);
        let displaced = self.slot.lock().replace((key, entry));
        if let Some((_, old)) = displaced {
            old.close();
        }
        Ok(value)
    }

    fn get(&self, key: &ScopeKey) -> Result<Option<Erased>> {
        self.probe(key)
    }

    fn entries(&self) -> Vec<(ScopeKey, Arc<dyn Reference>)> {
        self.slot
            .lock()
            .as_ref()
            .map(|(key, entry)| (key.clone(), Arc::clone(&entry.reference)))
            .into_iter()
            .collect()
    }

    fn remove(&self, key: &ScopeKey) {
        let _guard = self.creation.lock();
        let removed = {
            let mut slot = self.slot.lock();
            match &*slot {
                Some((held, _)) if held == key => slot.take(),
                _ => None,
            }
        };
        if let Some((_, entry)) = removed {
            entry.close();
        }
    }

    fn clear(&self) {
        let _guard = self.creation.lock();
        let removed = self.slot.lock().take();
        if let Some((_, entry)) = removed {
            entry.close();
        }
    }
}
