//! Reference wrappers controlling how long cached values stay retrievable.
//!
//! A scope registry never holds values directly; it holds [`Reference`]s. The
//! kind of reference decides whether a cached value lives forever
//! ([`RefMaker::strong`]), until explicitly released ([`RefMaker::clearable`]),
//! as long as someone outside still holds the `Arc` ([`RefMaker::weak`]), or
//! once per calling thread ([`RefMaker::per_thread`]).

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::erased::Erased;
use crate::error::{Error, Result};

/// Creates the value a reference will wrap. May fail; failures propagate to
/// the retrieval that triggered the creation.
pub type CreatorFn = Box<dyn Fn() -> Result<Erased> + Send + Sync>;

/// A handle to a cached value.
pub trait Reference: Send + Sync {
    /// The current value, or `None` once the reference has expired.
    ///
    /// # Errors
    ///
    /// Reference kinds that create lazily (per-thread) surface creator
    /// failures here.
    fn get(&self) -> Result<Option<Erased>>;

    /// Invalidates the reference, if this kind supports manual invalidation.
    fn clear(&self) {}
}

type MakeFn = dyn Fn(CreatorFn) -> Result<(Erased, Box<dyn Reference>)> + Send + Sync;

/// Pluggable strategy producing a [`Reference`] around a freshly created
/// value.
#[derive(Clone)]
pub struct RefMaker {
    name: &'static str,
    make: Arc<MakeFn>,
}

impl RefMaker {
    /// Runs `creator` and wraps its result.
    ///
    /// # Errors
    ///
    /// Propagates the creator's failure; nothing is wrapped in that case.
    pub fn make(&self, creator: CreatorFn) -> Result<(Erased, Box<dyn Reference>)> {
        (self.make)(creator)
    }

    /// The strategy's display name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// References that never expire. This is the default for singletons and
    /// multitons.
    #[must_use]
    pub fn strong() -> Self {
        Self {
            name: "strong",
            make: Arc::new(|creator: CreatorFn| {
                let value = creator()?;
                Ok((value.clone(), Box::new(StrongRef(value))))
            }),
        }
    }

    /// References invalidated manually through [`Reference::clear`]. After
    /// clearing, the next retrieval creates a fresh value.
    #[must_use]
    pub fn clearable() -> Self {
        Self {
            name: "clearable",
            make: Arc::new(|creator: CreatorFn| {
                let value = creator()?;
                let reference = ClearableRef(Mutex::new(Some(value.clone())));
                Ok((value, Box::new(reference)))
            }),
        }
    }

    /// References that expire when the last `Arc` held outside the registry
    /// drops. Only valid for bindings whose produced type is `Arc<T>`;
    /// creating any other type fails with
    /// [`Error::TypeMismatch`].
    ///
    /// Unlike a garbage-collected weak reference, expiry is deterministic:
    /// it happens exactly at the last drop.
    #[must_use]
    pub fn weak<T>() -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            name: "weak",
            make: Arc::new(|creator: CreatorFn| {
                let value = creator()?;
                let found = value.type_name();
                let arc = value
                    .clone()
                    .downcast::<Arc<T>>()
                    .map_err(|_| Error::type_mismatch::<Arc<T>>(found))?;
                Ok((value, Box::new(WeakRef(Arc::downgrade(&arc)))))
            }),
        }
    }

    /// References holding one value per calling thread. The creator runs on
    /// first access from each thread; within a thread the value is stable.
    #[must_use]
    pub fn per_thread() -> Self {
        Self {
            name: "per-thread",
            make: Arc::new(|creator: CreatorFn| {
                let reference = PerThreadRef {
                    values: Mutex::new(HashMap::new()),
                    creator,
                };
                let value = reference.value_for_current_thread()?;
                Ok((value, Box::new(reference)))
            }),
        }
    }
}

impl std::fmt::Debug for RefMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RefMaker").field(&self.name).finish()
    }
}

struct StrongRef(Erased);

impl Reference for StrongRef {
    fn get(&self) -> Result<Option<Erased>> {
        Ok(Some(self.0.clone()))
    }
}

struct ClearableRef(Mutex<Option<Erased>>);

impl Reference for ClearableRef {
    fn get(&self) -> Result<Option<Erased>> {
        Ok(self.0.lock().clone())
    }

    fn clear(&self) {
        *self.0.lock() = None;
    }
}

struct WeakRef<T>(Weak<T>);

impl<T> Reference for WeakRef<T>
where
    T: Send + Sync + 'static,
{
    fn get(&self) -> Result<Option<Erased>> {
        Ok(self.0.upgrade().map(Erased::new))
    }
}

struct PerThreadRef {
    values: Mutex<HashMap<ThreadId, Erased>>,
    creator: CreatorFn,
}

impl PerThreadRef {
    fn value_for_current_thread(&self) -> Result<Erased> {
        let id = thread::current().id();
        if let Some(value) = self.values.lock().get(&id) {
            return Ok(value.clone());
        }
        // Run the creator without holding the lock: it may resolve other
        // bindings. Two concurrent first accesses for the same id are
        // impossible since a thread runs one of them at a time.
        let value = (self.creator)()?;
        self.values.lock().insert(id, value.clone());
        Ok(value)
    }
}

impl Reference for PerThreadRef {
    fn get(&self) -> Result<Option<Erased>> {
        self.value_for_current_thread().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_creator(counter: Arc<AtomicUsize>) -> CreatorFn {
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Erased::new(Arc::new("value".to_string())))
        })
    }

    #[test]
    fn test_strong_never_expires() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (value, reference) = RefMaker::strong()
            .make(counting_creator(Arc::clone(&counter)))
            .unwrap();
        drop(value);

        let got = reference.get().unwrap().unwrap();
        assert!(got.is::<Arc<String>>());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clearable() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (_, reference) = RefMaker::clearable()
            .make(counting_creator(Arc::clone(&counter)))
            .unwrap();

        assert!(reference.get().unwrap().is_some());
        reference.clear();
        assert!(reference.get().unwrap().is_none());
    }

    #[test]
    fn test_weak_expires_at_last_drop() {
        let (value, reference) = RefMaker::weak::<String>()
            .make(Box::new(|| Ok(Erased::new(Arc::new("value".to_string())))))
            .unwrap();

        assert!(reference.get().unwrap().is_some());
        drop(value);
        assert!(reference.get().unwrap().is_none());
    }

    #[test]
    fn test_weak_rejects_non_arc_values() {
        let err = match RefMaker::weak::<String>()
            .make(Box::new(|| Ok(Erased::new("not an arc".to_string()))))
        {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(err.is_type_mismatch());
    }

    #[test]
    fn test_per_thread_one_value_per_thread() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counting = counting_creator(Arc::clone(&counter));
        let (_, reference) = RefMaker::per_thread().make(counting).unwrap();

        let here_1 = reference.get().unwrap().unwrap();
        let here_2 = reference.get().unwrap().unwrap();
        let here_1 = here_1.downcast::<Arc<String>>().unwrap();
        let here_2 = here_2.downcast::<Arc<String>>().unwrap();
        assert!(Arc::ptr_eq(&here_1, &here_2));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let reference = Arc::new(reference);
        let cloned = Arc::clone(&reference);
        let there = thread::spawn(move || {
            let value = cloned.get().unwrap().unwrap();
            value.downcast::<Arc<String>>().unwrap()
        })
        .join()
        .unwrap();

        assert!(!Arc::ptr_eq(&here_1, &there));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
