//! Scopes: map a context value to the registry caching its instances.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::erased::{Erased, ErasedKey, Keyable};
use crate::error::{Error, Result};
use crate::reference::RefMaker;
use crate::registry::{Created, MultiItemRegistry, ScopeKey, ScopeRegistry};

/// Source of process-unique slot identifiers for bindings and sub-scopes.
static NEXT_SLOT: AtomicU64 = AtomicU64::new(0);

/// Allocates a fresh slot identifier. Each cached binding instance owns one;
/// copying a binding allocates a new one, which is what detaches the copy's
/// cache from the original's.
#[must_use]
pub fn next_slot() -> u64 {
    NEXT_SLOT.fetch_add(1, Ordering::Relaxed)
}

/// Maps a context value to a [`ScopeRegistry`]. The same context value must
/// always map to the same registry instance.
pub trait Scope: Send + Sync + 'static {
    /// The context type retrievals must supply for bindings in this scope.
    type Context;

    /// The registry caching instances for `context`.
    ///
    /// # Errors
    ///
    /// Scopes that derive their registries lazily (e.g. [`SubScope`]) surface
    /// failures of that derivation.
    fn registry(&self, context: &Self::Context) -> Result<Arc<dyn ScopeRegistry>>;
}

/// The degenerate scope: one shared registry regardless of context.
///
/// Every unscoped singleton or multiton gets its own `NoScope`, so "clearing
/// the scope" affects exactly that binding.
pub struct NoScope {
    registry: Arc<MultiItemRegistry>,
}

impl NoScope {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(MultiItemRegistry::new()),
        }
    }

    /// The single registry behind this scope.
    #[must_use]
    pub fn shared_registry(&self) -> Arc<dyn ScopeRegistry> {
        Arc::clone(&self.registry) as Arc<dyn ScopeRegistry>
    }
}

impl Default for NoScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope for NoScope {
    type Context = ();

    fn registry(&self, _context: &()) -> Result<Arc<dyn ScopeRegistry>> {
        Ok(self.shared_registry())
    }
}

/// A scope holding one registry per context **value**.
///
/// Keying is by value equality (`C: Eq + Hash`), not identity: two equal
/// context values share a registry. For identity keying, use a newtype whose
/// `Eq`/`Hash` go through `Arc::as_ptr`.
///
/// Registries live until [`remove`](Self::remove) is called for their
/// context; wire that call to whatever lifecycle event ends the context
/// (connection closed, session expired, ...).
pub struct ContextScope<C> {
    registries: Mutex<HashMap<ErasedKey, Arc<MultiItemRegistry>>>,
    _context: PhantomData<fn(C)>,
}

impl<C> ContextScope<C>
where
    C: Keyable,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            registries: Mutex::new(HashMap::new()),
            _context: PhantomData,
        }
    }

    /// Evicts and closes everything cached for `context`, and drops its
    /// registry.
    pub fn remove(&self, context: &C) {
        let removed = self
            .registries
            .lock()
            .remove(&ErasedKey::new(context.clone()));
        if let Some(registry) = removed {
            registry.clear();
        }
    }

    /// The number of contexts currently holding a registry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registries.lock().is_empty()
    }
}

impl<C> Default for ContextScope<C>
where
    C: Keyable,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Scope for ContextScope<C>
where
    C: Keyable,
{
    type Context = C;

    fn registry(&self, context: &C) -> Result<Arc<dyn ScopeRegistry>> {
        let mut registries = self.registries.lock();
        let registry = registries
            .entry(ErasedKey::new(context.clone()))
            .or_insert_with(|| Arc::new(MultiItemRegistry::new()));
        Ok(Arc::clone(registry) as Arc<dyn ScopeRegistry>)
    }
}

/// A scope deriving a child registry nested inside a parent scope's registry.
///
/// The child registry is itself a cached entry of the parent: evicting it
/// from the parent (via [`remove_from_parent`](Self::remove_from_parent) or a
/// parent-side `clear`) clears the child too.
pub struct SubScope<P> {
    parent: Arc<P>,
    slot: u64,
}

impl<P> SubScope<P>
where
    P: Scope,
    P::Context: Keyable,
{
    #[must_use]
    pub fn new(parent: Arc<P>) -> Self {
        Self {
            parent,
            slot: next_slot(),
        }
    }

    fn parent_key(&self, context: &P::Context) -> ScopeKey {
        ScopeKey::new(self.slot, ErasedKey::new(context.clone()))
    }

    /// Evicts this sub-scope's registry for `context` from the parent,
    /// clearing it in the process.
    ///
    /// # Errors
    ///
    /// Propagates failures of the parent registry derivation.
    pub fn remove_from_parent(&self, context: &P::Context) -> Result<()> {
        let parent = self.parent.registry(context)?;
        parent.remove(&self.parent_key(context));
        Ok(())
    }
}

impl<P> Scope for SubScope<P>
where
    P: Scope,
    P::Context: Keyable,
{
    type Context = P::Context;

    fn registry(&self, context: &P::Context) -> Result<Arc<dyn ScopeRegistry>> {
        let parent = self.parent.registry(context)?;
        // `sync = false`: nesting a registry creation inside the parent's
        // `get_or_create` must not take the parent's creation lock again.
        let mut create = || -> Result<Created> {
            let registry = Arc::new(MultiItemRegistry::new()) as Arc<dyn ScopeRegistry>;
            let (value, reference) =
                RefMaker::strong().make(Box::new(move || Ok(Erased::new(Arc::clone(&registry)))))?;
            let close: crate::registry::CloseFn = Arc::new(|value: &Erased| {
                if let Some(registry) = value.downcast_ref::<Arc<dyn ScopeRegistry>>() {
                    registry.clear();
                }
            });
            Ok(Created {
                value,
                reference,
                close: Some(close),
            })
        };
        let value = parent.get_or_create(self.parent_key(context), false, &mut create)?;
        let found = value.type_name();
        value
            .downcast::<Arc<dyn ScopeRegistry>>()
            .map_err(|_| Error::type_mismatch::<Arc<dyn ScopeRegistry>>(found))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crate::registry::CloseFn;

    use super::*;

    fn cached(registry: &Arc<dyn ScopeRegistry>, slot: u64, value: u32) -> Arc<u32> {
        let mut create = move || {
            let (value, reference) = RefMaker::strong()
                .make(Box::new(move || Ok(Erased::new(Arc::new(value)))))
                .unwrap();
            Ok(Created {
                value,
                reference,
                close: None,
            })
        };
        registry
            .get_or_create(ScopeKey::new(slot, ErasedKey::unit()), true, &mut create)
            .unwrap()
            .downcast::<Arc<u32>>()
            .unwrap()
    }

    #[test]
    fn test_no_scope_single_registry() {
        let scope = NoScope::new();
        let a = scope.registry(&()).unwrap();
        let b = scope.registry(&()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_context_scope_value_keyed() {
        let scope = ContextScope::<String>::new();
        let a1 = scope.registry(&"a".to_string()).unwrap();
        let a2 = scope.registry(&"a".to_string()).unwrap();
        let b = scope.registry(&"b".to_string()).unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(scope.len(), 2);
    }

    #[test]
    fn test_context_scope_remove_clears() {
        let scope = ContextScope::<String>::new();
        let registry = scope.registry(&"a".to_string()).unwrap();
        let first = cached(&registry, 1, 7);

        scope.remove(&"a".to_string());
        assert_eq!(scope.len(), 0);

        // A fresh registry, hence a fresh instance.
        let registry = scope.registry(&"a".to_string()).unwrap();
        let second = cached(&registry, 1, 7);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_sub_scope_nested_and_cascading_clear() {
        let parent = Arc::new(ContextScope::<String>::new());
        let sub = SubScope::new(Arc::clone(&parent));

        let ctx = "request".to_string();
        let r1 = sub.registry(&ctx).unwrap();
        let r2 = sub.registry(&ctx).unwrap();
        assert!(Arc::ptr_eq(&r1, &r2));

        let closes = Arc::new(AtomicUsize::new(0));
        let close: CloseFn = {
            let closes = Arc::clone(&closes);
            Arc::new(move |_| {
                closes.fetch_add(1, Ordering::SeqCst);
            })
        };
        let mut create = {
            let close = Arc::clone(&close);
            move || {
                let (value, reference) = RefMaker::strong()
                    .make(Box::new(|| Ok(Erased::new(Arc::new(1_u32)))))
                    .unwrap();
                Ok(Created {
                    value,
                    reference,
                    close: Some(Arc::clone(&close)),
                })
            }
        };
        r1.get_or_create(ScopeKey::new(9, ErasedKey::unit()), true, &mut create)
            .unwrap();

        // Evicting the sub-registry from the parent clears it, closing its
        // entries.
        sub.remove_from_parent(&ctx).unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let r3 = sub.registry(&ctx).unwrap();
        assert!(!Arc::ptr_eq(&r1, &r3));
    }
}
