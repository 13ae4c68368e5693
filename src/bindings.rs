//! Binding strategies and the context handed to their creator functions.
//!
//! A [`Binding`] knows how to produce (or fetch a cached) value for a key.
//! The kinds form a closed sum type dispatched by pattern matching; each kind
//! yields an erased factory closure `Fn(&ErasedKey) -> Result<Erased>`.

use std::sync::Arc;

use parking_lot::Mutex;

use bindery_core::erased::{Erased, ErasedKey, Keyable};
use bindery_core::error::{Error, Result};
use bindery_core::key::BindingKey;
use bindery_core::reference::RefMaker;
use bindery_core::registry::{CloseFn, Created, ScopeKey, ScopeRegistry};
use bindery_core::scope::next_slot;

use crate::di::Bindery;

/// Creator of a no-argument binding, with access to the container.
pub type ProviderFn = Arc<dyn Fn(&BindingContext) -> Result<Erased> + Send + Sync>;

/// Creator of an argument-taking binding.
pub type FactoryFn = Arc<dyn Fn(&BindingContext, &ErasedKey) -> Result<Erased> + Send + Sync>;

/// Resolves the scope registry for the ambient context value. Captured at
/// declaration time, where the scope's context type is still known.
pub type RegistryFn = Arc<dyn Fn(&ErasedKey) -> Result<Arc<dyn ScopeRegistry>> + Send + Sync>;

/// Assembles a set binding's snapshot from its elements' erased values.
pub type CollectFn = Arc<dyn Fn(Vec<Erased>) -> Result<Erased> + Send + Sync>;

/// A resolved factory: what retrieval hands back, and what creators receive
/// when asking for the binding they override.
pub type ErasedFactory = Box<dyn Fn(&ErasedKey) -> Result<Erased> + Send + Sync>;

/// One registered binding: a strategy kind plus an optional eviction hook.
#[derive(Clone)]
pub struct Binding {
    pub(crate) kind: BindingKind,
    pub(crate) close: Option<CloseFn>,
}

#[derive(Clone)]
pub(crate) enum BindingKind {
    /// Always returns the stored, pre-existing value.
    Instance { value: Erased },
    /// Calls the creator on every retrieval; no caching.
    Provider { creator: ProviderFn },
    /// Like `Provider`, but takes an argument.
    Factory { creator: FactoryFn },
    /// One cached instance per scope registry.
    Singleton {
        creator: ProviderFn,
        registry: RegistryFn,
        slot: u64,
        ref_maker: RefMaker,
        sync: bool,
    },
    /// One cached instance per distinct argument value per scope registry.
    Multiton {
        creator: FactoryFn,
        registry: RegistryFn,
        slot: u64,
        ref_maker: RefMaker,
        sync: bool,
    },
    /// Created once by a ready callback when the build phase completes;
    /// memoized in a locked slot rather than a scope registry.
    Eager {
        creator: ProviderFn,
        cell: Arc<Mutex<Option<Erased>>>,
    },
    /// Aggregates element bindings; every retrieval re-invokes each element
    /// in registration order and collects a fresh snapshot.
    Set {
        elements: Vec<Binding>,
        collect: CollectFn,
    },
}

impl Binding {
    pub(crate) fn instance(value: Erased) -> Self {
        Self::of(BindingKind::Instance { value })
    }

    pub(crate) fn provider(creator: ProviderFn) -> Self {
        Self::of(BindingKind::Provider { creator })
    }

    pub(crate) fn factory(creator: FactoryFn) -> Self {
        Self::of(BindingKind::Factory { creator })
    }

    pub(crate) fn singleton(
        creator: ProviderFn,
        registry: RegistryFn,
        ref_maker: RefMaker,
        sync: bool,
    ) -> Self {
        Self::of(BindingKind::Singleton {
            creator,
            registry,
            slot: next_slot(),
            ref_maker,
            sync,
        })
    }

    pub(crate) fn multiton(
        creator: FactoryFn,
        registry: RegistryFn,
        ref_maker: RefMaker,
        sync: bool,
    ) -> Self {
        Self::of(BindingKind::Multiton {
            creator,
            registry,
            slot: next_slot(),
            ref_maker,
            sync,
        })
    }

    pub(crate) fn eager(creator: ProviderFn) -> Self {
        Self::of(BindingKind::Eager {
            creator,
            cell: Arc::new(Mutex::new(None)),
        })
    }

    pub(crate) fn set(collect: CollectFn) -> Self {
        Self::of(BindingKind::Set {
            elements: Vec::new(),
            collect,
        })
    }

    const fn of(kind: BindingKind) -> Self {
        Self { kind, close: None }
    }

    pub(crate) fn with_close(mut self, close: Option<CloseFn>) -> Self {
        self.close = close;
        self
    }

    pub(crate) fn is_eager(&self) -> bool {
        matches!(self.kind, BindingKind::Eager { .. })
    }

    /// The strategy name, used in binding listings and error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match &self.kind {
            BindingKind::Instance { .. } => "instance",
            BindingKind::Provider { .. } => "provider",
            BindingKind::Factory { .. } => "factory",
            BindingKind::Singleton { .. } => "singleton",
            BindingKind::Multiton { .. } => "multiton",
            BindingKind::Eager { .. } => "eager singleton",
            BindingKind::Set { .. } => "set",
        }
    }

    /// An equivalent binding with no retained cache state, or `None` for
    /// stateless kinds that are safe to share as-is.
    ///
    /// A copied singleton/multiton gets a fresh slot identity, so its cache
    /// diverges from the original's even inside a shared registry; a copied
    /// eager singleton gets an empty memo cell (the builder re-arms its ready
    /// callback); a copied set copies each cached element.
    #[must_use]
    pub(crate) fn copied(&self) -> Option<Self> {
        let kind = match &self.kind {
            BindingKind::Instance { .. }
            | BindingKind::Provider { .. }
            | BindingKind::Factory { .. } => return None,
            BindingKind::Singleton {
                creator,
                registry,
                ref_maker,
                sync,
                ..
            } => BindingKind::Singleton {
                creator: Arc::clone(creator),
                registry: Arc::clone(registry),
                slot: next_slot(),
                ref_maker: ref_maker.clone(),
                sync: *sync,
            },
            BindingKind::Multiton {
                creator,
                registry,
                ref_maker,
                sync,
                ..
            } => BindingKind::Multiton {
                creator: Arc::clone(creator),
                registry: Arc::clone(registry),
                slot: next_slot(),
                ref_maker: ref_maker.clone(),
                sync: *sync,
            },
            BindingKind::Eager { creator, .. } => BindingKind::Eager {
                creator: Arc::clone(creator),
                cell: Arc::new(Mutex::new(None)),
            },
            BindingKind::Set { elements, collect } => BindingKind::Set {
                elements: elements
                    .iter()
                    .map(|e| e.copied().unwrap_or_else(|| e.clone()))
                    .collect(),
                collect: Arc::clone(collect),
            },
        };
        Some(Self {
            kind,
            close: self.close.clone(),
        })
    }

    /// Produces the factory function for this binding, bound to a resolution
    /// context.
    pub(crate) fn make_factory(&self, cx: BindingContext) -> ErasedFactory {
        match &self.kind {
            BindingKind::Instance { value } => {
                let value = value.clone();
                Box::new(move |_arg: &ErasedKey| Ok(value.clone()))
            }
            BindingKind::Provider { creator } => {
                let creator = Arc::clone(creator);
                Box::new(move |_arg: &ErasedKey| creator(&cx))
            }
            BindingKind::Factory { creator } => {
                let creator = Arc::clone(creator);
                Box::new(move |arg: &ErasedKey| creator(&cx, arg))
            }
            BindingKind::Singleton {
                creator,
                registry,
                slot,
                ref_maker,
                sync,
            } => {
                let creator = Arc::clone(creator);
                let registry = Arc::clone(registry);
                let ref_maker = ref_maker.clone();
                let close = self.close.clone();
                let (slot, sync) = (*slot, *sync);
                Box::new(move |_arg: &ErasedKey| {
                    let scope_registry = registry(cx.context_key())?;
                    let mut create = || -> Result<Created> {
                        let cx = cx.clone();
                        let creator = Arc::clone(&creator);
                        let (value, reference) =
                            ref_maker.make(Box::new(move || creator(&cx)))?;
                        Ok(Created {
                            value,
                            reference,
                            close: close.clone(),
                        })
                    };
                    scope_registry.get_or_create(
                        ScopeKey::new(slot, ErasedKey::unit()),
                        sync,
                        &mut create,
                    )
                })
            }
            BindingKind::Multiton {
                creator,
                registry,
                slot,
                ref_maker,
                sync,
            } => {
                let creator = Arc::clone(creator);
                let registry = Arc::clone(registry);
                let ref_maker = ref_maker.clone();
                let close = self.close.clone();
                let (slot, sync) = (*slot, *sync);
                Box::new(move |arg: &ErasedKey| {
                    let scope_registry = registry(cx.context_key())?;
                    let mut create = || -> Result<Created> {
                        let cx = cx.clone();
                        let creator = Arc::clone(&creator);
                        let arg = arg.clone();
                        let (value, reference) =
                            ref_maker.make(Box::new(move || creator(&cx, &arg)))?;
                        Ok(Created {
                            value,
                            reference,
                            close: close.clone(),
                        })
                    };
                    scope_registry.get_or_create(
                        ScopeKey::new(slot, arg.clone()),
                        sync,
                        &mut create,
                    )
                })
            }
            BindingKind::Eager { creator, cell } => {
                let creator = Arc::clone(creator);
                let cell = Arc::clone(cell);
                Box::new(move |_arg: &ErasedKey| {
                    let mut slot = cell.lock();
                    if let Some(value) = &*slot {
                        return Ok(value.clone());
                    }
                    let value = creator(&cx)?;
                    *slot = Some(value.clone());
                    Ok(value)
                })
            }
            BindingKind::Set { elements, collect } => {
                let elements = elements.clone();
                let collect = Arc::clone(collect);
                Box::new(move |arg: &ErasedKey| {
                    let element_cx = cx.for_set_element();
                    let mut values = Vec::with_capacity(elements.len());
                    for element in &elements {
                        let factory = element.make_factory(element_cx.clone());
                        values.push(factory(arg)?);
                    }
                    collect(values)
                })
            }
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Binding").field(&self.name()).finish()
    }
}

/// Access to the container from inside a binding's creator function.
///
/// Dereferences to [`Bindery`], so creators retrieve their dependencies the
/// same way any caller does; those retrievals run on the current resolution
/// chain and are therefore cycle-checked. On top of plain retrieval it gives
/// the ambient [`context`](Self::context) value and access to the binding
/// this one overrides.
#[derive(Clone)]
pub struct BindingContext {
    bindery: Bindery,
    key: BindingKey,
    context: ErasedKey,
    level: usize,
    in_set: bool,
}

impl BindingContext {
    pub(crate) fn new(bindery: Bindery, key: BindingKey, context: ErasedKey, level: usize) -> Self {
        Self {
            bindery,
            key,
            context,
            level,
            in_set: false,
        }
    }

    fn for_set_element(&self) -> Self {
        let mut cx = self.clone();
        cx.in_set = true;
        cx
    }

    /// The key this binding was resolved under.
    #[must_use]
    pub const fn key(&self) -> &BindingKey {
        &self.key
    }

    pub(crate) const fn context_key(&self) -> &ErasedKey {
        &self.context
    }

    /// The ambient context value, as supplied by the retrieval.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] if the retrieval supplied a context of a
    /// different type.
    pub fn context<C>(&self) -> Result<C>
    where
        C: Keyable,
    {
        self.context
            .downcast::<C>()
            .ok_or_else(|| Error::type_mismatch::<C>(self.context.type_name()))
    }

    /// The factory of the binding this one overrides.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if this binding does not override anything;
    /// [`Error::Overriding`] inside a set element.
    pub fn overridden_factory(&self) -> Result<ErasedFactory> {
        if self.in_set {
            return Err(Error::overriding(
                "set element bindings cannot access the bindings they override",
            ));
        }
        self.bindery
            .container()
            .factory(&self.key, &self.context, self.level + 1)
    }

    /// Like [`overridden_factory`](Self::overridden_factory), but `None`
    /// instead of [`Error::NotFound`] when nothing is overridden.
    ///
    /// # Errors
    ///
    /// Everything except [`Error::NotFound`] still propagates.
    pub fn overridden_factory_or_none(&self) -> Result<Option<ErasedFactory>> {
        match self.overridden_factory() {
            Ok(factory) => Ok(Some(factory)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The value produced by the binding this one overrides.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if nothing is overridden; [`Error::TypeMismatch`]
    /// if the overridden binding produces a different type.
    pub fn overridden_instance<T>(&self) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let factory = self.overridden_factory()?;
        let value = factory(&ErasedKey::unit())?;
        let found = value.type_name();
        value
            .downcast::<T>()
            .map_err(|_| Error::type_mismatch::<T>(found))
    }

    /// Like [`overridden_instance`](Self::overridden_instance), but `None`
    /// instead of [`Error::NotFound`] when nothing is overridden.
    ///
    /// # Errors
    ///
    /// Everything except [`Error::NotFound`] still propagates.
    pub fn overridden_instance_or_none<T>(&self) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.overridden_factory_or_none()? {
            None => Ok(None),
            Some(factory) => {
                let value = factory(&ErasedKey::unit())?;
                let found = value.type_name();
                value
                    .downcast::<T>()
                    .map(Some)
                    .map_err(|_| Error::type_mismatch::<T>(found))
            }
        }
    }
}

impl std::ops::Deref for BindingContext {
    type Target = Bindery;

    fn deref(&self) -> &Bindery {
        &self.bindery
    }
}

impl std::fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingContext")
            .field("key", &self.key)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// A last-resort resolver, consulted by the container only after normal key
/// lookup fails. Returning `None` preserves the not-found path.
pub trait ExternalSource: Send + Sync {
    fn factory(&self, cx: &BindingContext, key: &BindingKey) -> Option<ErasedFactory>;
}

impl<F> ExternalSource for F
where
    F: Fn(&BindingContext, &BindingKey) -> Option<ErasedFactory> + Send + Sync,
{
    fn factory(&self, cx: &BindingContext, key: &BindingKey) -> Option<ErasedFactory> {
        self(cx, key)
    }
}
