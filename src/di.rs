//! The public entry surface: builder, binder DSL, and retrieval API.

use std::marker::PhantomData;
use std::sync::Arc;

use bindery_core::erased::{Erased, ErasedKey, Keyable};
use bindery_core::error::{Error, Result};
use bindery_core::key::{BindingKey, TypeInfo};
use bindery_core::reference::RefMaker;
use bindery_core::registry::{CloseFn, Closeable};
use bindery_core::scope::{NoScope, Scope};

use crate::bindings::{Binding, BindingContext, BindingKind, FactoryFn, ProviderFn, RegistryFn};
use crate::builder::{ContainerBuilder, CopyPolicy, OverrideMode};
use crate::container::Container;
use crate::module::Module;
use crate::tree::BindingTree;

/// Downcasts a produced value, mapping failure to [`Error::TypeMismatch`].
fn typed<T>(value: Erased) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
{
    let found = value.type_name();
    value
        .downcast::<T>()
        .map_err(|_| Error::type_mismatch::<T>(found))
}

/// Wraps a typed scope into the erased registry lookup a binding stores.
fn scope_registry_fn<S>(scope: Arc<S>) -> RegistryFn
where
    S: Scope,
    S::Context: Keyable,
{
    Arc::new(move |context: &ErasedKey| {
        let context = context
            .downcast::<S::Context>()
            .ok_or_else(|| Error::type_mismatch::<S::Context>(context.type_name()))?;
        scope.registry(&context)
    })
}

/// A registry lookup for unscoped bindings: one private [`NoScope`],
/// whatever the retrieval context.
fn no_scope_registry_fn() -> RegistryFn {
    let scope = NoScope::new();
    Arc::new(move |_context: &ErasedKey| scope.registry(&()))
}

/// The container handle: retrieval surface over an immutable set of
/// bindings. Cheap to clone.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use bindery::Bindery;
///
/// struct Database {
///     address: String,
/// }
///
/// # fn main() -> bindery::Result<()> {
/// let mut builder = Bindery::builder();
/// builder.bind::<String>().tag("address").to_instance("db.local:5432".to_string())?;
/// builder.bind::<Arc<Database>>().to_singleton(|cx| {
///     Ok(Arc::new(Database {
///         address: cx.instance_tagged::<String>("address")?,
///     }))
/// })?;
/// let bindery = builder.build()?;
///
/// let db = bindery.instance::<Arc<Database>>()?;
/// assert_eq!(db.address, "db.local:5432");
///
/// // Singletons cache: repeat retrievals see the same instance.
/// let again = bindery.instance::<Arc<Database>>()?;
/// assert!(Arc::ptr_eq(&db, &again));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Bindery {
    container: Container,
}

impl Bindery {
    /// Starts building a container.
    #[must_use]
    pub fn builder() -> BinderyBuilder {
        BinderyBuilder {
            inner: ContainerBuilder::new(false),
        }
    }

    pub(crate) const fn from_container(container: Container) -> Self {
        Self { container }
    }

    pub(crate) const fn container(&self) -> &Container {
        &self.container
    }

    /// A view of this container that retrieves under `context`; required for
    /// bindings declared in a scope.
    pub fn on<C>(&self, context: C) -> WithContext
    where
        C: Keyable,
    {
        WithContext {
            bindery: self.clone(),
            context: ErasedKey::new(context),
            context_type: TypeInfo::of::<C>(),
        }
    }

    /// The value bound for `T`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `T` has no binding, plus whatever the binding's
    /// creator raises.
    pub fn instance<T>(&self) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.instance_of(BindingKey::of::<T>(), &ErasedKey::unit())
    }

    /// The value bound for `T` under `tag`.
    ///
    /// # Errors
    ///
    /// See [`instance`](Self::instance).
    pub fn instance_tagged<T>(&self, tag: impl Into<ErasedKey>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.instance_of(BindingKey::of::<T>().with_tag(tag), &ErasedKey::unit())
    }

    /// Like [`instance`](Self::instance), but `None` when `T` has no
    /// binding.
    ///
    /// # Errors
    ///
    /// Everything except [`Error::NotFound`] still propagates.
    pub fn instance_or_none<T>(&self) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.instance_or_none_of(BindingKey::of::<T>(), &ErasedKey::unit())
    }

    /// Like [`instance_tagged`](Self::instance_tagged), but `None` when
    /// nothing matches.
    ///
    /// # Errors
    ///
    /// Everything except [`Error::NotFound`] still propagates.
    pub fn instance_tagged_or_none<T>(&self, tag: impl Into<ErasedKey>) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.instance_or_none_of(BindingKey::of::<T>().with_tag(tag), &ErasedKey::unit())
    }

    /// The value produced by the factory bound for `A -> T`, applied to
    /// `arg`.
    ///
    /// # Errors
    ///
    /// See [`instance`](Self::instance).
    pub fn instance_with_arg<A, T>(&self, arg: A) -> Result<T>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        self.factory::<A, T>()?(arg)
    }

    /// Like [`instance_with_arg`](Self::instance_with_arg), under `tag`.
    ///
    /// # Errors
    ///
    /// See [`instance`](Self::instance).
    pub fn instance_with_arg_tagged<A, T>(&self, tag: impl Into<ErasedKey>, arg: A) -> Result<T>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        self.factory_tagged::<A, T, _>(tag)?(arg)
    }

    /// A provider function for `T`. Each call goes through the binding, so a
    /// provider-bound `T` yields a fresh value per call while a singleton
    /// keeps returning its cached one.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `T` has no binding.
    pub fn provider<T>(&self) -> Result<impl Fn() -> Result<T> + Send + Sync + use<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.provider_of(BindingKey::of::<T>(), &ErasedKey::unit())
    }

    /// A provider function for `T` under `tag`.
    ///
    /// # Errors
    ///
    /// See [`provider`](Self::provider).
    pub fn provider_tagged<T, K>(
        &self,
        tag: K,
    ) -> Result<impl Fn() -> Result<T> + Send + Sync + use<T, K>>
    where
        T: Clone + Send + Sync + 'static,
        K: Into<ErasedKey>,
    {
        self.provider_of(BindingKey::of::<T>().with_tag(tag), &ErasedKey::unit())
    }

    /// Like [`provider`](Self::provider), but `None` when `T` has no
    /// binding.
    ///
    /// # Errors
    ///
    /// Everything except [`Error::NotFound`] still propagates.
    pub fn provider_or_none<T>(
        &self,
    ) -> Result<Option<impl Fn() -> Result<T> + Send + Sync + use<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.provider::<T>() {
            Ok(provider) => Ok(Some(provider)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// A factory function for `A -> T`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no binding matches.
    pub fn factory<A, T>(&self) -> Result<impl Fn(A) -> Result<T> + Send + Sync + use<A, T>>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        self.factory_of(BindingKey::of::<T>().arg::<A>(), &ErasedKey::unit())
    }

    /// A factory function for `A -> T` under `tag`.
    ///
    /// # Errors
    ///
    /// See [`factory`](Self::factory).
    pub fn factory_tagged<A, T, K>(
        &self,
        tag: K,
    ) -> Result<impl Fn(A) -> Result<T> + Send + Sync + use<A, T, K>>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
        K: Into<ErasedKey>,
    {
        self.factory_of(BindingKey::of::<T>().arg::<A>().with_tag(tag), &ErasedKey::unit())
    }

    /// Like [`factory`](Self::factory), but `None` when no binding matches.
    ///
    /// # Errors
    ///
    /// Everything except [`Error::NotFound`] still propagates.
    pub fn factory_or_none<A, T>(
        &self,
    ) -> Result<Option<impl Fn(A) -> Result<T> + Send + Sync + use<A, T>>>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        match self.factory::<A, T>() {
            Ok(factory) => Ok(Some(factory)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// One value per binding producing `T` (whatever the tag), in a
    /// deterministic order.
    ///
    /// # Errors
    ///
    /// Propagates creator failures; an empty result is not an error.
    pub fn all_instances<T>(&self) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.all_instances_of(TypeInfo::any(), &ErasedKey::unit())
    }

    fn instance_of<T>(&self, key: BindingKey, context: &ErasedKey) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let factory = self.container.factory(&key, context, 0)?;
        typed(factory(&ErasedKey::unit())?)
    }

    fn instance_or_none_of<T>(&self, key: BindingKey, context: &ErasedKey) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.container.factory_or_none(&key, context, 0)? {
            None => Ok(None),
            Some(factory) => typed(factory(&ErasedKey::unit())?).map(Some),
        }
    }

    fn provider_of<T>(
        &self,
        key: BindingKey,
        context: &ErasedKey,
    ) -> Result<impl Fn() -> Result<T> + Send + Sync + use<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let factory = self.container.factory(&key, context, 0)?;
        Ok(move || typed(factory(&ErasedKey::unit())?))
    }

    fn factory_of<A, T>(
        &self,
        key: BindingKey,
        context: &ErasedKey,
    ) -> Result<impl Fn(A) -> Result<T> + Send + Sync + use<A, T>>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        let factory = self.container.factory(&key, context, 0)?;
        Ok(move |arg: A| typed(factory(&ErasedKey::new(arg))?))
    }

    fn all_instances_of<T>(&self, context_type: TypeInfo, context: &ErasedKey) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.container
            .all_factories(TypeInfo::of::<T>(), context_type, context)?
            .into_iter()
            .map(|factory| typed(factory(&ErasedKey::unit())?))
            .collect()
    }
}

impl std::fmt::Debug for Bindery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindery")
            .field("container", &self.container)
            .finish()
    }
}

/// A [`Bindery`] view retrieving under a context value, as obtained from
/// [`Bindery::on`].
pub struct WithContext {
    bindery: Bindery,
    context: ErasedKey,
    context_type: TypeInfo,
}

impl WithContext {
    fn key_of<T: 'static>(&self) -> BindingKey {
        let mut key = BindingKey::of::<T>();
        key.context = self.context_type;
        key
    }

    /// See [`Bindery::instance`].
    ///
    /// # Errors
    ///
    /// See [`Bindery::instance`].
    pub fn instance<T>(&self) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.bindery.instance_of(self.key_of::<T>(), &self.context)
    }

    /// See [`Bindery::instance_tagged`].
    ///
    /// # Errors
    ///
    /// See [`Bindery::instance`].
    pub fn instance_tagged<T>(&self, tag: impl Into<ErasedKey>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.bindery
            .instance_of(self.key_of::<T>().with_tag(tag), &self.context)
    }

    /// See [`Bindery::instance_or_none`].
    ///
    /// # Errors
    ///
    /// Everything except [`Error::NotFound`] still propagates.
    pub fn instance_or_none<T>(&self) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.bindery
            .instance_or_none_of(self.key_of::<T>(), &self.context)
    }

    /// See [`Bindery::provider`].
    ///
    /// # Errors
    ///
    /// See [`Bindery::provider`].
    pub fn provider<T>(&self) -> Result<impl Fn() -> Result<T> + Send + Sync + use<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.bindery.provider_of(self.key_of::<T>(), &self.context)
    }

    /// See [`Bindery::factory`].
    ///
    /// # Errors
    ///
    /// See [`Bindery::factory`].
    pub fn factory<A, T>(&self) -> Result<impl Fn(A) -> Result<T> + Send + Sync + use<A, T>>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        self.bindery
            .factory_of(self.key_of::<T>().arg::<A>(), &self.context)
    }

    /// See [`Bindery::all_instances`].
    ///
    /// # Errors
    ///
    /// See [`Bindery::all_instances`].
    pub fn all_instances<T>(&self) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.bindery
            .all_instances_of(self.context_type, &self.context)
    }
}

/// Configures the bindings of a [`Bindery`].
pub struct BinderyBuilder {
    inner: ContainerBuilder,
}

impl BinderyBuilder {
    /// Lets later re-registrations of an existing key override it without an
    /// explicit `overrides(true)` declaration.
    #[must_use]
    pub fn allow_silent_override(mut self) -> Self {
        self.inner.set_silent_override(true);
        self
    }

    /// Starts a binding declaration for the produced type `T`.
    pub fn bind<T>(&mut self) -> Binder<'_, T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Binder {
            builder: &mut self.inner,
            tag: None,
            overrides: None,
            ref_maker: RefMaker::strong(),
            sync: true,
            close: None,
            _produced: PhantomData,
        }
    }

    /// Declares an empty set binding producing `Vec<T>`. Elements are added
    /// with [`in_set`](Self::in_set).
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the usual registration rules.
    pub fn bind_set<T>(&mut self) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.declare_set::<(), T>(None)
    }

    /// Like [`bind_set`](Self::bind_set), under `tag`.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the usual registration rules.
    pub fn bind_set_tagged<T>(&mut self, tag: impl Into<ErasedKey>) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.declare_set::<(), T>(Some(tag.into()))
    }

    /// Declares an empty set binding whose elements take an `A` argument.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the usual registration rules.
    pub fn bind_arg_set<A, T>(&mut self) -> Result<()>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        self.declare_set::<A, T>(None)
    }

    fn declare_set<A, T>(&mut self, tag: Option<ErasedKey>) -> Result<()>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        let mut key = BindingKey::of::<Vec<T>>().arg::<A>();
        key.tag = tag;
        let collect = Arc::new(|values: Vec<Erased>| {
            let collected = values
                .into_iter()
                .map(typed::<T>)
                .collect::<Result<Vec<T>>>()?;
            Ok(Erased::new(collected))
        });
        self.inner.register(key, Binding::set(collect), None)
    }

    /// Adds an element to the set binding declared with
    /// [`bind_set`](Self::bind_set).
    pub fn in_set<T>(&mut self) -> SetBinder<'_, (), T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.element_binder::<(), T>(None)
    }

    /// Adds an element to the set binding declared with
    /// [`bind_set_tagged`](Self::bind_set_tagged).
    pub fn in_set_tagged<T>(&mut self, tag: impl Into<ErasedKey>) -> SetBinder<'_, (), T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.element_binder::<(), T>(Some(tag.into()))
    }

    /// Adds an element to the set binding declared with
    /// [`bind_arg_set`](Self::bind_arg_set).
    pub fn in_arg_set<A, T>(&mut self) -> SetBinder<'_, A, T>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        self.element_binder::<A, T>(None)
    }

    fn element_binder<A, T>(&mut self, tag: Option<ErasedKey>) -> SetBinder<'_, A, T>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        let mut key = BindingKey::of::<Vec<T>>().arg::<A>();
        key.tag = tag;
        SetBinder {
            builder: &mut self.inner,
            key,
            _arg: PhantomData,
            _produced: PhantomData,
        }
    }

    /// Merges a pre-built [`Module`] of registrations, subject to the same
    /// override rules as direct registration. `allow_override` grants the
    /// module permission to declare explicit overrides.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] from the module's registrations, and anything
    /// its initializer raises.
    pub fn import(&mut self, module: Module, allow_override: bool) -> Result<()> {
        let (name, allow_silent, init) = module.into_parts();
        let mode = OverrideMode::get(allow_override, allow_silent);
        let saved = self.inner.begin_import(mode, name)?;
        let result = init(self);
        self.inner.end_import(saved);
        result
    }

    /// Like [`import`](Self::import) (without override permission), but a
    /// module already imported under the same name is skipped.
    ///
    /// # Errors
    ///
    /// See [`import`](Self::import).
    pub fn import_once(&mut self, module: Module) -> Result<()> {
        if self.inner.mark_imported(module.name()) {
            self.import(module, false)
        } else {
            Ok(())
        }
    }

    /// Seeds this container from `parent`'s bindings. `copy` selects which
    /// bindings get an independent cache (copied) instead of sharing the
    /// parent's live one; re-binding an inherited key afterwards follows the
    /// same override rules as any re-registration.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] on key collisions without permission.
    pub fn extend(&mut self, parent: &Bindery, allow_override: bool, copy: &CopyPolicy) -> Result<()> {
        self.inner.extend(parent, allow_override, copy)
    }

    /// Registers a last-resort resolver consulted after normal lookup fails.
    pub fn external_source(&mut self, source: impl crate::bindings::ExternalSource + 'static) {
        self.inner.add_external_source(Arc::new(source));
    }

    /// Registers a callback run exactly once, synchronously, after the build
    /// phase completes and before [`build`](Self::build) returns.
    pub fn on_ready(&mut self, callback: impl FnOnce(&Bindery) -> Result<()> + 'static) {
        self.inner.on_ready(Box::new(callback));
    }

    /// Finalizes the container and runs the ready callbacks (eager
    /// singletons included).
    ///
    /// # Errors
    ///
    /// Propagates ready-callback failures, eager-singleton creation included.
    pub fn build(self) -> Result<Bindery> {
        let (map, callbacks, sources) = self.inner.finish();
        let tree = BindingTree::new(map, sources);
        let bindery = Bindery::from_container(Container::new(tree));
        debug!("container built, running ready callbacks");
        for callback in callbacks {
            callback(&bindery)?;
        }
        Ok(bindery)
    }
}

impl std::fmt::Debug for BinderyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinderyBuilder").finish_non_exhaustive()
    }
}

/// One binding declaration in progress: `bind::<T>()` plus modifiers, closed
/// by a `to_*` strategy call.
pub struct Binder<'a, T> {
    builder: &'a mut ContainerBuilder,
    tag: Option<ErasedKey>,
    overrides: Option<bool>,
    ref_maker: RefMaker,
    sync: bool,
    close: Option<CloseFn>,
    _produced: PhantomData<fn(T)>,
}

impl<T> Binder<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Registers under a tag, keeping it apart from the untagged binding of
    /// the same type.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<ErasedKey>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Declares whether this binding overrides an existing one. `true`
    /// requires an existing binding; `false` (the default under explicit
    /// mode) forbids one.
    #[must_use]
    pub fn overrides(mut self, overrides: bool) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Selects the reference strategy for cached values (strong by default).
    #[must_use]
    pub fn ref_maker(mut self, ref_maker: RefMaker) -> Self {
        self.ref_maker = ref_maker;
        self
    }

    /// Controls whether cache-miss creation is mutually exclusive across
    /// concurrent callers (`true` by default).
    #[must_use]
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Invokes [`Closeable::close`] on cached values of this binding when
    /// they are evicted from their scope.
    #[must_use]
    pub fn closeable(mut self) -> Self
    where
        T: Closeable,
    {
        self.close = Some(Arc::new(|value: &Erased| {
            if let Some(value) = value.downcast_ref::<T>() {
                value.close();
            }
        }));
        self
    }

    fn key(&mut self) -> BindingKey {
        let mut key = BindingKey::of::<T>();
        key.tag = self.tag.take();
        key
    }

    fn register(mut self, key: BindingKey, binding: Binding) -> Result<()> {
        let overrides = self.overrides.take();
        self.builder
            .register(key, binding.with_close(self.close.take()), overrides)
    }

    /// Binds a pre-existing value; every retrieval returns it.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the registration rules.
    pub fn to_instance(mut self, value: T) -> Result<()> {
        let key = self.key();
        self.register(key, Binding::instance(Erased::new(value)))
    }

    /// Binds a creator called on every retrieval; no caching.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the registration rules.
    pub fn to_provider(
        mut self,
        creator: impl Fn(&BindingContext) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()> {
        let key = self.key();
        self.register(key, Binding::provider(erase_provider(creator)))
    }

    /// Binds a creator called once; retrievals share the cached instance.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the registration rules.
    pub fn to_singleton(
        mut self,
        creator: impl Fn(&BindingContext) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()> {
        let key = self.key();
        let binding = Binding::singleton(
            erase_provider(creator),
            no_scope_registry_fn(),
            self.ref_maker.clone(),
            self.sync,
        );
        self.register(key, binding)
    }

    /// Binds a singleton cached per context in `scope`; retrieval then
    /// requires [`Bindery::on`] with a `S::Context` value.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the registration rules.
    pub fn to_singleton_in<S>(
        mut self,
        scope: Arc<S>,
        creator: impl Fn(&BindingContext) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()>
    where
        S: Scope,
        S::Context: Keyable,
    {
        let key = self.key().context::<S::Context>();
        let binding = Binding::singleton(
            erase_provider(creator),
            scope_registry_fn(scope),
            self.ref_maker.clone(),
            self.sync,
        );
        self.register(key, binding)
    }

    /// Binds a singleton created eagerly when the build phase completes,
    /// rather than on first retrieval.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the registration rules.
    pub fn to_eager_singleton(
        mut self,
        creator: impl Fn(&BindingContext) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()> {
        let key = self.key();
        self.register(key, Binding::eager(erase_provider(creator)))
    }

    /// Binds a creator taking an argument, called on every retrieval.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the registration rules.
    pub fn to_factory<A>(
        mut self,
        creator: impl Fn(&BindingContext, A) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()>
    where
        A: Keyable,
    {
        let key = self.key().arg::<A>();
        self.register(key, Binding::factory(erase_factory(creator)))
    }

    /// Binds a multiton: one cached instance per distinct argument value.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the registration rules.
    pub fn to_multiton<A>(
        mut self,
        creator: impl Fn(&BindingContext, A) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()>
    where
        A: Keyable,
    {
        let key = self.key().arg::<A>();
        let binding = Binding::multiton(
            erase_factory(creator),
            no_scope_registry_fn(),
            self.ref_maker.clone(),
            self.sync,
        );
        self.register(key, binding)
    }

    /// Binds a multiton cached per context in `scope`.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] per the registration rules.
    pub fn to_multiton_in<S, A>(
        mut self,
        scope: Arc<S>,
        creator: impl Fn(&BindingContext, A) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()>
    where
        S: Scope,
        S::Context: Keyable,
        A: Keyable,
    {
        let key = self.key().arg::<A>().context::<S::Context>();
        let binding = Binding::multiton(
            erase_factory(creator),
            scope_registry_fn(scope),
            self.ref_maker.clone(),
            self.sync,
        );
        self.register(key, binding)
    }
}

/// Adds one element to a declared set binding.
pub struct SetBinder<'a, A, T> {
    builder: &'a mut ContainerBuilder,
    key: BindingKey,
    _arg: PhantomData<fn(A)>,
    _produced: PhantomData<fn(T)>,
}

impl<A, T> SetBinder<'_, A, T>
where
    A: Keyable,
    T: Clone + Send + Sync + 'static,
{
    fn push(self, element: Binding) -> Result<()> {
        let Some(binding) = self.builder.binding_mut(&self.key) else {
            return Err(Error::overriding(format!(
                "adding to a set requires a set binding declared for {}",
                self.key
            )));
        };
        match &mut binding.kind {
            BindingKind::Set { elements, .. } => {
                elements.push(element);
                Ok(())
            }
            _ => Err(Error::overriding(format!(
                "{} is bound as {}, not as a set",
                self.key,
                binding.name()
            ))),
        }
    }

    /// Adds a pre-existing value as an element.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] if no set binding was declared for the key.
    pub fn to_instance(self, value: T) -> Result<()> {
        self.push(Binding::instance(Erased::new(value)))
    }

    /// Adds a provider element: a fresh value in every snapshot.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] if no set binding was declared for the key.
    pub fn to_provider(
        self,
        creator: impl Fn(&BindingContext) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()> {
        self.push(Binding::provider(erase_provider(creator)))
    }

    /// Adds a singleton element: the same cached value in every snapshot.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] if no set binding was declared for the key.
    pub fn to_singleton(
        self,
        creator: impl Fn(&BindingContext) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()> {
        self.push(Binding::singleton(
            erase_provider(creator),
            no_scope_registry_fn(),
            RefMaker::strong(),
            true,
        ))
    }

    /// Adds a factory element (for argument-taking sets).
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] if no set binding was declared for the key.
    pub fn to_factory(
        self,
        creator: impl Fn(&BindingContext, A) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()> {
        self.push(Binding::factory(erase_factory(creator)))
    }

    /// Adds a multiton element (for argument-taking sets).
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] if no set binding was declared for the key.
    pub fn to_multiton(
        self,
        creator: impl Fn(&BindingContext, A) -> Result<T> + Send + Sync + 'static,
    ) -> Result<()> {
        self.push(Binding::multiton(
            erase_factory(creator),
            no_scope_registry_fn(),
            RefMaker::strong(),
            true,
        ))
    }
}

fn erase_provider<T>(
    creator: impl Fn(&BindingContext) -> Result<T> + Send + Sync + 'static,
) -> ProviderFn
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(move |cx: &BindingContext| creator(cx).map(Erased::new))
}

fn erase_factory<A, T>(
    creator: impl Fn(&BindingContext, A) -> Result<T> + Send + Sync + 'static,
) -> FactoryFn
where
    A: Keyable,
    T: Clone + Send + Sync + 'static,
{
    Arc::new(move |cx: &BindingContext, arg: &ErasedKey| {
        let arg = arg
            .downcast::<A>()
            .ok_or_else(|| Error::type_mismatch::<A>(arg.type_name()))?;
        creator(cx, arg).map(Erased::new)
    })
}
