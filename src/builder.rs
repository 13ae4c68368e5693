//! Assembling the binding map: override rules, extension, and copy policy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bindery_core::erased::ErasedKey;
use bindery_core::error::{Error, Result};
use bindery_core::key::BindingKey;

use crate::bindings::{Binding, ExternalSource};
use crate::di::Bindery;
use crate::tree::Definition;

/// A callback run exactly once, after the build phase completes and before
/// the constructed [`Bindery`] is handed to the caller.
pub(crate) type ReadyFn = Box<dyn FnOnce(&Bindery) -> Result<()>>;

/// The override permission in force while registering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OverrideMode {
    /// Re-registrations override silently; explicit declarations are checked.
    AllowSilent,
    /// Overriding requires an explicit `overrides(true)` declaration.
    AllowExplicit,
    /// No overriding at all; explicit declarations are rejected.
    Forbid,
}

impl OverrideMode {
    pub(crate) fn get(allow: bool, silent: bool) -> Self {
        if !allow {
            Self::Forbid
        } else if silent {
            Self::AllowSilent
        } else {
            Self::AllowExplicit
        }
    }

    fn is_allowed(self) -> bool {
        !matches!(self, Self::Forbid)
    }

    /// Resolves a binding's overriding declaration (`Some(true)` = must,
    /// `Some(false)` = must not, `None` = may) under this mode.
    fn must(self, overrides: Option<bool>) -> Result<Option<bool>> {
        match self {
            Self::AllowSilent => Ok(overrides),
            Self::AllowExplicit => Ok(Some(overrides.unwrap_or(false))),
            Self::Forbid => {
                if overrides == Some(true) {
                    Err(Error::overriding("overriding has been forbidden"))
                } else {
                    Ok(Some(false))
                }
            }
        }
    }
}

/// Which bindings a child container copies (cache reset) from the parent it
/// extends, as opposed to sharing live.
#[derive(Debug, Clone, Default)]
pub enum CopyPolicy {
    /// Share every parent binding, caches included.
    #[default]
    None,
    /// Copy every parent binding; the child gets independent caches.
    All,
    /// Copy everything except the named keys.
    AllBut(Vec<BindingKey>),
    /// Copy only the named keys.
    Only(Vec<BindingKey>),
}

impl CopyPolicy {
    fn is_copied(&self, key: &BindingKey) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::AllBut(except) => !except.contains(key),
            Self::Only(keys) => keys.contains(key),
        }
    }
}

/// Accumulates binding registrations and enforces the override invariants,
/// synchronously, at registration time.
pub(crate) struct ContainerBuilder {
    mode: OverrideMode,
    module: Option<String>,
    map: HashMap<BindingKey, Vec<Definition>>,
    callbacks: Vec<ReadyFn>,
    external_sources: Vec<Arc<dyn ExternalSource>>,
    imported: HashSet<String>,
}

impl ContainerBuilder {
    pub(crate) fn new(silent_override: bool) -> Self {
        Self {
            mode: OverrideMode::get(true, silent_override),
            module: None,
            map: HashMap::new(),
            callbacks: Vec::new(),
            external_sources: Vec::new(),
            imported: HashSet::new(),
        }
    }

    pub(crate) fn set_silent_override(&mut self, silent: bool) {
        self.mode = OverrideMode::get(true, silent);
    }

    fn check_overrides(&self, key: &BindingKey, overrides: Option<bool>) -> Result<()> {
        match self.mode.must(overrides)? {
            Some(true) if !self.map.contains_key(key) => Err(Error::overriding(format!(
                "binding {key} must override an existing binding"
            ))),
            Some(false) if self.map.contains_key(key) => Err(Error::overriding(format!(
                "binding {key} must not override an existing binding"
            ))),
            _ => Ok(()),
        }
    }

    /// Registers `binding` under `key`, pushing onto the front of the key's
    /// override chain.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] on a duplicate registration without permission,
    /// or on an explicit override with nothing to override.
    pub(crate) fn register(
        &mut self,
        key: BindingKey,
        binding: Binding,
        overrides: Option<bool>,
    ) -> Result<()> {
        self.check_overrides(&key, overrides)?;
        trace!(key = %key, binding = binding.name(), "register");

        if binding.is_eager() {
            self.arm_eager(key.clone());
        }

        let definition = Definition::new(binding, self.module.clone());
        self.map.entry(key).or_default().insert(0, definition);
        Ok(())
    }

    /// Mutable access to the topmost binding for `key`; used to add elements
    /// to set bindings.
    pub(crate) fn binding_mut(&mut self, key: &BindingKey) -> Option<&mut Binding> {
        self.map
            .get_mut(key)
            .and_then(|chain| chain.first_mut())
            .map(|definition| &mut definition.binding)
    }

    /// Registers the ready callback that creates an eager singleton when the
    /// build phase completes.
    fn arm_eager(&mut self, key: BindingKey) {
        self.callbacks.push(Box::new(move |bindery: &Bindery| {
            let factory = bindery.container().factory(&key, &ErasedKey::unit(), 0)?;
            factory(&ErasedKey::unit())?;
            Ok(())
        }));
    }

    /// Seeds this builder from the bindings of `parent`, per `copy`.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] if inherited keys collide with local ones and
    /// `allow_override` is false, or if overriding is forbidden here.
    pub(crate) fn extend(
        &mut self,
        parent: &Bindery,
        allow_override: bool,
        copy: &CopyPolicy,
    ) -> Result<()> {
        if allow_override && !self.mode.is_allowed() {
            return Err(Error::overriding("overriding has been forbidden"));
        }

        let parent_tree = parent.container().tree();
        for (key, chain) in parent_tree.bindings() {
            if !allow_override {
                self.check_overrides(key, None)?;
            }

            let inherited: Vec<Definition> = if copy.is_copied(key) {
                chain
                    .iter()
                    .map(|definition| {
                        let binding = definition
                            .binding
                            .copied()
                            .unwrap_or_else(|| definition.binding.clone());
                        if binding.is_eager() {
                            // The copy has an empty memo; it must be created
                            // anew when this container becomes ready.
                            self.arm_eager(key.clone());
                        }
                        Definition {
                            binding,
                            from_module: definition.from_module.clone(),
                            tree: None,
                        }
                    })
                    .collect()
            } else {
                chain
                    .iter()
                    .map(|definition| Definition {
                        binding: definition.binding.clone(),
                        from_module: definition.from_module.clone(),
                        // Shared definitions keep resolving against the tree
                        // they were declared in.
                        tree: Some(
                            definition
                                .tree
                                .clone()
                                .unwrap_or_else(|| Arc::clone(parent_tree)),
                        ),
                    })
                    .collect()
            };

            self.map.insert(key.clone(), inherited);
        }
        Ok(())
    }

    pub(crate) fn on_ready(&mut self, callback: ReadyFn) {
        self.callbacks.push(callback);
    }

    pub(crate) fn add_external_source(&mut self, source: Arc<dyn ExternalSource>) {
        self.external_sources.push(source);
    }

    /// Switches to a module's override mode and name, returning what to hand
    /// back to [`end_import`](Self::end_import). Module imports run their
    /// registrations between the two calls.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] if this builder forbids overriding but the
    /// import asks for it.
    pub(crate) fn begin_import(
        &mut self,
        mode: OverrideMode,
        module: String,
    ) -> Result<(OverrideMode, Option<String>)> {
        if !self.mode.is_allowed() && mode.is_allowed() {
            return Err(Error::overriding("overriding has been forbidden"));
        }
        Ok((
            std::mem::replace(&mut self.mode, mode),
            std::mem::replace(&mut self.module, Some(module)),
        ))
    }

    pub(crate) fn end_import(&mut self, saved: (OverrideMode, Option<String>)) {
        (self.mode, self.module) = saved;
    }

    /// Records that `name` was imported; returns `false` if it already was.
    pub(crate) fn mark_imported(&mut self, name: &str) -> bool {
        self.imported.insert(name.to_string())
    }

    pub(crate) fn finish(
        self,
    ) -> (
        HashMap<BindingKey, Vec<Definition>>,
        Vec<ReadyFn>,
        Vec<Arc<dyn ExternalSource>>,
    ) {
        (self.map, self.callbacks, self.external_sources)
    }
}
