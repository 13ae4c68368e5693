//! The immutable binding tree a container resolves against.

use std::collections::HashMap;
use std::sync::Arc;

use bindery_core::key::{BindingKey, TypeInfo};

use crate::bindings::{Binding, ExternalSource};

/// One entry in a key's override chain.
///
/// `tree` pins a definition inherited from a parent container to that
/// parent's tree: a shared binding keeps resolving its own dependencies
/// against the container it was declared in, so a child override of one of
/// those dependencies does not leak into the parent's objects. Locally
/// declared definitions leave it `None` and resolve against whichever tree is
/// being queried.
#[derive(Clone)]
pub(crate) struct Definition {
    pub(crate) binding: Binding,
    pub(crate) from_module: Option<String>,
    pub(crate) tree: Option<Arc<BindingTree>>,
}

impl Definition {
    pub(crate) fn new(binding: Binding, from_module: Option<String>) -> Self {
        Self {
            binding,
            from_module,
            tree: None,
        }
    }
}

/// The resolved, immutable map of binding chains plus external sources.
pub(crate) struct BindingTree {
    bindings: HashMap<BindingKey, Vec<Definition>>,
    external_sources: Vec<Arc<dyn ExternalSource>>,
}

impl BindingTree {
    pub(crate) fn new(
        bindings: HashMap<BindingKey, Vec<Definition>>,
        external_sources: Vec<Arc<dyn ExternalSource>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bindings,
            external_sources,
        })
    }

    pub(crate) fn external_sources(&self) -> &[Arc<dyn ExternalSource>] {
        &self.external_sources
    }

    pub(crate) fn bindings(&self) -> &HashMap<BindingKey, Vec<Definition>> {
        &self.bindings
    }

    /// Finds the definition for `key` at the given override depth (0 is the
    /// topmost registration). Exact lookup first; if the requested context
    /// type has no chain at all, the any-context variant of the key is tried.
    pub(crate) fn find(&self, key: &BindingKey, level: usize) -> Option<(BindingKey, &Definition)> {
        if let Some(chain) = self.bindings.get(key) {
            return chain.get(level).map(|d| (key.clone(), d));
        }
        if !key.context.is_any() {
            let fallback = key.clone().in_any_context();
            if let Some(chain) = self.bindings.get(&fallback) {
                return chain.get(level).map(|d| (fallback, d));
            }
        }
        None
    }

    /// All topmost definitions producing `produced` with a unit argument,
    /// visible from a retrieval whose context type is `context`.
    pub(crate) fn find_all_produced(
        &self,
        produced: TypeInfo,
        context: TypeInfo,
    ) -> Vec<(BindingKey, &Definition)> {
        let mut found: Vec<(BindingKey, &Definition)> = self
            .bindings
            .iter()
            .filter(|(key, _)| {
                key.produced == produced
                    && key.arg.is_unit()
                    && (key.context.is_any() || key.context == context)
            })
            .filter_map(|(key, chain)| chain.first().map(|d| (key.clone(), d)))
            .collect();
        // Deterministic order: the map itself has none.
        found.sort_by_key(|(key, _)| format!("{key}"));
        found
    }

    /// One line per registered binding, for error messages.
    pub(crate) fn description(&self) -> String {
        let mut lines: Vec<String> = self
            .bindings
            .iter()
            .map(|(key, chain)| {
                let binding = chain.first().map_or("?", |d| d.binding.name());
                match chain.first().and_then(|d| d.from_module.as_deref()) {
                    Some(module) => format!("  {key} with {binding} (module {module})"),
                    None => format!("  {key} with {binding}"),
                }
            })
            .collect();
        lines.sort_unstable();
        lines.join("\n")
    }
}

impl std::fmt::Debug for BindingTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingTree")
            .field("bindings", &self.bindings.len())
            .field("external_sources", &self.external_sources.len())
            .finish()
    }
}
