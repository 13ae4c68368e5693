//! Key resolution, override-chain walking, and dependency-loop detection.

use std::sync::Arc;

use bindery_core::erased::ErasedKey;
use bindery_core::error::{Error, Result};
use bindery_core::key::{BindingKey, TypeInfo};

use crate::bindings::{BindingContext, ErasedFactory};
use crate::di::Bindery;
use crate::tree::{BindingTree, Definition};

/// One step of an in-flight resolution chain.
///
/// Every transitive dependency lookup derives a child container whose node
/// points back here, so the chain grows with the construction path and is
/// dropped with it. Chains are per resolution call; concurrent resolutions
/// never share one.
struct Node {
    key: BindingKey,
    level: usize,
    parent: Option<Arc<Node>>,
}

impl Node {
    /// Fails with [`Error::DependencyLoop`] if `(key, level)` is already on
    /// the chain, reporting the path from its first occurrence to the repeat.
    fn check(&self, key: &BindingKey, level: usize) -> Result<()> {
        let mut on_chain = false;
        let mut node = self;
        loop {
            if node.key == *key && node.level == level {
                on_chain = true;
                break;
            }
            match node.parent.as_deref() {
                Some(parent) => node = parent,
                None => break,
            }
        }
        if !on_chain {
            return Ok(());
        }

        // Collect tip-to-root until (and including) the repeated key, then
        // flip to get the path in construction order.
        let mut path = Vec::new();
        let mut node = self;
        loop {
            path.push(node.key.clone());
            if node.key == *key && node.level == level {
                break;
            }
            match node.parent.as_deref() {
                Some(parent) => node = parent,
                None => break,
            }
        }
        path.reverse();
        Err(Error::dependency_loop(path))
    }
}

/// Resolves [`BindingKey`]s against a [`BindingTree`].
///
/// Cloning is cheap; a clone shares the tree and the current resolution
/// chain.
#[derive(Clone)]
pub struct Container {
    tree: Arc<BindingTree>,
    node: Option<Arc<Node>>,
}

impl Container {
    pub(crate) fn new(tree: Arc<BindingTree>) -> Self {
        Self { tree, node: None }
    }

    pub(crate) fn tree(&self) -> &Arc<BindingTree> {
        &self.tree
    }

    fn check_node(&self, key: &BindingKey, level: usize) -> Result<()> {
        match &self.node {
            Some(node) => node.check(key, level),
            None => Ok(()),
        }
    }

    /// The binding context a matched definition's factory runs under:
    /// a child container extending the resolution chain by `key`, resolving
    /// against `tree`.
    fn binding_context(
        &self,
        key: BindingKey,
        context: ErasedKey,
        tree: Arc<BindingTree>,
        level: usize,
    ) -> BindingContext {
        let node = Arc::new(Node {
            key: key.clone(),
            level,
            parent: self.node.clone(),
        });
        let container = Self {
            tree,
            node: Some(node),
        };
        BindingContext::new(Bindery::from_container(container), key, context, level)
    }

    fn factory_for(
        &self,
        real_key: BindingKey,
        definition: &Definition,
        context: ErasedKey,
        level: usize,
    ) -> ErasedFactory {
        let tree = definition
            .tree
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.tree));
        let cx = self.binding_context(real_key, context, tree, level);
        definition.binding.make_factory(cx)
    }

    /// Resolves `key` at override depth `level` to a factory function.
    ///
    /// # Errors
    ///
    /// [`Error::DependencyLoop`] if the key is already under construction on
    /// this chain; [`Error::NotFound`] if neither the tree nor any external
    /// source can answer.
    pub fn factory(
        &self,
        key: &BindingKey,
        context: &ErasedKey,
        level: usize,
    ) -> Result<ErasedFactory> {
        if let Some((real_key, definition)) = self.tree.find(key, level) {
            self.check_node(key, level)?;
            trace!(key = %key, binding = definition.binding.name(), "resolve");
            return Ok(self.factory_for(real_key, definition, context.clone(), level));
        }

        let cx = self.binding_context(key.clone(), context.clone(), Arc::clone(&self.tree), level);
        for source in self.tree.external_sources() {
            if let Some(factory) = source.factory(&cx, key) {
                self.check_node(key, level)?;
                trace!(key = %key, "resolved by external source");
                return Ok(factory);
            }
        }

        debug!(key = %key, "binding not found");
        Err(Error::not_found(key.clone(), self.tree.description()))
    }

    /// Like [`factory`](Self::factory), but `None` instead of
    /// [`Error::NotFound`].
    ///
    /// # Errors
    ///
    /// Everything except [`Error::NotFound`] still propagates.
    pub fn factory_or_none(
        &self,
        key: &BindingKey,
        context: &ErasedKey,
        level: usize,
    ) -> Result<Option<ErasedFactory>> {
        match self.factory(key, context, level) {
            Ok(factory) => Ok(Some(factory)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// One factory per topmost binding producing `produced` (unit argument),
    /// visible from a retrieval whose context type is `context_type`.
    ///
    /// # Errors
    ///
    /// [`Error::DependencyLoop`] if any matched key is already under
    /// construction on this chain.
    pub fn all_factories(
        &self,
        produced: TypeInfo,
        context_type: TypeInfo,
        context: &ErasedKey,
    ) -> Result<Vec<ErasedFactory>> {
        let matches = self.tree.find_all_produced(produced, context_type);
        let mut factories = Vec::with_capacity(matches.len());
        for (real_key, definition) in matches {
            self.check_node(&real_key, 0)?;
            factories.push(self.factory_for(real_key, definition, context.clone(), 0));
        }
        Ok(factories)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}
