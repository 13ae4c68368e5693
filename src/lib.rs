//! A type-keyed dependency injection container.
//!
//! Bindings are registered under a composite key (context type, argument
//! type, produced type, tag) through a builder, then retrieved through
//! [`Bindery`]. Strategies cover the usual lifecycles: providers and
//! factories create on every retrieval, singletons and multitons cache
//! through pluggable scopes and references, eager singletons are created when
//! the build phase completes, and set bindings aggregate several bindings of
//! one type. Containers can extend one another with per-binding copy or
//! share semantics, and re-registrations are governed by an explicit override
//! policy.
#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[macro_use]
pub(crate) mod macros;

pub mod bindings;
pub mod builder;
pub mod container;
pub mod di;
pub mod late;
pub mod module;

pub(crate) mod tree;

pub use bindery_core::erased::{Erased, ErasedKey, Keyable};
pub use bindery_core::error::{Error, Result};
pub use bindery_core::key::{BindingKey, TypeInfo};
pub use bindery_core::reference::{RefMaker, Reference};
pub use bindery_core::registry::{
    Closeable, MultiItemRegistry, ScopeKey, ScopeRegistry, SingleItemRegistry,
};
pub use bindery_core::scope::{ContextScope, NoScope, Scope, SubScope};

pub use bindings::{BindingContext, ErasedFactory, ExternalSource};
pub use builder::CopyPolicy;
pub use container::Container;
pub use di::{Binder, Bindery, BinderyBuilder, WithContext};
pub use late::LateBindery;
pub use module::Module;
