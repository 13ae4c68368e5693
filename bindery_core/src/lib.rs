//! Core primitives of the `bindery` dependency injection container: erased
//! values and keys, the error taxonomy, reference wrappers, scope registries,
//! and scopes.
#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod erased;
pub mod error;
pub mod key;
pub mod reference;
pub mod registry;
pub mod scope;
