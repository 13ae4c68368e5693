//! A container slot wired after construction.

use std::sync::OnceLock;

use bindery_core::erased::Keyable;
use bindery_core::error::{Error, Result};

use crate::di::Bindery;

/// A [`Bindery`] handle that can be passed around before the container
/// exists. Retrievals fail with [`Error::NotReady`] until [`set`](Self::set)
/// wires the real container in; afterwards they behave exactly like
/// retrievals on the container itself.
#[derive(Debug, Default)]
pub struct LateBindery {
    slot: OnceLock<Bindery>,
}

impl LateBindery {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    /// Wires the container in. May be called once.
    ///
    /// # Errors
    ///
    /// [`Error::Overriding`] if the container was already set.
    pub fn set(&self, bindery: Bindery) -> Result<()> {
        self.slot
            .set(bindery)
            .map_err(|_| Error::overriding("the late container has already been set"))
    }

    /// Returns `true` once the container has been wired in.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }

    /// The wired container.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] before [`set`](Self::set) was called.
    pub fn get(&self) -> Result<&Bindery> {
        self.slot
            .get()
            .ok_or(Error::NotReady("the late container"))
    }

    /// See [`Bindery::instance`].
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] before the container is set; afterwards see
    /// [`Bindery::instance`].
    pub fn instance<T>(&self) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get()?.instance()
    }

    /// See [`Bindery::instance_tagged`].
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] before the container is set; afterwards see
    /// [`Bindery::instance`].
    pub fn instance_tagged<T>(&self, tag: impl Into<bindery_core::erased::ErasedKey>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get()?.instance_tagged(tag)
    }

    /// See [`Bindery::provider`].
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] before the container is set; afterwards see
    /// [`Bindery::provider`].
    pub fn provider<T>(&self) -> Result<impl Fn() -> Result<T> + Send + Sync + use<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get()?.provider()
    }

    /// See [`Bindery::factory`].
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] before the container is set; afterwards see
    /// [`Bindery::factory`].
    pub fn factory<A, T>(&self) -> Result<impl Fn(A) -> Result<T> + Send + Sync + use<A, T>>
    where
        A: Keyable,
        T: Clone + Send + Sync + 'static,
    {
        self.get()?.factory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_before_set() {
        let late = LateBindery::new();
        assert!(!late.is_set());

        let err = late.instance::<String>().unwrap_err();
        assert!(err.is_not_ready());
        // Distinguishable from a missing binding.
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_resolves_after_set() {
        let late = LateBindery::new();

        let mut builder = Bindery::builder();
        builder
            .bind::<String>()
            .to_instance("wired".to_string())
            .unwrap();
        late.set(builder.build().unwrap()).unwrap();

        assert!(late.is_set());
        assert_eq!(late.instance::<String>().unwrap(), "wired");
    }

    #[test]
    fn test_set_twice_fails() {
        let late = LateBindery::new();
        late.set(Bindery::builder().build().unwrap()).unwrap();
        let err = late.set(Bindery::builder().build().unwrap()).unwrap_err();
        assert!(err.is_overriding());
    }
}
