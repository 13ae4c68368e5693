//! Opaque values with erased type information.
//!
//! Two erased forms exist: [`Erased`] carries any clonable value and is what
//! binding factories produce and scope registries cache; [`ErasedKey`]
//! additionally dispatches equality, hashing, and debug formatting through the
//! erasure, so it can serve as a map key. Binding tags, factory arguments, and
//! scope context values all travel as [`ErasedKey`].

use std::any::{Any, TypeId, type_name};
use std::hash::{Hash, Hasher};

/// Marker for types usable as erased lookup keys (tags, arguments, scope
/// contexts). Blanket-implemented; never implement it manually.
pub trait Keyable: Any + Eq + Hash + Clone + std::fmt::Debug + Send + Sync {}

impl<T> Keyable for T where T: Any + Eq + Hash + Clone + std::fmt::Debug + Send + Sync {}

/// Object-safe clone for `?Sized` erased values.
trait CloneBoxed: Any + Send + Sync {
    fn clone_boxed(&self) -> Box<dyn CloneBoxed + Send + Sync>;
}

impl<T> CloneBoxed for T
where
    T: Any + Clone + Send + Sync,
{
    fn clone_boxed(&self) -> Box<dyn CloneBoxed + Send + Sync> {
        Box::new(self.clone())
    }
}

/// A value of an arbitrary `Clone + Send + Sync + 'static` type, with the
/// concrete type name retained for diagnostics.
pub struct Erased {
    boxed: Box<dyn CloneBoxed + Send + Sync>,
    name: &'static str,
}

impl Erased {
    /// Wraps `value`, erasing its type.
    #[must_use]
    pub fn new<T>(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self {
            boxed: Box::new(value),
            name: type_name::<T>(),
        }
    }

    /// The name of the erased concrete type, for diagnostics only.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if the erased value is of type `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// A view of the erased value as [`Any`].
    #[must_use]
    pub fn as_any(&self) -> &(dyn Any + Send + Sync) {
        &*self.boxed
    }

    /// Borrows the value as `T`, or `None` if the types do not match.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    /// Recovers the value as `T`.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged if the erased value is not a `T`.
    pub fn downcast<T>(self) -> Result<T, Self>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.is::<T>() {
            #[expect(clippy::missing_panics_doc, reason = "type was checked above")]
            let concrete = (self.boxed as Box<dyn Any + Send + Sync>)
                .downcast::<T>()
                .expect("the boxed value was checked to be a `T`");
            Ok(*concrete)
        } else {
            Err(self)
        }
    }
}

impl Clone for Erased {
    fn clone(&self) -> Self {
        Self {
            boxed: self.boxed.clone_boxed(),
            name: self.name,
        }
    }
}

impl std::fmt::Debug for Erased {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Erased")
            .field("type", &self.name)
            .finish_non_exhaustive()
    }
}

/// Object-safe face of [`Keyable`].
trait DynKey: Any + Send + Sync {
    fn as_any(&self) -> &(dyn Any + Send + Sync);
    fn type_name_dyn(&self) -> &'static str;
    fn eq_dyn(&self, other: &dyn DynKey) -> bool;
    fn hash_dyn(&self, state: &mut dyn Hasher);
    fn clone_dyn(&self) -> Box<dyn DynKey + Send + Sync>;
    fn fmt_dyn(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result;
}

impl<T> DynKey for T
where
    T: Keyable,
{
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn type_name_dyn(&self) -> &'static str {
        type_name::<T>()
    }

    fn eq_dyn(&self, other: &dyn DynKey) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|o| self == o)
    }

    fn hash_dyn(&self, mut state: &mut dyn Hasher) {
        // The concrete type takes part in the hash so that equal byte patterns
        // of different types stay apart.
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn clone_dyn(&self) -> Box<dyn DynKey + Send + Sync> {
        Box::new(self.clone())
    }

    fn fmt_dyn(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An erased value with value-equality and hashing, usable as a map key.
pub struct ErasedKey(Box<dyn DynKey + Send + Sync>);

impl ErasedKey {
    /// Wraps `value`, erasing its type.
    #[must_use]
    pub fn new<T>(value: T) -> Self
    where
        T: Keyable,
    {
        Self(Box::new(value))
    }

    /// The `()` key, used where no tag, argument, or context applies.
    #[must_use]
    pub fn unit() -> Self {
        Self::new(())
    }

    /// The name of the erased concrete type, for diagnostics only.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.0.type_name_dyn()
    }

    /// Borrows the key value as `T`, or `None` if the types do not match.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }

    /// Clones the key value out as `T`, or `None` if the types do not match.
    #[must_use]
    pub fn downcast<T>(&self) -> Option<T>
    where
        T: Keyable,
    {
        self.downcast_ref::<T>().cloned()
    }
}

impl Clone for ErasedKey {
    fn clone(&self) -> Self {
        Self(self.0.clone_dyn())
    }
}

impl PartialEq for ErasedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_dyn(&*other.0)
    }
}

impl Eq for ErasedKey {}

impl Hash for ErasedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_dyn(state);
    }
}

impl std::fmt::Debug for ErasedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt_dyn(f)
    }
}

macro_rules! impl_from_key {
    ($($ty:ty),* $(,)?) => {$(
        impl From<$ty> for ErasedKey {
            fn from(value: $ty) -> Self {
                Self::new(value)
            }
        }
    )*};
}

impl_from_key!(&'static str, String, bool, char, i32, i64, u32, u64, usize);

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;

    #[allow(dead_code)]
    fn test_implements_send_and_sync() -> (impl Send + Sync, impl Send + Sync) {
        (Erased::new("Hello".to_string()), ErasedKey::new(42_u32))
    }

    #[test]
    fn test_downcast() {
        let erased = Erased::new("Hello".to_string());
        assert_eq!(erased.type_name(), type_name::<String>());
        let got = erased.downcast::<String>().unwrap();
        assert_eq!(got, "Hello");
    }

    #[test]
    fn test_downcast_err_keeps_value() {
        let erased = Erased::new("Hello".to_string());
        let err = erased.downcast::<i32>().unwrap_err();
        assert_eq!(err.downcast::<String>().unwrap(), "Hello");
    }

    #[test]
    fn test_clone_is_deep() {
        let a = Arc::new(100);
        let erased = Erased::new(Arc::clone(&a));
        assert_eq!(Arc::strong_count(&a), 2);

        let cloned = erased.clone();
        assert_eq!(Arc::strong_count(&a), 3);

        drop(cloned);
        drop(erased);
        assert_eq!(Arc::strong_count(&a), 1);
    }

    #[test]
    fn test_key_equality_same_type() {
        assert_eq!(ErasedKey::from("name"), ErasedKey::from("name"));
        assert_ne!(ErasedKey::from("name"), ErasedKey::from("other"));
    }

    #[test]
    fn test_key_equality_across_types() {
        // Same textual content, different concrete types.
        assert_ne!(ErasedKey::from("42"), ErasedKey::from(42_i32));
        assert_ne!(ErasedKey::from(42_i32), ErasedKey::from(42_u32));
    }

    #[test]
    fn test_key_as_map_key() {
        let mut map = HashMap::new();
        map.insert(ErasedKey::from("a"), 1);
        map.insert(ErasedKey::from(7_u32), 2);
        map.insert(ErasedKey::unit(), 3);

        assert_eq!(map.get(&ErasedKey::from("a")), Some(&1));
        assert_eq!(map.get(&ErasedKey::from(7_u32)), Some(&2));
        assert_eq!(map.get(&ErasedKey::unit()), Some(&3));
        assert_eq!(map.get(&ErasedKey::from("b")), None);
    }

    #[test]
    fn test_key_downcast() {
        let key = ErasedKey::from("name");
        assert_eq!(key.downcast::<&'static str>(), Some("name"));
        assert_eq!(key.downcast_ref::<i32>(), None);
    }
}
