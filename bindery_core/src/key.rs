//! Composite keys identifying binding slots.

use std::any::{TypeId, type_name};

use crate::erased::ErasedKey;

/// Sentinel behind [`TypeInfo::any`]. Never instantiated; only its [`TypeId`]
/// is used.
enum AnySentinel {}

/// Identity of a Rust type inside a [`BindingKey`]: the [`TypeId`] plus a
/// display name for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
}

impl TypeInfo {
    /// The identity of `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// The wildcard identity: a context or argument slot holding this value
    /// matches any requested type.
    #[must_use]
    pub fn any() -> Self {
        Self {
            id: TypeId::of::<AnySentinel>(),
            name: "Any",
        }
    }

    /// The identity of `()`, the argument of all no-argument bindings.
    #[must_use]
    pub fn unit() -> Self {
        Self::of::<()>()
    }

    /// Returns `true` if this is the wildcard identity.
    #[must_use]
    pub fn is_any(self) -> bool {
        self.id == TypeId::of::<AnySentinel>()
    }

    /// Returns `true` if this is the identity of `()`.
    #[must_use]
    pub fn is_unit(self) -> bool {
        self.id == TypeId::of::<()>()
    }

    /// The display name of the type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.name
    }
}

/// The immutable composite identity one binding is registered and looked up
/// under: context type, argument type, produced type, and an optional tag.
///
/// Two keys are equal iff all four components are equal; there is no subtype
/// matching. The only wildcard is the explicit [`TypeInfo::any`] sentinel in
/// the context or argument slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub context: TypeInfo,
    pub arg: TypeInfo,
    pub produced: TypeInfo,
    pub tag: Option<ErasedKey>,
}

impl BindingKey {
    /// A key producing `T` with no tag, unit argument, and wildcard context.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            context: TypeInfo::any(),
            arg: TypeInfo::unit(),
            produced: TypeInfo::of::<T>(),
            tag: None,
        }
    }

    /// Replaces the context type with `C`.
    #[must_use]
    pub fn context<C: 'static>(mut self) -> Self {
        self.context = TypeInfo::of::<C>();
        self
    }

    /// Replaces the argument type with `A`.
    #[must_use]
    pub fn arg<A: 'static>(mut self) -> Self {
        self.arg = TypeInfo::of::<A>();
        self
    }

    /// Attaches a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<ErasedKey>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// The same key with its context slot replaced by the wildcard.
    #[must_use]
    pub fn in_any_context(mut self) -> Self {
        self.context = TypeInfo::any();
        self
    }
}

impl std::fmt::Display for BindingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.arg.is_unit() {
            write!(f, "{}", self.produced.name())?;
        } else {
            write!(f, "{} -> {}", self.arg.name(), self.produced.name())?;
        }
        if let Some(tag) = &self.tag {
            write!(f, " (tag = {tag:?})")?;
        }
        if !self.context.is_any() {
            write!(f, " in context {}", self.context.name())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_info_identity() {
        assert_eq!(TypeInfo::of::<String>(), TypeInfo::of::<String>());
        assert_ne!(TypeInfo::of::<String>(), TypeInfo::of::<&str>());
        assert!(TypeInfo::any().is_any());
        assert!(!TypeInfo::of::<String>().is_any());
        assert!(TypeInfo::unit().is_unit());
    }

    #[test]
    fn test_key_equality() {
        assert_eq!(BindingKey::of::<String>(), BindingKey::of::<String>());
        assert_ne!(BindingKey::of::<String>(), BindingKey::of::<i32>());
        assert_ne!(
            BindingKey::of::<String>(),
            BindingKey::of::<String>().with_tag("name"),
        );
        assert_eq!(
            BindingKey::of::<String>().with_tag("name"),
            BindingKey::of::<String>().with_tag("name"),
        );
        assert_ne!(
            BindingKey::of::<String>(),
            BindingKey::of::<String>().arg::<u32>(),
        );
        assert_ne!(
            BindingKey::of::<String>(),
            BindingKey::of::<String>().context::<u32>(),
        );
    }

    #[test]
    fn test_display() {
        let key = BindingKey::of::<String>().with_tag("name");
        let rendered = key.to_string();
        assert!(rendered.contains("String"));
        assert!(rendered.contains("\"name\""));

        let key = BindingKey::of::<String>().arg::<u32>();
        assert!(key.to_string().contains("u32 -> "));
    }
}
