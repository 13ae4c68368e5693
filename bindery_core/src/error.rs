//! Error types.

use std::error::Error as StdError;
use std::sync::Arc;

use crate::key::BindingKey;

/// [`Error`] is an error that can be raised by functions and methods from
/// this library.
///
/// Every variant is cheap to clone so that concurrent callers blocked on the
/// same failing construction can all observe the failure.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// No binding (and no external source) matches the requested key.
    /// `registered` lists the bindings present in the container.
    NotFound {
        key: Box<BindingKey>,
        registered: Arc<str>,
    },
    /// A binding's construction path re-entered a key already under
    /// construction on the same resolution chain. The path runs from the
    /// first occurrence of the repeated key up to the point of re-entry.
    DependencyLoop { path: Arc<[BindingKey]> },
    /// A registration violated the override policy.
    Overriding(Arc<str>),
    /// A late-wired container was used before being set.
    NotReady(&'static str),
    /// A fallible downcast failed: the value under a key was not of the
    /// statically expected type.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// A user creator function failed.
    Creation(Arc<dyn StdError + Send + Sync + 'static>),
}

impl Error {
    /// A [`NotFound`](Self::NotFound) error for `key`, listing the
    /// `registered` bindings in the message.
    #[must_use]
    pub fn not_found(key: BindingKey, registered: impl Into<Arc<str>>) -> Self {
        Self::NotFound {
            key: Box::new(key),
            registered: registered.into(),
        }
    }

    /// A [`DependencyLoop`](Self::DependencyLoop) error over `path`.
    #[must_use]
    pub fn dependency_loop(path: Vec<BindingKey>) -> Self {
        Self::DependencyLoop { path: path.into() }
    }

    /// An [`Overriding`](Self::Overriding) error with the given message.
    #[must_use]
    pub fn overriding(message: impl Into<Arc<str>>) -> Self {
        Self::Overriding(message.into())
    }

    /// A [`TypeMismatch`](Self::TypeMismatch) where `T` was expected.
    #[must_use]
    pub fn type_mismatch<T>(found: &'static str) -> Self
    where
        T: 'static,
    {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found,
        }
    }

    /// Wraps a user creator failure.
    pub fn creation<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Creation(Arc::from(err.into()))
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_dependency_loop(&self) -> bool {
        matches!(self, Self::DependencyLoop { .. })
    }

    pub const fn is_overriding(&self) -> bool {
        matches!(self, Self::Overriding(_))
    }

    pub const fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }

    pub const fn is_type_mismatch(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. })
    }

    pub const fn is_creation(&self) -> bool {
        matches!(self, Self::Creation(_))
    }

    /// The cycle path of a [`DependencyLoop`](Self::DependencyLoop), if this
    /// is one.
    #[must_use]
    pub fn loop_path(&self) -> Option<&[BindingKey]> {
        match self {
            Self::DependencyLoop { path } => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { key, registered } => {
                write!(f, "no binding found for {key}")?;
                if registered.is_empty() {
                    write!(f, "\nregistered in this container: (none)")
                } else {
                    write!(f, "\nregistered in this container:\n{registered}")
                }
            }
            Self::DependencyLoop { path } => {
                write!(f, "dependency recursion: ")?;
                for key in path.iter() {
                    write!(f, "{key} => ")?;
                }
                // Closing the circle back to the first key.
                match path.first() {
                    Some(first) => write!(f, "{first}"),
                    None => write!(f, "(empty)"),
                }
            }
            Self::Overriding(message) => write!(f, "{message}"),
            Self::NotReady(what) => write!(f, "{what} has not been set yet"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected a value of type `{expected}`, found `{found}`")
            }
            Self::Creation(err) => write!(f, "creator failed: {err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Creation(err) => Some(err),
            _ => None,
        }
    }
}

/// [`Result`] is an alias to [`core::result::Result`] with [`Error`] as the
/// default error type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        let err = Error::not_found(BindingKey::of::<String>(), "");
        assert!(err.is_not_found());
        assert!(!err.is_overriding());

        let err = Error::overriding("nope");
        assert!(err.is_overriding());

        let err = Error::creation("boom");
        assert!(err.is_creation());
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn test_loop_display_closes_the_circle() {
        let path = vec![
            BindingKey::of::<String>(),
            BindingKey::of::<i32>(),
            BindingKey::of::<bool>(),
        ];
        let err = Error::dependency_loop(path.clone());
        assert_eq!(err.loop_path(), Some(path.as_slice()));

        let rendered = err.to_string();
        // The first key appears twice: once at the start, once as the repeat.
        assert_eq!(rendered.matches("String").count(), 2);
    }

    #[test]
    fn test_clone_observes_same_failure() {
        let err = Error::creation("boom");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
