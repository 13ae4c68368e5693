//! Reusable bundles of binding declarations.

use bindery_core::error::Result;

use crate::di::BinderyBuilder;

type InitFn = Box<dyn FnOnce(&mut BinderyBuilder) -> Result<()>>;

/// A named bundle of registrations, merged into a builder with
/// [`BinderyBuilder::import`]. The importing builder's override rules apply
/// to everything the module declares.
///
/// # Examples
///
/// ```
/// use bindery::{Bindery, Module};
///
/// # fn main() -> bindery::Result<()> {
/// let greetings = Module::new("greetings", |builder| {
///     builder.bind::<String>().tag("hello").to_instance("hi".to_string())?;
///     Ok(())
/// });
///
/// let mut builder = Bindery::builder();
/// builder.import(greetings, false)?;
/// let bindery = builder.build()?;
///
/// assert_eq!(bindery.instance_tagged::<String>("hello")?, "hi");
/// # Ok(())
/// # }
/// ```
pub struct Module {
    name: String,
    allow_silent_override: bool,
    init: InitFn,
}

impl Module {
    /// A module named `name` whose registrations are declared by `init`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        init: impl FnOnce(&mut BinderyBuilder) -> Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            allow_silent_override: false,
            init: Box::new(init),
        }
    }

    /// Lets this module's registrations silently override each other (and,
    /// when imported with override permission, the importer's bindings).
    #[must_use]
    pub fn allow_silent_override(mut self) -> Self {
        self.allow_silent_override = true;
        self
    }

    /// The module's name; also what [`BinderyBuilder::import_once`]
    /// deduplicates on.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, bool, InitFn) {
        (self.name, self.allow_silent_override, self.init)
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("allow_silent_override", &self.allow_silent_override)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::di::Bindery;

    use super::*;

    fn counting_module(name: &'static str) -> Module {
        Module::new(name, move |builder| {
            builder
                .bind::<u32>()
                .tag(name)
                .to_provider(|_| Ok(1))
        })
    }

    #[test]
    fn test_import() {
        let mut builder = Bindery::builder();
        builder.import(counting_module("a"), false).unwrap();
        let bindery = builder.build().unwrap();

        assert_eq!(bindery.instance_tagged::<u32>("a").unwrap(), 1);
    }

    #[test]
    fn test_import_duplicate_registration_fails() {
        let mut builder = Bindery::builder();
        builder.import(counting_module("a"), false).unwrap();
        let err = builder.import(counting_module("a"), false).unwrap_err();
        assert!(err.is_overriding());
    }

    #[test]
    fn test_import_once_is_idempotent() {
        let mut builder = Bindery::builder();
        builder.import_once(counting_module("a")).unwrap();
        // Same name: skipped instead of clashing.
        builder.import_once(counting_module("a")).unwrap();
        let bindery = builder.build().unwrap();

        assert_eq!(bindery.instance_tagged::<u32>("a").unwrap(), 1);
    }

    #[test]
    fn test_module_override_requires_permission() {
        let module = Module::new("overrider", |builder| {
            builder
                .bind::<String>()
                .tag("name")
                .overrides(true)
                .to_instance("replaced".to_string())
        });

        let mut builder = Bindery::builder();
        builder
            .bind::<String>()
            .tag("name")
            .to_instance("original".to_string())
            .unwrap();

        // Without override permission the module's explicit override is
        // rejected outright.
        let err = builder.import(module, false).unwrap_err();
        assert!(err.is_overriding());

        let module = Module::new("overrider", |builder| {
            builder
                .bind::<String>()
                .tag("name")
                .overrides(true)
                .to_instance("replaced".to_string())
        });
        builder.import(module, true).unwrap();
        let bindery = builder.build().unwrap();
        assert_eq!(bindery.instance_tagged::<String>("name").unwrap(), "replaced");
    }
}
