//! Record types: the per-type factory that records and sets are built from.
//!
//! A [`RecordType`] carries everything that differs between logical kinds of
//! record: the identifier attribute, default attributes, the validator, the
//! response parser and the persistence hook.

use crate::error::ValidationError;
use crate::options::Options;
use crate::record::Record;
use crate::sync::Persistence;
use crate::value::{to_attributes, Attributes};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;

/// Checks a prospective attribute set.
pub type Validator = Rc<dyn Fn(&Attributes) -> Result<(), ValidationError>>;

/// Converts a raw response into attributes.
pub type Parser = Rc<dyn Fn(Value) -> Value>;

/// Default identifier attribute.
pub const DEFAULT_ID_ATTRIBUTE: &str = "id";

/// Description of one logical record type.
#[derive(Clone)]
pub struct RecordType {
    name: String,
    id_attribute: String,
    defaults: Attributes,
    validator: Option<Validator>,
    parser: Option<Parser>,
    persistence: Option<Rc<dyn Persistence>>,
}

impl RecordType {
    /// Create a record type with no defaults, validator or hook.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            defaults: Attributes::new(),
            validator: None,
            parser: None,
            persistence: None,
        }
    }

    /// Use a different identifier attribute (e.g. `"_id"`).
    #[must_use]
    pub fn with_id_attribute(mut self, name: impl Into<String>) -> Self {
        self.id_attribute = name.into();
        self
    }

    /// Attributes merged underneath every new record's initial attributes.
    #[must_use]
    pub fn with_defaults(mut self, defaults: Attributes) -> Self {
        self.defaults = defaults;
        self
    }

    /// Install a validator.
    #[must_use]
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Attributes) -> Result<(), ValidationError> + 'static,
    {
        self.validator = Some(Rc::new(validator));
        self
    }

    /// Install a response parser.
    #[must_use]
    pub fn with_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(Value) -> Value + 'static,
    {
        self.parser = Some(Rc::new(parser));
        self
    }

    /// Install a persistence hook.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Rc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Freeze the description for sharing.
    #[must_use]
    pub fn build(self) -> Rc<Self> {
        Rc::new(self)
    }

    /// Type name, used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier attribute.
    #[must_use]
    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    /// Default attributes.
    #[must_use]
    pub fn defaults(&self) -> &Attributes {
        &self.defaults
    }

    /// Persistence hook, if installed.
    #[must_use]
    pub fn persistence(&self) -> Option<Rc<dyn Persistence>> {
        self.persistence.clone()
    }

    /// Whether a validator is installed.
    #[must_use]
    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    pub(crate) fn validate(&self, attrs: &Attributes) -> Result<(), ValidationError> {
        match &self.validator {
            Some(validator) => validator(attrs),
            None => Ok(()),
        }
    }

    /// Run the parser over a response and keep the object it yields.
    #[must_use]
    pub fn parse(&self, response: Value) -> Attributes {
        let parsed = match &self.parser {
            Some(parser) => parser(response),
            None => response,
        };
        to_attributes(parsed).unwrap_or_default()
    }

    /// Build a record of this type.
    #[must_use]
    pub fn create(self: &Rc<Self>, attrs: Attributes) -> Record {
        Record::with_type(Rc::clone(self), attrs, &Options::default())
    }
}

impl Default for RecordType {
    fn default() -> Self {
        Self::new("record")
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordType")
            .field("name", &self.name)
            .field("id_attribute", &self.id_attribute)
            .field("defaults", &self.defaults)
            .field("validator", &self.validator.is_some())
            .field("parser", &self.parser.is_some())
            .field("persistence", &self.persistence.is_some())
            .finish()
    }
}
