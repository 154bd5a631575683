//! Converter declarations and traits.

use crate::types::{BoxObject, Object, TypeKey};
use std::any::Any;
use std::fmt;

/// Declaration of a converter's interface.
///
/// Describes which value types a converter accepts and which it produces,
/// without containing the actual conversion logic.
#[derive(Debug, Clone, PartialEq)]
pub struct ConverterDecl {
    /// Unique identifier for this converter.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Statically accepted input types.
    pub inputs: Vec<TypeKey>,
    /// Type of every value produced by `convert`.
    pub output: TypeKey,
}

impl ConverterDecl {
    /// Create a new converter declaration.
    ///
    /// The output defaults to [`TypeKey::any`] until set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            inputs: Vec::new(),
            output: TypeKey::any(),
        }
    }

    /// Set the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Add an accepted input type.
    pub fn input(mut self, key: TypeKey) -> Self {
        if !self.inputs.contains(&key) {
            self.inputs.push(key);
        }
        self
    }

    /// Set the output type.
    pub fn output(mut self, key: TypeKey) -> Self {
        self.output = key;
        self
    }

    /// Convenience: single input, single output converter.
    pub fn simple(id: impl Into<String>, input: TypeKey, output: TypeKey) -> Self {
        Self::new(id).input(input).output(output)
    }

    /// Typed shorthand for [`simple`](Self::simple).
    pub fn between<A: Any, B: Any>(id: impl Into<String>) -> Self {
        Self::simple(id, TypeKey::of::<A>(), TypeKey::of::<B>())
    }

    /// Check if `key` is one of the statically accepted input types.
    pub fn accepts_type(&self, key: TypeKey) -> bool {
        self.inputs.contains(&key)
    }
}

/// Trait for implementing converters.
///
/// Converters translate a record from one object model into another.
/// Implementations must be pure: the same input always yields the same
/// output or the same failure.
pub trait Converter: Send + Sync {
    /// Get the declaration for this converter.
    fn decl(&self) -> &ConverterDecl;

    /// Instance-level check, refining the static input types.
    ///
    /// A converter may reject specific values of an accepted type, e.g.
    /// records holding unbound variables.
    fn can_convert(&self, input: &dyn Object) -> bool {
        let _ = input;
        true
    }

    /// Convert a single value. The result must be an instance of
    /// `decl().output`.
    fn convert(&self, input: &dyn Object) -> Result<BoxObject, ConvertError>;
}

impl fmt::Debug for dyn Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Converter({})", self.decl().id)
    }
}

type ConvertFn<A, B> = dyn Fn(&A) -> Result<B, ConvertError> + Send + Sync;
type AcceptFn<A> = dyn Fn(&A) -> bool + Send + Sync;

/// Converter backed by typed closures.
pub struct FnConverter<A, B> {
    decl: ConverterDecl,
    convert: Box<ConvertFn<A, B>>,
    accept: Option<Box<AcceptFn<A>>>,
}

impl<A, B> FnConverter<A, B>
where
    A: Any + Send + fmt::Debug,
    B: Any + Send + fmt::Debug,
{
    pub fn new(
        id: impl Into<String>,
        convert: impl Fn(&A) -> Result<B, ConvertError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            decl: ConverterDecl::between::<A, B>(id),
            convert: Box::new(convert),
            accept: None,
        }
    }

    /// Only accept values for which `accept` returns true.
    pub fn when(mut self, accept: impl Fn(&A) -> bool + Send + Sync + 'static) -> Self {
        self.accept = Some(Box::new(accept));
        self
    }

    /// Set the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.decl = self.decl.description(desc);
        self
    }
}

impl<A, B> Converter for FnConverter<A, B>
where
    A: Any + Send + fmt::Debug,
    B: Any + Send + fmt::Debug,
{
    fn decl(&self) -> &ConverterDecl {
        &self.decl
    }

    fn can_convert(&self, input: &dyn Object) -> bool {
        match (input.downcast_ref::<A>(), &self.accept) {
            (Some(value), Some(accept)) => accept(value),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn convert(&self, input: &dyn Object) -> Result<BoxObject, ConvertError> {
        let value = input
            .downcast_ref::<A>()
            .ok_or_else(|| ConvertError::UnexpectedInput {
                expected: TypeKey::of::<A>(),
                found: input.type_key(),
            })?;
        if self.accept.as_ref().is_some_and(|accept| !accept(value)) {
            return Err(ConvertError::Rejected {
                converter: self.decl.id.clone(),
            });
        }
        (self.convert)(value).map(|out| Box::new(out) as BoxObject)
    }
}

/// Errors that can occur during conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("converter {converter} rejected the value")]
    Rejected { converter: String },

    #[error("conversion failed: {0}")]
    Failed(String),

    #[error("unexpected input: expected {expected}, found {found}")]
    UnexpectedInput { expected: TypeKey, found: TypeKey },

    #[error("no conversion path from {from} to {to}")]
    NoPath { from: TypeKey, to: TypeKey },

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Celsius(f64);
    #[derive(Debug, PartialEq)]
    struct Kelvin(f64);

    #[test]
    fn test_simple_converter_decl() {
        let decl = ConverterDecl::between::<Celsius, Kelvin>("c-to-k").description("offset");

        assert_eq!(decl.id, "c-to-k");
        assert_eq!(decl.inputs, vec![TypeKey::of::<Celsius>()]);
        assert_eq!(decl.output, TypeKey::of::<Kelvin>());
        assert!(decl.accepts_type(TypeKey::of::<Celsius>()));
        assert!(!decl.accepts_type(TypeKey::of::<Kelvin>()));
    }

    #[test]
    fn test_duplicate_inputs_ignored() {
        let decl = ConverterDecl::new("multi")
            .input(TypeKey::of::<Celsius>())
            .input(TypeKey::of::<Celsius>())
            .input(TypeKey::of::<Kelvin>());
        assert_eq!(decl.inputs.len(), 2);
        assert!(decl.output.is_any());
    }

    #[test]
    fn test_fn_converter() {
        let conv = FnConverter::new("c-to-k", |c: &Celsius| Ok(Kelvin(c.0 + 273.15)));

        let out = conv.convert(&Celsius(0.0)).unwrap();
        assert_eq!(out.downcast_ref::<Kelvin>(), Some(&Kelvin(273.15)));
    }

    #[test]
    fn test_fn_converter_predicate() {
        let conv = FnConverter::new("c-to-k", |c: &Celsius| Ok(Kelvin(c.0 + 273.15)))
            .when(|c: &Celsius| c.0 >= -273.15);

        assert!(conv.can_convert(&Celsius(10.0)));
        assert!(!conv.can_convert(&Celsius(-300.0)));
        assert!(!conv.can_convert(&Kelvin(1.0)));
        assert!(matches!(
            conv.convert(&Celsius(-300.0)),
            Err(ConvertError::Rejected { .. })
        ));
    }

    #[test]
    fn test_fn_converter_wrong_input() {
        let conv = FnConverter::new("c-to-k", |c: &Celsius| Ok(Kelvin(c.0)));
        assert!(matches!(
            conv.convert(&Kelvin(1.0)),
            Err(ConvertError::UnexpectedInput { .. })
        ));
    }
}
