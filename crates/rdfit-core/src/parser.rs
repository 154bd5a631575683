//! Parser declarations and the two parser calling conventions.

use crate::error::{ItElement, RdfItError};
use crate::it::BoxIt;
use crate::listener::RdfListener;
use crate::registry::Handler;
use crate::types::{BoxObject, Object, TypeKey};
use std::any::Any;
use std::fmt;

/// Declaration of a parser's interface.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserDecl {
    /// Unique identifier for this parser.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Source types the parser is registered for.
    pub sources: Vec<TypeKey>,
    /// Serializations the parser actively supports (media types or names).
    pub syntaxes: Vec<String>,
    /// Type of produced triples, if the parser produces triples.
    pub triples: Option<TypeKey>,
    /// Type of produced quads, if the parser produces quads.
    pub quads: Option<TypeKey>,
}

impl ParserDecl {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            sources: Vec::new(),
            syntaxes: Vec::new(),
            triples: None,
            quads: None,
        }
    }

    /// Set the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Accept sources of type `key`.
    pub fn source(mut self, key: TypeKey) -> Self {
        if !self.sources.contains(&key) {
            self.sources.push(key);
        }
        self
    }

    /// Typed shorthand for [`source`](Self::source).
    pub fn source_of<S: Any>(self) -> Self {
        self.source(TypeKey::of::<S>())
    }

    /// Declare a supported serialization.
    pub fn syntax(mut self, syntax: impl Into<String>) -> Self {
        self.syntaxes.push(syntax.into());
        self
    }

    pub fn triples(mut self, key: TypeKey) -> Self {
        self.triples = Some(key);
        self
    }

    pub fn quads(mut self, key: TypeKey) -> Self {
        self.quads = Some(key);
        self
    }

    /// Type of the records produced for `element`, if any.
    pub fn produces(&self, element: ItElement) -> Option<TypeKey> {
        match element {
            ItElement::Triple => self.triples,
            ItElement::Quad => self.quads,
        }
    }

    /// Element and value type to use when `element` is requested.
    ///
    /// Falls back to the other element kind when the parser does not
    /// produce the requested one, and to [`TypeKey::any`] when it declares
    /// nothing at all.
    pub fn output_for(&self, element: ItElement) -> (ItElement, TypeKey) {
        let other = match element {
            ItElement::Triple => ItElement::Quad,
            ItElement::Quad => ItElement::Triple,
        };
        if let Some(key) = self.produces(element) {
            (element, key)
        } else if let Some(key) = self.produces(other) {
            (other, key)
        } else {
            (element, TypeKey::any())
        }
    }
}

/// Parser that produces a record iterator directly.
pub trait PullParser: Send + Sync {
    fn decl(&self) -> &ParserDecl;

    /// Cheap probe: can this parser handle `source`?
    fn can_parse(&self, source: &dyn Object) -> bool {
        let _ = source;
        true
    }

    /// Open an iterator over the records of `source`.
    fn parse(&self, source: BoxObject) -> Result<BoxIt, RdfItError>;
}

/// Parser that delivers records by calling back into a listener.
pub trait PushParser: Send + Sync {
    fn decl(&self) -> &ParserDecl;

    /// Cheap probe: can this parser handle `source`?
    fn can_parse(&self, source: &dyn Object) -> bool {
        let _ = source;
        true
    }

    /// Parse `source`, delivering every record to `listener`.
    ///
    /// Errors returned by the listener (including
    /// [`RdfItError::Interrupted`]) must stop the parse and be returned.
    fn parse(&self, source: BoxObject, listener: &mut dyn RdfListener)
    -> Result<(), RdfItError>;
}

impl Handler for dyn PullParser {
    fn accepts(&self, instance: &dyn Object) -> bool {
        self.can_parse(instance)
    }
}

impl Handler for dyn PushParser {
    fn accepts(&self, instance: &dyn Object) -> bool {
        self.can_parse(instance)
    }
}

impl fmt::Debug for dyn PullParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PullParser({})", self.decl().id)
    }
}

impl fmt::Debug for dyn PushParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PushParser({})", self.decl().id)
    }
}

/// Pick the best parser among registry candidates for a request.
///
/// Preference: produces `element` as a `desired` instance, then produces
/// `element` at all, then the first candidate.
pub(crate) fn pick<P: ?Sized>(
    candidates: impl Iterator<Item = std::sync::Arc<P>>,
    decl: impl Fn(&P) -> &ParserDecl,
    element: ItElement,
    matches: impl Fn(TypeKey) -> bool,
) -> Option<std::sync::Arc<P>> {
    let candidates: Vec<_> = candidates.collect();
    let idx = candidates
        .iter()
        .position(|p| decl(&**p).produces(element).is_some_and(&matches))
        .or_else(|| {
            candidates
                .iter()
                .position(|p| decl(&**p).produces(element).is_some())
        })
        .or_else(|| (!candidates.is_empty()).then_some(0))?;
    candidates.into_iter().nth(idx)
}
