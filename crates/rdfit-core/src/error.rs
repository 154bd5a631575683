//! Error taxonomy.

use crate::converter::ConvertError;
use crate::types::{Object, TypeKey};
use std::fmt;

/// Longest description kept for a source.
const MAX_DESCRIPTION: usize = 120;

/// Printable identity of a source, kept for error reporting after the
/// source itself has been consumed by a parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Runtime type of the source.
    pub type_key: TypeKey,
    /// Truncated `Debug` rendering of the source.
    pub description: String,
}

impl SourceInfo {
    /// Describe a source before handing it to a parser.
    pub fn of(source: &dyn Object) -> Self {
        let mut description = format!("{:?}", source);
        if description.len() > MAX_DESCRIPTION {
            let mut cut = MAX_DESCRIPTION;
            while !description.is_char_boundary(cut) {
                cut -= 1;
            }
            description.truncate(cut);
            description.push('…');
        }
        Self {
            type_key: source.type_key(),
            description,
        }
    }

    /// Descriptor for iterators that are not tied to one source.
    pub fn detached(description: impl Into<String>) -> Self {
        Self {
            type_key: TypeKey::any(),
            description: description.into(),
        }
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description, self.type_key)
    }
}

/// Errors raised while iterating or parsing records.
#[derive(Debug, thiserror::Error)]
pub enum RdfItError {
    #[error("no parser found for source {origin}")]
    NoParser { origin: SourceInfo },

    #[error(transparent)]
    Source(Box<SourceError>),

    #[error(transparent)]
    Conversion(#[from] ConvertError),

    /// Control-flow signal: stop delivering records from the current source.
    #[error("parsing interrupted")]
    Interrupted,

    #[error("unexpected {found} delivered to an iterator of {expected}")]
    UnexpectedElement { expected: ItElement, found: ItElement },

    #[error("unexpected value type: expected {expected}, found {found}")]
    UnexpectedType { expected: TypeKey, found: TypeKey },

    #[error("no more elements")]
    Exhausted,

    #[error("parser panicked: {0}")]
    Panicked(String),

    #[error("source normalization did not converge after {rounds} rounds")]
    NotConverging { rounds: usize },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl RdfItError {
    /// Check if this is the interrupt control-flow signal.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, RdfItError::Interrupted)
    }

    /// Tie this error to a source, unless it already is.
    pub fn on_source(self, origin: SourceInfo) -> Self {
        match self {
            RdfItError::Source(_) | RdfItError::NoParser { .. } | RdfItError::Interrupted => self,
            other => RdfItError::Source(Box::new(SourceError::new(origin, other))),
        }
    }
}

impl From<SourceError> for RdfItError {
    fn from(err: SourceError) -> Self {
        RdfItError::Source(Box::new(err))
    }
}

/// Kind of record an iterator yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItElement {
    Triple,
    Quad,
}

impl fmt::Display for ItElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItElement::Triple => f.write_str("triple"),
            ItElement::Quad => f.write_str("quad"),
        }
    }
}

/// A failure tied to a specific source.
///
/// The first failure is the primary cause. Later distinct failures for the
/// same source are attached as secondary; duplicates (equal messages) are
/// dropped.
#[derive(Debug, thiserror::Error)]
#[error("source {origin}: {cause}{}", secondary_suffix(.secondary))]
pub struct SourceError {
    pub origin: SourceInfo,
    #[source]
    pub cause: Box<RdfItError>,
    pub secondary: Vec<RdfItError>,
}

fn secondary_suffix(secondary: &[RdfItError]) -> String {
    if secondary.is_empty() {
        String::new()
    } else {
        format!(" (+{} more)", secondary.len())
    }
}

impl SourceError {
    pub fn new(origin: SourceInfo, cause: RdfItError) -> Self {
        Self {
            origin,
            cause: Box::new(cause),
            secondary: Vec::new(),
        }
    }

    /// Attach a later failure, unless an equal one is already recorded.
    pub fn add_secondary(&mut self, err: RdfItError) {
        let message = err.to_string();
        if self.cause.to_string() == message
            || self.secondary.iter().any(|e| e.to_string() == message)
        {
            return;
        }
        self.secondary.push(err);
    }
}
