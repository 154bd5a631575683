//! RDFit: typed record iteration over RDF sources
//!
//! RDFit finds a parser for whatever source it is handed, runs push-style
//! parsers on background workers behind a bounded queue, and converts the
//! records into the object model the caller asked for by searching a graph
//! of registered converters.

mod bridge;
mod combinators;
mod config;
mod conversion;
mod converter;
mod error;
mod it;
mod listener;
mod parser;
mod pool;
mod registry;
mod rit;
mod source;
mod types;

pub use bridge::{BridgeListener, CallbackIt};
pub use combinators::{Converting, FlatMap, Opener, converting, flat_map};
pub use config::RdfItConfig;
pub use conversion::{ConversionFailure, ConversionFinder, ConversionManager, ConversionPath, Found};
pub use converter::{ConvertError, Converter, ConverterDecl, FnConverter};
pub use error::{ItElement, RdfItError, SourceError, SourceInfo};
pub use it::{Advance, BoxIt, EagerIt, EmptyIt, FromIter, RdfIt, Records, from_iter, from_values};
pub use listener::{ConvertingListener, RdfListener, feed_listener};
pub use parser::{ParserDecl, PullParser, PushParser};
pub use pool::WorkerPool;
pub use registry::{Handler, HandlerRegistry, Lookup, RegistrySnapshot};
pub use rit::{Plugin, Rit};
pub use source::{FnNormalizer, Normalized, SourceNormalizer};
pub use types::{BoxObject, Object, TypeHierarchy, TypeKey, downcast, flatten};
