//! Iterator combinators: concatenation over sources and type conversion.

use crate::conversion::{ConversionFinder, ConversionManager, retry};
use crate::error::{ItElement, RdfItError, SourceInfo};
use crate::it::{Advance, BoxIt, EagerIt};
use crate::types::{BoxObject, TypeKey};
use std::sync::Arc;

/// Opens the iterator for one source.
pub type Opener = Box<dyn FnMut(BoxObject) -> Result<BoxIt, RdfItError> + Send>;

/// Lazily concatenates the iterators opened for a sequence of sources.
///
/// Each source is opened only once the previous iterator is exhausted, and
/// that iterator is closed before the next source is opened. Failing to
/// open a source ends the whole sequence after reporting the failure.
pub struct FlatMap {
    sources: Box<dyn Iterator<Item = BoxObject> + Send>,
    open: Opener,
    current: Option<BoxIt>,
    failed: bool,
}

impl Advance for FlatMap {
    fn advance(&mut self) -> Result<Option<BoxObject>, RdfItError> {
        loop {
            if let Some(it) = &mut self.current {
                let origin = it.source().clone();
                if it.has_next().map_err(|e| e.on_source(origin.clone()))? {
                    return it.next_value().map(Some).map_err(|e| e.on_source(origin));
                }
                it.close();
                self.current = None;
            }
            if self.failed {
                return Ok(None);
            }
            let Some(source) = self.sources.next() else {
                return Ok(None);
            };
            let origin = SourceInfo::of(&*source);
            match (self.open)(source) {
                Ok(it) => self.current = Some(it),
                Err(e) => {
                    self.failed = true;
                    return Err(e.on_source(origin));
                }
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut it) = self.current.take() {
            it.close();
        }
    }
}

/// Concatenate the records of `sources`, opening each with `open`.
pub fn flat_map(
    sources: impl Iterator<Item = BoxObject> + Send + 'static,
    open: Opener,
    value_type: TypeKey,
    element: ItElement,
) -> EagerIt<FlatMap> {
    EagerIt::new(
        FlatMap {
            sources: Box::new(sources),
            open,
            current: None,
            failed: false,
        },
        value_type,
        element,
        SourceInfo::detached("multiple sources"),
    )
}

/// Converts every upstream value into an instance of the desired type.
///
/// The conversion path found for one upstream type is reused while values
/// of that type keep converting. A value of another type, or one the cached
/// path fails on, triggers a fresh search over all paths.
pub struct Converting {
    upstream: BoxIt,
    manager: Arc<ConversionManager>,
    desired: TypeKey,
    cached: Option<ConversionFinder>,
}

impl Converting {
    fn convert(&mut self, value: BoxObject) -> Result<BoxObject, RdfItError> {
        let mut value = value;
        let key = (*value).type_key();
        if let Some(finder) = self.cached.as_ref().filter(|f| f.from() == key) {
            match finder.convert(value) {
                Ok(out) => return Ok(out),
                Err(failure) => value = failure.input,
            }
        }
        let mut finder = self.manager.find_path(&*value, self.desired);
        match retry(&mut finder, value) {
            Ok(out) => {
                self.cached = Some(finder);
                Ok(out)
            }
            Err(failure) => {
                log::debug!(
                    "cannot convert {} record to {}: {}",
                    key,
                    self.desired,
                    failure.error
                );
                Err(RdfItError::Conversion(failure.error))
            }
        }
    }

    pub fn cached_path(&self) -> Option<&ConversionFinder> {
        self.cached.as_ref()
    }
}

impl Advance for Converting {
    fn advance(&mut self) -> Result<Option<BoxObject>, RdfItError> {
        if !self.upstream.has_next()? {
            return Ok(None);
        }
        let value = self.upstream.next_value()?;
        self.convert(value).map(Some)
    }

    fn release(&mut self) {
        self.upstream.close();
    }
}

/// Wrap `upstream` so it yields `desired` instances as `element` records.
pub fn converting(
    upstream: BoxIt,
    desired: TypeKey,
    element: ItElement,
    manager: Arc<ConversionManager>,
) -> EagerIt<Converting> {
    let source = upstream.source().clone();
    EagerIt::new(
        Converting {
            upstream,
            manager,
            desired,
            cached: None,
        },
        desired,
        element,
        source,
    )
}
