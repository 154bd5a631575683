//! Listener (push-style) consumption of records.

use crate::conversion::{ConversionFinder, ConversionManager, retry};
use crate::error::{ItElement, RdfItError, SourceInfo};
use crate::it::RdfIt;
use crate::types::{BoxObject, TypeKey};
use std::sync::Arc;

/// Receiver of parse events.
///
/// Every callback may return an error to stop the current parse;
/// [`RdfItError::Interrupted`] stops delivery from the current source
/// without counting as a failure.
pub trait RdfListener {
    /// Type triples must be an instance of when delivered.
    fn triple_type(&self) -> TypeKey {
        TypeKey::any()
    }

    /// Type quads must be an instance of when delivered.
    fn quad_type(&self) -> TypeKey {
        TypeKey::any()
    }

    /// A source is about to be parsed.
    fn on_start(&mut self, source: &SourceInfo) -> Result<(), RdfItError> {
        let _ = source;
        Ok(())
    }

    fn on_triple(&mut self, triple: BoxObject) -> Result<(), RdfItError>;

    fn on_quad(&mut self, quad: BoxObject) -> Result<(), RdfItError>;

    /// A namespace prefix was declared.
    fn on_prefix(&mut self, prefix: &str, iri: &str) -> Result<(), RdfItError> {
        let _ = (prefix, iri);
        Ok(())
    }

    /// Parsing `source` failed. Return true to continue with the next source.
    fn on_source_error(&mut self, source: &SourceInfo, error: &RdfItError) -> bool {
        let _ = (source, error);
        false
    }

    /// All records of `source` were delivered.
    fn on_finish_source(&mut self, source: &SourceInfo) -> Result<(), RdfItError> {
        let _ = source;
        Ok(())
    }

    /// No more sources will be parsed.
    fn on_finish(&mut self) -> Result<(), RdfItError> {
        Ok(())
    }
}

/// Deliver everything `it` yields to `listener`, by element kind.
///
/// The iterator is not closed here; the caller owns it.
pub fn feed_listener(it: &mut dyn RdfIt, listener: &mut dyn RdfListener) -> Result<(), RdfItError> {
    let element = it.element();
    while it.has_next()? {
        let value = it.next_value()?;
        match element {
            ItElement::Triple => listener.on_triple(value)?,
            ItElement::Quad => listener.on_quad(value)?,
        }
    }
    Ok(())
}

/// Listener adapter converting records to the types the wrapped listener
/// declares.
///
/// A conversion failure is returned from the callback as
/// [`RdfItError::Conversion`].
pub struct ConvertingListener<'a> {
    inner: &'a mut dyn RdfListener,
    manager: Arc<ConversionManager>,
    triples: Option<ConversionFinder>,
    quads: Option<ConversionFinder>,
}

impl<'a> ConvertingListener<'a> {
    pub fn new(inner: &'a mut dyn RdfListener, manager: Arc<ConversionManager>) -> Self {
        Self {
            inner,
            manager,
            triples: None,
            quads: None,
        }
    }

    fn convert(
        manager: &ConversionManager,
        cache: &mut Option<ConversionFinder>,
        value: BoxObject,
        desired: TypeKey,
    ) -> Result<BoxObject, RdfItError> {
        if desired.is_any() || manager.hierarchy().is_instance(&*value, desired) {
            return Ok(value);
        }
        let mut value = value;
        let key = (*value).type_key();
        if let Some(finder) = cache.as_ref().filter(|f| f.from() == key) {
            match finder.convert(value) {
                Ok(out) => return Ok(out),
                Err(failure) => value = failure.input,
            }
        }
        let mut finder = manager.find_path(&*value, desired);
        let out = retry(&mut finder, value).map_err(|failure| failure.error)?;
        *cache = Some(finder);
        Ok(out)
    }
}

impl RdfListener for ConvertingListener<'_> {
    fn triple_type(&self) -> TypeKey {
        TypeKey::any()
    }

    fn quad_type(&self) -> TypeKey {
        TypeKey::any()
    }

    fn on_start(&mut self, source: &SourceInfo) -> Result<(), RdfItError> {
        self.inner.on_start(source)
    }

    fn on_triple(&mut self, triple: BoxObject) -> Result<(), RdfItError> {
        let desired = self.inner.triple_type();
        let triple = Self::convert(&self.manager, &mut self.triples, triple, desired)?;
        self.inner.on_triple(triple)
    }

    fn on_quad(&mut self, quad: BoxObject) -> Result<(), RdfItError> {
        let desired = self.inner.quad_type();
        let quad = Self::convert(&self.manager, &mut self.quads, quad, desired)?;
        self.inner.on_quad(quad)
    }

    fn on_prefix(&mut self, prefix: &str, iri: &str) -> Result<(), RdfItError> {
        self.inner.on_prefix(prefix, iri)
    }

    fn on_source_error(&mut self, source: &SourceInfo, error: &RdfItError) -> bool {
        self.inner.on_source_error(source, error)
    }

    fn on_finish_source(&mut self, source: &SourceInfo) -> Result<(), RdfItError> {
        self.inner.on_finish_source(source)
    }

    fn on_finish(&mut self) -> Result<(), RdfItError> {
        self.inner.on_finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{ConvertError, FnConverter};
    use crate::it::from_values;
    use crate::types::TypeHierarchy;

    #[derive(Debug)]
    struct Raw(u32);
    #[derive(Debug, PartialEq)]
    struct Cooked(u32);

    #[derive(Default)]
    struct Sink {
        triples: Vec<BoxObject>,
        quads: Vec<BoxObject>,
        want_cooked: bool,
    }

    impl RdfListener for Sink {
        fn triple_type(&self) -> TypeKey {
            if self.want_cooked {
                TypeKey::of::<Cooked>()
            } else {
                TypeKey::any()
            }
        }

        fn on_triple(&mut self, triple: BoxObject) -> Result<(), RdfItError> {
            self.triples.push(triple);
            Ok(())
        }

        fn on_quad(&mut self, quad: BoxObject) -> Result<(), RdfItError> {
            self.quads.push(quad);
            Ok(())
        }
    }

    fn manager() -> Arc<ConversionManager> {
        let manager = ConversionManager::new(Arc::new(TypeHierarchy::new()));
        manager.register(
            FnConverter::new("cook", |r: &Raw| Ok(Cooked(r.0 * 2))).when(|r: &Raw| r.0 != 13),
        );
        Arc::new(manager)
    }

    #[test]
    fn test_feed_listener_by_element() {
        let mut sink = Sink::default();
        let mut it = from_values(vec![Raw(1), Raw(2)], ItElement::Quad);
        feed_listener(&mut it, &mut sink).unwrap();

        assert_eq!(sink.quads.len(), 2);
        assert!(sink.triples.is_empty());
    }

    #[test]
    fn test_converting_listener() {
        let mut sink = Sink {
            want_cooked: true,
            ..Sink::default()
        };
        let manager = manager();
        {
            let mut listener = ConvertingListener::new(&mut sink, manager);
            listener.on_triple(Box::new(Raw(1))).unwrap();
            listener.on_triple(Box::new(Cooked(7))).unwrap();
            listener.on_quad(Box::new(Raw(5))).unwrap();
        }

        let triples: Vec<_> = sink
            .triples
            .iter()
            .map(|t| t.downcast_ref::<Cooked>().unwrap().0)
            .collect();
        assert_eq!(triples, vec![2, 7]);
        assert!(sink.quads[0].is::<Raw>());
    }

    #[test]
    fn test_converting_listener_failure() {
        let mut sink = Sink {
            want_cooked: true,
            ..Sink::default()
        };
        let mut listener = ConvertingListener::new(&mut sink, manager());

        let err = listener.on_triple(Box::new(Raw(13))).unwrap_err();
        assert!(matches!(err, RdfItError::Conversion(ConvertError::NoPath { .. })));
        listener.on_triple(Box::new(Raw(3))).unwrap();
    }
}
