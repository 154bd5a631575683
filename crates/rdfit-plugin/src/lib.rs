//! Plugin authoring helpers for RDFit.
//!
//! Format modules depend on this crate only: it re-exports the seams a
//! plugin implements and provides [`Bundle`], a ready-made [`Plugin`] that
//! installs a fixed set of handlers into any number of contexts.

pub use rhi_rdfit_core::{
    BoxIt, BoxObject, ConvertError, Converter, ConverterDecl, EagerIt, FnConverter, FnNormalizer,
    ItElement, Normalized, Object, ParserDecl, Plugin, PullParser, PushParser, RdfIt, RdfItError,
    RdfListener, Rit, SourceInfo, SourceNormalizer, TypeKey, from_iter, from_values,
};

use std::any::Any;
use std::sync::Arc;

type Supertype = fn(&Rit);

/// Plugin made of handlers collected up front.
///
/// Handlers are shared between every context the bundle is installed into.
#[derive(Default)]
pub struct Bundle {
    name: String,
    supertypes: Vec<Supertype>,
    converters: Vec<Arc<dyn Converter>>,
    normalizers: Vec<Arc<dyn SourceNormalizer>>,
    pull_parsers: Vec<Arc<dyn PullParser>>,
    push_parsers: Vec<Arc<dyn PushParser>>,
}

impl Bundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare that `Sub` values are also `Sup` instances.
    pub fn supertype<Sub: Any, Sup: Any>(mut self) -> Self {
        self.supertypes.push(|rit| rit.declare_supertype::<Sub, Sup>());
        self
    }

    pub fn converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converters.push(Arc::new(converter));
        self
    }

    pub fn normalizer(mut self, normalizer: impl SourceNormalizer + 'static) -> Self {
        self.normalizers.push(Arc::new(normalizer));
        self
    }

    pub fn pull_parser(mut self, parser: impl PullParser + 'static) -> Self {
        self.pull_parsers.push(Arc::new(parser));
        self
    }

    pub fn push_parser(mut self, parser: impl PushParser + 'static) -> Self {
        self.push_parsers.push(Arc::new(parser));
        self
    }

    /// Number of handlers (not counting type declarations).
    pub fn len(&self) -> usize {
        self.converters.len()
            + self.normalizers.len()
            + self.pull_parsers.len()
            + self.push_parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Plugin for Bundle {
    fn name(&self) -> &str {
        &self.name
    }

    fn install(&self, rit: &Rit) {
        for declare in &self.supertypes {
            declare(rit);
        }
        for converter in &self.converters {
            rit.conversions().register_arc(converter.clone());
        }
        for normalizer in &self.normalizers {
            rit.normalizers()
                .register_all(normalizer.accepted_types(), normalizer.clone());
        }
        for parser in &self.pull_parsers {
            rit.pull_parsers()
                .register_all(parser.decl().sources.iter().copied(), parser.clone());
        }
        for parser in &self.push_parsers {
            rit.push_parsers()
                .register_all(parser.decl().sources.iter().copied(), parser.clone());
        }
        log::debug!("plugin {} installed {} handlers", self.name, self.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Word(String);
    #[derive(Debug, PartialEq)]
    struct Upper(String);
    #[derive(Debug)]
    struct Sentence(&'static str);

    struct Words(ParserDecl);

    impl PullParser for Words {
        fn decl(&self) -> &ParserDecl {
            &self.0
        }

        fn parse(&self, source: BoxObject) -> Result<BoxIt, RdfItError> {
            let text = source
                .downcast_ref::<String>()
                .ok_or_else(|| RdfItError::Parse("expected text".into()))?;
            let words: Vec<Word> = text.split_whitespace().map(|w| Word(w.into())).collect();
            Ok(Box::new(from_values(words, ItElement::Triple)))
        }
    }

    fn bundle() -> Bundle {
        Bundle::new("words")
            .normalizer(FnNormalizer::new("own", |s: Sentence| {
                Ok(Box::new(s.0.to_string()) as BoxObject)
            }))
            .pull_parser(Words(
                ParserDecl::new("words")
                    .source_of::<String>()
                    .triples(TypeKey::of::<Word>()),
            ))
            .converter(FnConverter::new("upper", |w: &Word| {
                Ok(Upper(w.0.to_uppercase()))
            }))
    }

    #[test]
    fn test_bundle_installs_everything() {
        let rit = Rit::new();
        let bundle = bundle();
        assert_eq!(bundle.len(), 3);
        rit.install(&bundle);

        let upper: Vec<Upper> = rit
            .iterate_triples::<Upper>([Box::new(Sentence("hello rdf")) as BoxObject])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(upper, vec![Upper("HELLO".into()), Upper("RDF".into())]);
    }

    #[test]
    fn test_bundle_shared_between_contexts() {
        let bundle = bundle();
        let a = Rit::new();
        let b = Rit::new();
        a.install(&bundle);
        b.install(&bundle);

        assert_eq!(a.pull_parsers().len(), 1);
        assert_eq!(b.conversions().registry().len(), 1);
    }
}
