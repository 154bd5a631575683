//! The context handle tying registries, conversion and the bridge together.

use crate::bridge::CallbackIt;
use crate::combinators::{converting, flat_map};
use crate::config::RdfItConfig;
use crate::conversion::ConversionManager;
use crate::converter::Converter;
use crate::error::{ItElement, RdfItError, SourceInfo};
use crate::it::{BoxIt, EmptyIt, Records};
use crate::listener::{ConvertingListener, RdfListener, feed_listener};
use crate::parser::{self, PullParser, PushParser};
use crate::pool::WorkerPool;
use crate::registry::HandlerRegistry;
use crate::source::{SourceNormalizer, normalize_fixed_point};
use crate::types::{BoxObject, TypeHierarchy, TypeKey};
use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// A collaborator module contributing parsers, normalizers, converters or
/// type declarations.
pub trait Plugin {
    fn name(&self) -> &str;

    fn install(&self, rit: &Rit);
}

struct Inner {
    config: RdfItConfig,
    hierarchy: Arc<TypeHierarchy>,
    normalizers: HandlerRegistry<dyn SourceNormalizer>,
    pull_parsers: HandlerRegistry<dyn PullParser>,
    push_parsers: HandlerRegistry<dyn PushParser>,
    conversions: Arc<ConversionManager>,
    pool: WorkerPool,
}

/// Entry point for reading records.
///
/// Cheap to clone; clones share registries and the worker pool.
#[derive(Clone)]
pub struct Rit {
    inner: Arc<Inner>,
}

impl fmt::Debug for Rit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rit")
            .field("config", &self.inner.config)
            .field("normalizers", &self.inner.normalizers.len())
            .field("pull_parsers", &self.inner.pull_parsers.len())
            .field("push_parsers", &self.inner.push_parsers.len())
            .field("converters", &self.inner.conversions.registry().len())
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl Default for Rit {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<Rit> = OnceLock::new();

impl Rit {
    /// Create an empty context with the default configuration.
    pub fn new() -> Self {
        Self::build(RdfItConfig::default())
    }

    pub fn with_config(config: RdfItConfig) -> Result<Self, RdfItError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a context configured from a TOML, YAML or JSON file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, RdfItError> {
        let config = RdfItConfig::load(path)?;
        log::debug!("loaded {config:?}");
        Ok(Self::build(config))
    }

    fn build(config: RdfItConfig) -> Self {
        let hierarchy = Arc::new(TypeHierarchy::new());
        let pool = WorkerPool::new(config.max_workers, config.keep_alive());
        Self {
            inner: Arc::new(Inner {
                normalizers: HandlerRegistry::new(hierarchy.clone()),
                pull_parsers: HandlerRegistry::new(hierarchy.clone()),
                push_parsers: HandlerRegistry::new(hierarchy.clone()),
                conversions: Arc::new(ConversionManager::new(hierarchy.clone())),
                hierarchy,
                pool,
                config,
            }),
        }
    }

    /// Process-wide default context, for application code that does not
    /// want to pass one around.
    pub fn global() -> &'static Rit {
        GLOBAL.get_or_init(Rit::new)
    }

    pub fn config(&self) -> &RdfItConfig {
        &self.inner.config
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.inner.hierarchy
    }

    pub fn conversions(&self) -> &Arc<ConversionManager> {
        &self.inner.conversions
    }

    pub fn normalizers(&self) -> &HandlerRegistry<dyn SourceNormalizer> {
        &self.inner.normalizers
    }

    pub fn pull_parsers(&self) -> &HandlerRegistry<dyn PullParser> {
        &self.inner.pull_parsers
    }

    pub fn push_parsers(&self) -> &HandlerRegistry<dyn PushParser> {
        &self.inner.push_parsers
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Declare that values of `Sub` are also `Sup` instances.
    pub fn declare_supertype<Sub: Any, Sup: Any>(&self) {
        self.inner.hierarchy.declare_of::<Sub, Sup>();
    }

    pub fn register_converter(&self, converter: impl Converter + 'static) -> Arc<dyn Converter> {
        self.inner.conversions.register(converter)
    }

    /// Register `normalizer` under each of its accepted types.
    pub fn register_normalizer(
        &self,
        normalizer: impl SourceNormalizer + 'static,
    ) -> Arc<dyn SourceNormalizer> {
        let normalizer: Arc<dyn SourceNormalizer> = Arc::new(normalizer);
        self.inner
            .normalizers
            .register_all(normalizer.accepted_types(), normalizer.clone());
        normalizer
    }

    /// Register `parser` under each of its declared source types.
    pub fn register_pull_parser(&self, parser: impl PullParser + 'static) -> Arc<dyn PullParser> {
        let parser: Arc<dyn PullParser> = Arc::new(parser);
        self.inner
            .pull_parsers
            .register_all(parser.decl().sources.iter().copied(), parser.clone());
        parser
    }

    /// Register `parser` under each of its declared source types.
    pub fn register_push_parser(&self, parser: impl PushParser + 'static) -> Arc<dyn PushParser> {
        let parser: Arc<dyn PushParser> = Arc::new(parser);
        self.inner
            .push_parsers
            .register_all(parser.decl().sources.iter().copied(), parser.clone());
        parser
    }

    pub fn install(&self, plugin: &dyn Plugin) {
        log::info!("installing plugin {}", plugin.name());
        plugin.install(self);
    }

    /// Rewrite `source` with the registered normalizers until none applies.
    pub fn normalize(&self, source: BoxObject) -> Result<BoxObject, RdfItError> {
        normalize_fixed_point(
            &self.inner.normalizers,
            source,
            self.inner.config.max_normalization_rounds,
        )
    }

    /// Iterate the `element` records of `sources` as `desired` instances.
    ///
    /// A single source is opened right away, so a missing parser is
    /// reported here. Several sources are opened one at a time as the
    /// iteration reaches them.
    pub fn iterate(
        &self,
        element: ItElement,
        desired: TypeKey,
        sources: impl IntoIterator<Item = BoxObject>,
    ) -> Result<BoxIt, RdfItError> {
        let mut sources: Vec<BoxObject> = sources.into_iter().collect();
        match sources.len() {
            0 => Ok(Box::new(EmptyIt::new(desired, element))),
            1 => {
                let source = sources.remove(0);
                self.open(source, element, desired)
            }
            n => {
                log::debug!("iterating {element}s of {n} sources as {desired}");
                let rit = self.clone();
                Ok(Box::new(flat_map(
                    sources.into_iter(),
                    Box::new(move |source| rit.open(source, element, desired)),
                    desired,
                    element,
                )))
            }
        }
    }

    pub fn iterate_triples<T: Any>(
        &self,
        sources: impl IntoIterator<Item = BoxObject>,
    ) -> Result<Records<T>, RdfItError> {
        self.iterate(ItElement::Triple, TypeKey::of::<T>(), sources)
            .map(Records::new)
    }

    pub fn iterate_quads<T: Any>(
        &self,
        sources: impl IntoIterator<Item = BoxObject>,
    ) -> Result<Records<T>, RdfItError> {
        self.iterate(ItElement::Quad, TypeKey::of::<T>(), sources)
            .map(Records::new)
    }

    /// Call `f` with every triple of `sources`.
    ///
    /// Returning [`RdfItError::Interrupted`] from `f` stops early without
    /// failing.
    pub fn for_each_triple<T: Any>(
        &self,
        sources: impl IntoIterator<Item = BoxObject>,
        f: impl FnMut(T) -> Result<(), RdfItError>,
    ) -> Result<(), RdfItError> {
        drain(self.iterate_triples(sources)?, f)
    }

    /// Call `f` with every quad of `sources`.
    ///
    /// Returning [`RdfItError::Interrupted`] from `f` stops early without
    /// failing.
    pub fn for_each_quad<T: Any>(
        &self,
        sources: impl IntoIterator<Item = BoxObject>,
        f: impl FnMut(T) -> Result<(), RdfItError>,
    ) -> Result<(), RdfItError> {
        drain(self.iterate_quads(sources)?, f)
    }

    /// Parse `sources` in order, delivering their records to `listener`.
    ///
    /// A failing source is offered to
    /// [`on_source_error`](RdfListener::on_source_error); parsing goes on
    /// with the next source only if it returns true.
    pub fn parse(
        &self,
        listener: &mut dyn RdfListener,
        sources: impl IntoIterator<Item = BoxObject>,
    ) -> Result<(), RdfItError> {
        for source in sources {
            let origin = SourceInfo::of(&*source);
            let err = match self.parse_source(listener, source, &origin) {
                Ok(()) => continue,
                Err(e) if e.is_interrupt() => {
                    log::debug!("listener stopped {origin} early");
                    continue;
                }
                Err(e) => e.on_source(origin.clone()),
            };
            if !listener.on_source_error(&origin, &err) {
                if let Err(finish) = listener.on_finish() {
                    log::warn!("listener failed to finish after {origin} failed: {finish}");
                }
                return Err(err);
            }
            log::debug!("skipping failed source {origin}: {err}");
        }
        listener.on_finish()
    }

    fn parse_source(
        &self,
        listener: &mut dyn RdfListener,
        source: BoxObject,
        origin: &SourceInfo,
    ) -> Result<(), RdfItError> {
        let source = self.normalize(source)?;
        let mut adapter = ConvertingListener::new(listener, self.inner.conversions.clone());
        adapter.on_start(origin)?;
        match self.deliver(&mut adapter, source) {
            Err(e) if e.is_interrupt() => log::debug!("listener stopped {origin} early"),
            other => other?,
        }
        adapter.on_finish_source(origin)
    }

    /// Run the best parser for `source` against `listener`.
    fn deliver(&self, listener: &mut dyn RdfListener, source: BoxObject) -> Result<(), RdfItError> {
        let push = self.inner.push_parsers.lookup(&*source).next();
        if let Some(parser) = push {
            log::debug!("pushing {:?} through {}", source, parser.decl().id);
            return parser.parse(source, listener);
        }
        let pull = self.inner.pull_parsers.lookup(&*source).next();
        if let Some(parser) = pull {
            log::debug!("feeding {:?} from {}", source, parser.decl().id);
            let mut it = parser.parse(source)?;
            let result = feed_listener(&mut *it, listener);
            it.close();
            return result;
        }
        Err(RdfItError::NoParser {
            origin: SourceInfo::of(&*source),
        })
    }

    /// Open one source: pull parser first, else a bridged push parser.
    fn open(
        &self,
        source: BoxObject,
        element: ItElement,
        desired: TypeKey,
    ) -> Result<BoxIt, RdfItError> {
        let origin = SourceInfo::of(&*source);
        let source = self
            .normalize(source)
            .map_err(|e| e.on_source(origin.clone()))?;
        let hierarchy = &self.inner.hierarchy;
        let matches = |key: TypeKey| desired.is_any() || hierarchy.is_assignable(key, desired);

        let pull = parser::pick(
            self.inner.pull_parsers.lookup(&*source),
            |p| p.decl(),
            element,
            &matches,
        );
        let it: BoxIt = if let Some(parser) = pull {
            log::debug!("opening {origin} with pull parser {}", parser.decl().id);
            parser.parse(source).map_err(|e| e.on_source(origin.clone()))?
        } else {
            let push = parser::pick(
                self.inner.push_parsers.lookup(&*source),
                |p| p.decl(),
                element,
                &matches,
            );
            let Some(parser) = push else {
                log::debug!("no parser for {origin}");
                return Err(RdfItError::NoParser {
                    origin: SourceInfo::of(&*source),
                });
            };
            log::debug!("opening {origin} with push parser {}", parser.decl().id);
            let (produced, value_type) = parser.decl().output_for(element);
            Box::new(
                CallbackIt::spawn(
                    &self.inner.pool,
                    parser,
                    source,
                    produced,
                    value_type,
                    hierarchy.clone(),
                    self.inner.config.queue_capacity,
                )
                .map_err(|e| e.on_source(origin.clone()))?,
            )
        };
        Ok(self.decorate(it, element, desired))
    }

    fn decorate(&self, it: BoxIt, element: ItElement, desired: TypeKey) -> BoxIt {
        let produced = it.value_type();
        if desired.is_any() || self.inner.hierarchy.is_assignable(produced, desired) {
            return it;
        }
        log::debug!("converting {} records from {produced} to {desired}", it.source());
        Box::new(converting(
            it,
            desired,
            element,
            self.inner.conversions.clone(),
        ))
    }
}

fn drain<T: Any>(
    mut records: Records<T>,
    mut f: impl FnMut(T) -> Result<(), RdfItError>,
) -> Result<(), RdfItError> {
    for record in &mut records {
        match f(record?) {
            Ok(()) => {}
            Err(e) if e.is_interrupt() => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::it::from_values;

    #[derive(Debug, PartialEq)]
    struct Line(String);

    struct Lines(crate::parser::ParserDecl);

    impl PullParser for Lines {
        fn decl(&self) -> &crate::parser::ParserDecl {
            &self.0
        }

        fn parse(&self, source: BoxObject) -> Result<BoxIt, RdfItError> {
            let text = source
                .downcast_ref::<String>()
                .ok_or_else(|| RdfItError::Parse("not text".into()))?;
            let lines: Vec<Line> = text.lines().map(|l| Line(l.to_string())).collect();
            Ok(Box::new(from_values(lines, ItElement::Triple)))
        }
    }

    fn rit() -> Rit {
        let rit = Rit::new();
        rit.register_pull_parser(Lines(
            crate::parser::ParserDecl::new("lines")
                .source_of::<String>()
                .triples(TypeKey::of::<Line>()),
        ));
        rit
    }

    #[test]
    fn test_iterate_single_source() {
        let records: Vec<Line> = rit()
            .iterate_triples::<Line>([Box::new("a\nb".to_string()) as BoxObject])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records, vec![Line("a".into()), Line("b".into())]);
    }

    #[test]
    fn test_no_parser() {
        let err = rit()
            .iterate_triples::<Line>([Box::new(42u32) as BoxObject])
            .unwrap_err();
        assert!(matches!(err, RdfItError::NoParser { .. }));
    }

    #[test]
    fn test_no_sources() {
        let mut records = rit().iterate_triples::<Line>(Vec::new()).unwrap();
        assert!(records.next().is_none());
    }

    #[test]
    fn test_for_each_stops_on_interrupt() {
        let mut seen = Vec::new();
        rit()
            .for_each_triple([Box::new("a\nb\nc".to_string()) as BoxObject], |l: Line| {
                seen.push(l.0);
                if seen.len() == 2 {
                    Err(RdfItError::Interrupted)
                } else {
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn test_with_config_validates() {
        let config = RdfItConfig {
            max_workers: 0,
            ..RdfItConfig::default()
        };
        assert!(Rit::with_config(config).is_err());
    }

    #[test]
    fn test_from_config_file() {
        let path = std::env::temp_dir().join(format!("rdfit-rit-{}.toml", std::process::id()));
        std::fs::write(&path, "queue_capacity = 3\nmax_workers = 2\n").unwrap();
        let rit = Rit::from_config_file(&path);
        std::fs::remove_file(&path).unwrap();

        let rit = rit.unwrap();
        assert_eq!(rit.config().queue_capacity, 3);
        assert_eq!(rit.pool().max_workers(), 2);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(Rit::global(), Rit::global()));
    }
}
