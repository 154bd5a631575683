//! Source normalization.
//!
//! Normalizers rewrite a source into a more parseable form (a path into a
//! reader, a string into bytes, ...). Normalization runs to a fixed point
//! before parser lookup.

use crate::error::RdfItError;
use crate::registry::{Handler, HandlerRegistry};
use crate::types::{BoxObject, Object, TypeKey, flatten};
use std::any::Any;
use std::fmt;

/// Outcome of one normalizer application.
#[derive(Debug)]
pub enum Normalized {
    /// The source was returned as is.
    Unchanged(BoxObject),
    /// The source was replaced.
    Changed(BoxObject),
}

/// Rewrites sources of the types it is registered for.
pub trait SourceNormalizer: Send + Sync {
    fn id(&self) -> &str;

    /// Source types this normalizer is registered under.
    fn accepted_types(&self) -> Vec<TypeKey>;

    /// Instance-level check, refining the accepted types.
    fn accepts(&self, source: &dyn Object) -> bool {
        let _ = source;
        true
    }

    fn normalize(&self, source: BoxObject) -> Result<Normalized, RdfItError>;
}

impl Handler for dyn SourceNormalizer {
    fn accepts(&self, instance: &dyn Object) -> bool {
        SourceNormalizer::accepts(self, instance)
    }
}

impl fmt::Debug for dyn SourceNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceNormalizer({})", self.id())
    }
}

type NormalizeFn<A> = dyn Fn(A) -> Result<BoxObject, RdfItError> + Send + Sync;

/// Normalizer backed by a typed closure that always replaces the source.
pub struct FnNormalizer<A> {
    id: String,
    normalize: Box<NormalizeFn<A>>,
}

impl<A: Any + Send + fmt::Debug> FnNormalizer<A> {
    pub fn new(
        id: impl Into<String>,
        normalize: impl Fn(A) -> Result<BoxObject, RdfItError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            normalize: Box::new(normalize),
        }
    }
}

impl<A: Any + Send + fmt::Debug> SourceNormalizer for FnNormalizer<A> {
    fn id(&self) -> &str {
        &self.id
    }

    fn accepted_types(&self) -> Vec<TypeKey> {
        vec![TypeKey::of::<A>()]
    }

    fn accepts(&self, source: &dyn Object) -> bool {
        source.is::<A>()
    }

    fn normalize(&self, source: BoxObject) -> Result<Normalized, RdfItError> {
        match crate::types::downcast::<A>(source) {
            Ok(value) => (self.normalize)(value).map(Normalized::Changed),
            Err(source) => Ok(Normalized::Unchanged(source)),
        }
    }
}

/// Apply normalizers until none changes the source.
///
/// Within a round normalizers are tried most specific first; the first
/// change restarts lookup against the new source.
pub(crate) fn normalize_fixed_point(
    registry: &HandlerRegistry<dyn SourceNormalizer>,
    source: BoxObject,
    max_rounds: usize,
) -> Result<BoxObject, RdfItError> {
    let mut current = flatten(source);
    for round in 0..max_rounds {
        let candidates: Vec<_> = registry.lookup(&*current).collect();
        let mut changed = false;
        for normalizer in candidates {
            match normalizer.normalize(current)? {
                Normalized::Unchanged(same) => current = same,
                Normalized::Changed(next) => {
                    log::trace!(
                        "normalizer {} rewrote source into {} (round {round})",
                        normalizer.id(),
                        (*next).type_key()
                    );
                    current = flatten(next);
                    changed = true;
                    break;
                }
            }
        }
        if !changed {
            return Ok(current);
        }
    }
    log::warn!("source normalization still changing after {max_rounds} rounds");
    Err(RdfItError::NotConverging { rounds: max_rounds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeHierarchy;
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Path(String);
    #[derive(Debug, PartialEq)]
    struct Text(String);
    #[derive(Debug)]
    struct Ping(u8);

    fn registry() -> HandlerRegistry<dyn SourceNormalizer> {
        HandlerRegistry::new(Arc::new(TypeHierarchy::new()))
    }

    fn register(registry: &HandlerRegistry<dyn SourceNormalizer>, n: impl SourceNormalizer + 'static) {
        let n: Arc<dyn SourceNormalizer> = Arc::new(n);
        registry.register_all(n.accepted_types(), n);
    }

    #[test]
    fn test_chain_to_fixed_point() {
        let registry = registry();
        register(
            &registry,
            FnNormalizer::new("read", |p: Path| Ok(Box::new(Text(format!("<{}>", p.0))) as BoxObject)),
        );
        register(
            &registry,
            FnNormalizer::new("own", |s: String| Ok(Box::new(Path(s)) as BoxObject)),
        );

        let out = normalize_fixed_point(&registry, Box::new("a.nt".to_string()), 8).unwrap();
        assert_eq!(out.downcast_ref::<Text>(), Some(&Text("<a.nt>".into())));
    }

    #[test]
    fn test_nested_box_is_flattened() {
        let registry = registry();
        let nested: BoxObject = Box::new(Box::new(Path("x".into())) as BoxObject);
        let out = normalize_fixed_point(&registry, nested, 8).unwrap();
        assert!(out.is::<Path>());
    }

    #[test]
    fn test_non_converging() {
        let registry = registry();
        register(
            &registry,
            FnNormalizer::new("ping", |p: Ping| Ok(Box::new(Ping(p.0.wrapping_add(1))) as BoxObject)),
        );

        let err = normalize_fixed_point(&registry, Box::new(Ping(0)), 4).unwrap_err();
        assert!(matches!(err, RdfItError::NotConverging { rounds: 4 }));
    }
}
