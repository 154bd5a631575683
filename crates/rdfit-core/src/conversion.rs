//! Conversion engine: find chains of converters between value types.
//!
//! Given an input value and a desired type, [`ConversionManager::find_path`]
//! returns a [`ConversionFinder`] that lazily enumerates candidate chains,
//! shortest first. The search only checks declared types; a chain may still
//! fail on a specific value, in which case the caller asks the finder for
//! the next chain.

use crate::converter::{ConvertError, Converter};
use crate::registry::{Handler, HandlerRegistry, RegistrySnapshot};
use crate::types::{BoxObject, Object, TypeHierarchy, TypeKey};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

impl Handler for dyn Converter {
    fn accepts(&self, instance: &dyn Object) -> bool {
        self.can_convert(instance)
    }
}

/// A non-empty chain of converters applied left to right.
#[derive(Clone)]
pub struct ConversionPath {
    converters: Vec<Arc<dyn Converter>>,
}

impl fmt::Debug for ConversionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.converters.iter().map(|c| &c.decl().id))
            .finish()
    }
}

impl ConversionPath {
    fn new(converters: Vec<Arc<dyn Converter>>) -> Self {
        debug_assert!(!converters.is_empty());
        Self { converters }
    }

    pub fn converters(&self) -> &[Arc<dyn Converter>] {
        &self.converters
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// Always false: paths hold at least one converter.
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Converter ids, in application order.
    pub fn ids(&self) -> Vec<&str> {
        self.converters.iter().map(|c| c.decl().id.as_str()).collect()
    }

    /// Type of the values this path produces.
    pub fn output(&self) -> TypeKey {
        self.converters
            .last()
            .map(|c| c.decl().output)
            .unwrap_or_else(TypeKey::any)
    }

    /// Feed `input` through every converter in turn.
    ///
    /// Stops at the first converter that rejects its input or fails, and
    /// hands the original input back inside the failure.
    pub fn apply(&self, input: BoxObject) -> Result<BoxObject, ConversionFailure> {
        let mut current: Option<BoxObject> = None;
        for converter in &self.converters {
            let value: &dyn Object = match &current {
                Some(v) => &**v,
                None => &*input,
            };
            if !converter.can_convert(value) {
                return Err(ConversionFailure {
                    input,
                    error: ConvertError::Rejected {
                        converter: converter.decl().id.clone(),
                    },
                });
            }
            match converter.convert(value) {
                Ok(out) => current = Some(out),
                Err(error) => return Err(ConversionFailure { input, error }),
            }
        }
        Ok(current.unwrap_or(input))
    }
}

/// A failed conversion, carrying the untouched input so it can be retried
/// along another path.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ConversionFailure {
    pub input: BoxObject,
    #[source]
    pub error: ConvertError,
}

/// The most recently found conversion.
#[derive(Debug, Clone)]
pub enum Found {
    /// The input already has the desired type.
    Identity,
    Path(ConversionPath),
}

/// One partial path in the search: a converter and the step before it.
struct Step {
    converter: Arc<dyn Converter>,
    prev: Option<usize>,
}

enum Search {
    /// The input already matches: yield the identity once.
    Identity { yielded: bool },
    Graph {
        snapshot: RegistrySnapshot<dyn Converter>,
        steps: Vec<Step>,
        queue: VecDeque<usize>,
        visited: HashSet<usize>,
    },
}

/// Lazy breadth-first enumeration of conversion paths.
///
/// Each converter instance appears in at most one step of a search, which
/// bounds the search by the number of registered converters even when the
/// converter graph has cycles.
pub struct ConversionFinder {
    hierarchy: Arc<TypeHierarchy>,
    from: TypeKey,
    desired: TypeKey,
    search: Search,
    current: Option<Found>,
    exhausted: bool,
}

impl fmt::Debug for ConversionFinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionFinder")
            .field("from", &self.from)
            .field("desired", &self.desired)
            .field("current", &self.current)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

fn converter_id(converter: &Arc<dyn Converter>) -> usize {
    Arc::as_ptr(converter).cast::<()>() as usize
}

impl ConversionFinder {
    fn identity(hierarchy: Arc<TypeHierarchy>, from: TypeKey, desired: TypeKey) -> Self {
        Self {
            hierarchy,
            from,
            desired,
            search: Search::Identity { yielded: false },
            current: None,
            exhausted: false,
        }
    }

    fn graph(
        hierarchy: Arc<TypeHierarchy>,
        snapshot: RegistrySnapshot<dyn Converter>,
        from: TypeKey,
        desired: TypeKey,
    ) -> Self {
        let mut steps = Vec::new();
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        for converter in snapshot.lookup_type(from) {
            if visited.insert(converter_id(&converter)) {
                queue.push_back(steps.len());
                steps.push(Step {
                    converter,
                    prev: None,
                });
            }
        }
        Self {
            hierarchy,
            from,
            desired,
            search: Search::Graph {
                snapshot,
                steps,
                queue,
                visited,
            },
            current: None,
            exhausted: false,
        }
    }

    /// Type of the input this search started from.
    pub fn from(&self) -> TypeKey {
        self.from
    }

    pub fn desired(&self) -> TypeKey {
        self.desired
    }

    /// Advance to the next candidate path.
    ///
    /// Returns false once the search is exhausted, and keeps returning false
    /// afterwards.
    pub fn has_next(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        let found = match &mut self.search {
            Search::Identity { yielded } => {
                if *yielded {
                    None
                } else {
                    *yielded = true;
                    Some(Found::Identity)
                }
            }
            Search::Graph {
                snapshot,
                steps,
                queue,
                visited,
            } => next_path(
                &self.hierarchy,
                snapshot,
                steps,
                queue,
                visited,
                self.desired,
            )
            .map(Found::Path),
        };
        match found {
            Some(found) => {
                log::debug!(
                    "conversion {} -> {}: trying {:?}",
                    self.from,
                    self.desired,
                    found
                );
                self.current = Some(found);
                true
            }
            None => {
                self.exhausted = true;
                self.current = None;
                false
            }
        }
    }

    /// The most recently found conversion, if any.
    pub fn current(&self) -> Option<&Found> {
        self.current.as_ref()
    }

    /// Apply the most recently found conversion.
    ///
    /// May fail even though the path matched by declared types; call
    /// [`has_next`](Self::has_next) and retry with the returned input.
    pub fn convert(&self, input: BoxObject) -> Result<BoxObject, ConversionFailure> {
        match &self.current {
            Some(Found::Identity) => Ok(input),
            Some(Found::Path(path)) => path.apply(input),
            None => Err(ConversionFailure {
                input,
                error: ConvertError::NoPath {
                    from: self.from,
                    to: self.desired,
                },
            }),
        }
    }
}

/// Breadth-first expansion until a step whose output matches `desired`.
fn next_path(
    hierarchy: &TypeHierarchy,
    snapshot: &RegistrySnapshot<dyn Converter>,
    steps: &mut Vec<Step>,
    queue: &mut VecDeque<usize>,
    visited: &mut HashSet<usize>,
    desired: TypeKey,
) -> Option<ConversionPath> {
    while let Some(idx) = queue.pop_front() {
        let output = steps[idx].converter.decl().output;
        if hierarchy.is_assignable(output, desired) {
            return Some(collect_path(steps, idx));
        }
        for converter in snapshot.lookup_type(output) {
            if visited.insert(converter_id(&converter)) {
                log::trace!(
                    "expanding {} with {}",
                    steps[idx].converter.decl().id,
                    converter.decl().id
                );
                queue.push_back(steps.len());
                steps.push(Step {
                    converter,
                    prev: Some(idx),
                });
            }
        }
    }
    None
}

fn collect_path(steps: &[Step], last: usize) -> ConversionPath {
    let mut converters = Vec::new();
    let mut cursor = Some(last);
    while let Some(idx) = cursor {
        converters.push(steps[idx].converter.clone());
        cursor = steps[idx].prev;
    }
    converters.reverse();
    ConversionPath::new(converters)
}

/// Registry of converters plus the path search over them.
pub struct ConversionManager {
    hierarchy: Arc<TypeHierarchy>,
    converters: HandlerRegistry<dyn Converter>,
}

impl fmt::Debug for ConversionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionManager")
            .field("converters", &self.converters.len())
            .finish()
    }
}

impl ConversionManager {
    pub fn new(hierarchy: Arc<TypeHierarchy>) -> Self {
        Self {
            converters: HandlerRegistry::new(hierarchy.clone()),
            hierarchy,
        }
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.hierarchy
    }

    /// Register a converter under each of its declared input types.
    pub fn register(&self, converter: impl Converter + 'static) -> Arc<dyn Converter> {
        let converter: Arc<dyn Converter> = Arc::new(converter);
        self.register_arc(converter.clone());
        converter
    }

    /// Register an already shared converter.
    pub fn register_arc(&self, converter: Arc<dyn Converter>) {
        let inputs = converter.decl().inputs.clone();
        self.converters.register_all(inputs, converter);
    }

    pub fn unregister(&self, converter: &Arc<dyn Converter>) -> bool {
        self.converters.unregister(converter)
    }

    pub fn unregister_if(&self, mut predicate: impl FnMut(&dyn Converter) -> bool) -> usize {
        self.converters.unregister_if(|c| predicate(c))
    }

    pub fn registry(&self) -> &HandlerRegistry<dyn Converter> {
        &self.converters
    }

    /// Start a search for paths turning `input` into a `desired` instance.
    pub fn find_path(&self, input: &dyn Object, desired: TypeKey) -> ConversionFinder {
        self.find_path_for_type(input.type_key(), desired)
    }

    /// Start a search from a type rather than a value.
    pub fn find_path_for_type(&self, from: TypeKey, desired: TypeKey) -> ConversionFinder {
        if self.hierarchy.is_assignable(from, desired) {
            ConversionFinder::identity(self.hierarchy.clone(), from, desired)
        } else {
            ConversionFinder::graph(
                self.hierarchy.clone(),
                self.converters.snapshot(),
                from,
                desired,
            )
        }
    }

    /// Convert `input` into a `desired` instance, trying paths in order
    /// until one succeeds.
    pub fn convert(
        &self,
        input: BoxObject,
        desired: TypeKey,
    ) -> Result<BoxObject, ConversionFailure> {
        let mut finder = self.find_path(&*input, desired);
        retry(&mut finder, input)
    }
}

/// Try every remaining path of `finder` until one converts `input`.
pub(crate) fn retry(
    finder: &mut ConversionFinder,
    mut input: BoxObject,
) -> Result<BoxObject, ConversionFailure> {
    let mut last = None;
    while finder.has_next() {
        match finder.convert(input) {
            Ok(out) => return Ok(out),
            Err(failure) => {
                log::debug!("conversion path failed: {}", failure.error);
                input = failure.input;
                last = Some(failure.error);
            }
        }
    }
    let error = match last {
        Some(ConvertError::Rejected { .. }) | None => ConvertError::NoPath {
            from: finder.from(),
            to: finder.desired(),
        },
        Some(other) => other,
    };
    Err(ConversionFailure { input, error })
}
