//! Polymorphic handler registry.
//!
//! Handlers (parsers, converters, normalizers) are indexed by the runtime
//! type they declare. A lookup walks the instance's type ancestry from most
//! to least specific and yields every handler registered along the way, in
//! registration order within one type, filtered by the handler's own
//! instance-level check.

use crate::types::{Object, TypeHierarchy, TypeKey};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Instance-level acceptance check used to filter lookups.
pub trait Handler: Send + Sync {
    /// Check if this handler applies to `instance`, whose type already
    /// matched one of the handler's registered types.
    fn accepts(&self, instance: &dyn Object) -> bool;
}

type Buckets<H> = IndexMap<TypeKey, Vec<Arc<H>>>;

/// Registry of handlers indexed by runtime type.
///
/// Mutations are serialized and publish a new snapshot atomically, so a
/// concurrent lookup sees either the whole mutation or none of it.
pub struct HandlerRegistry<H: ?Sized> {
    hierarchy: Arc<TypeHierarchy>,
    buckets: RwLock<Arc<Buckets<H>>>,
}

impl<H: ?Sized> fmt::Debug for HandlerRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("HandlerRegistry")
            .field("types", &buckets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<H: ?Sized + Handler> HandlerRegistry<H> {
    /// Create an empty registry resolving ancestry through `hierarchy`.
    pub fn new(hierarchy: Arc<TypeHierarchy>) -> Self {
        Self {
            hierarchy,
            buckets: RwLock::new(Arc::new(IndexMap::new())),
        }
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.hierarchy
    }

    /// Index `handler` under `key`.
    pub fn register(&self, key: TypeKey, handler: Arc<H>) {
        self.mutate(|buckets| buckets.entry(key).or_default().push(handler));
    }

    /// Index `handler` under each of `keys`.
    pub fn register_all(&self, keys: impl IntoIterator<Item = TypeKey>, handler: Arc<H>) {
        let keys: Vec<TypeKey> = keys.into_iter().collect();
        self.mutate(|buckets| {
            for key in keys {
                buckets.entry(key).or_default().push(handler.clone());
            }
        });
    }

    /// Remove `handler` (by identity) from every type it is registered under.
    ///
    /// Returns true if anything was removed.
    pub fn unregister(&self, handler: &Arc<H>) -> bool {
        self.remove_where(|h| Arc::ptr_eq(h, handler)) > 0
    }

    /// Remove every handler matching `predicate`. Returns the number of
    /// removed registrations.
    pub fn unregister_if(&self, mut predicate: impl FnMut(&H) -> bool) -> usize {
        self.remove_where(|h| predicate(h))
    }

    fn remove_where(&self, mut predicate: impl FnMut(&Arc<H>) -> bool) -> usize {
        self.mutate(|buckets| {
            let mut removed = 0;
            for handlers in buckets.values_mut() {
                let before = handlers.len();
                handlers.retain(|h| !predicate(h));
                removed += before - handlers.len();
            }
            buckets.retain(|_, handlers| !handlers.is_empty());
            removed
        })
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Buckets<H>) -> R) -> R {
        let mut guard = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Buckets<H> = (**guard).clone();
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Consistent view of the current registrations.
    pub fn snapshot(&self) -> RegistrySnapshot<H> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        RegistrySnapshot {
            hierarchy: self.hierarchy.clone(),
            buckets: Arc::clone(&buckets),
        }
    }

    /// Handlers applicable to `instance`, most specific first.
    pub fn lookup<'a>(&self, instance: &'a dyn Object) -> Lookup<'a, H> {
        self.snapshot().lookup(instance)
    }

    /// Handlers registered for `key` or any of its ancestors, most specific
    /// first, without instance-level filtering.
    pub fn lookup_type(&self, key: TypeKey) -> Lookup<'static, H> {
        self.snapshot().lookup_type(key)
    }

    /// Number of distinct registered handlers.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable view of a registry at one point in time.
pub struct RegistrySnapshot<H: ?Sized> {
    hierarchy: Arc<TypeHierarchy>,
    buckets: Arc<Buckets<H>>,
}

impl<H: ?Sized> Clone for RegistrySnapshot<H> {
    fn clone(&self) -> Self {
        Self {
            hierarchy: self.hierarchy.clone(),
            buckets: self.buckets.clone(),
        }
    }
}

impl<H: ?Sized + Handler> RegistrySnapshot<H> {
    pub fn lookup<'a>(&self, instance: &'a dyn Object) -> Lookup<'a, H> {
        Lookup {
            filter: Some(instance),
            ..self.walk(instance.type_key())
        }
    }

    pub fn lookup_type(&self, key: TypeKey) -> Lookup<'static, H> {
        self.walk(key)
    }

    fn walk<'a>(&self, key: TypeKey) -> Lookup<'a, H> {
        Lookup {
            buckets: self.buckets.clone(),
            keys: self.hierarchy.ancestors(key),
            key_idx: 0,
            item_idx: 0,
            seen: HashSet::new(),
            filter: None,
        }
    }

    /// All handlers, each once, in first-registration order.
    pub fn handlers(&self) -> Vec<Arc<H>> {
        let mut seen = HashSet::new();
        self.buckets
            .values()
            .flatten()
            .filter(|h| seen.insert(identity(h)))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Address of the handler, used as its identity.
fn identity<H: ?Sized>(handler: &Arc<H>) -> usize {
    Arc::as_ptr(handler).cast::<()>() as usize
}

/// Lazy lookup over a registry snapshot.
///
/// A handler registered under several matching types is yielded once, at
/// its most specific position.
pub struct Lookup<'a, H: ?Sized> {
    buckets: Arc<Buckets<H>>,
    keys: Vec<TypeKey>,
    key_idx: usize,
    item_idx: usize,
    seen: HashSet<usize>,
    filter: Option<&'a dyn Object>,
}

impl<H: ?Sized + Handler> Iterator for Lookup<'_, H> {
    type Item = Arc<H>;

    fn next(&mut self) -> Option<Arc<H>> {
        while let Some(key) = self.keys.get(self.key_idx) {
            let Some(handler) = self
                .buckets
                .get(key)
                .and_then(|handlers| handlers.get(self.item_idx))
            else {
                self.key_idx += 1;
                self.item_idx = 0;
                continue;
            };
            self.item_idx += 1;
            if !self.seen.insert(identity(handler)) {
                continue;
            }
            if self.filter.is_some_and(|instance| !handler.accepts(instance)) {
                continue;
            }
            return Some(handler.clone());
        }
        None
    }
}
