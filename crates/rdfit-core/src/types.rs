//! Runtime types: keys, type-erased values and the declared type hierarchy.
//!
//! Rust has no subtype reflection, so "is-a" relationships between value
//! types are declared explicitly on a [`TypeHierarchy`]. Every key is
//! implicitly assignable to [`TypeKey::any`].

use indexmap::{IndexMap, IndexSet};
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{PoisonError, RwLock};

/// Identifies a runtime type.
///
/// Equality and hashing only consider the underlying [`TypeId`]; the name is
/// kept for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

/// Marker type behind [`TypeKey::any`].
enum AnyType {}

impl TypeKey {
    /// Key of a concrete Rust type.
    pub fn of<T: ?Sized + Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The root key: every type is assignable to it.
    pub fn any() -> Self {
        Self {
            id: TypeId::of::<AnyType>(),
            name: "any",
        }
    }

    /// Check if this is the root key.
    pub fn is_any(&self) -> bool {
        self.id == TypeId::of::<AnyType>()
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A value that can flow through the core: a source or a record.
///
/// Implemented for every `Any + Send + Debug` type.
pub trait Object: Any + Send + fmt::Debug {
    /// Key of the concrete runtime type.
    fn type_key(&self) -> TypeKey;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send + fmt::Debug> Object for T {
    fn type_key(&self) -> TypeKey {
        TypeKey::of::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Type-erased owned value.
///
/// `Box<dyn Object>` itself satisfies the blanket impl, so trait methods must
/// be called on the pointee (`(*value).type_key()`, `&*value`), never on the
/// box.
pub type BoxObject = Box<dyn Object>;

impl dyn Object {
    /// Check if the concrete type is `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Downcast an owned value, handing it back unchanged on mismatch.
pub fn downcast<T: Any>(value: BoxObject) -> Result<T, BoxObject> {
    if value.is::<T>() {
        match value.into_any().downcast::<T>() {
            Ok(v) => Ok(*v),
            // `is` was checked above
            Err(_) => unreachable!("type checked before downcast"),
        }
    } else {
        Err(value)
    }
}

/// Peel `Box<dyn Object>` layers off a value that was boxed twice.
pub fn flatten(mut value: BoxObject) -> BoxObject {
    loop {
        match downcast::<BoxObject>(value) {
            Ok(inner) => value = inner,
            Err(value) => return value,
        }
    }
}

/// Declared "is-a" relationships between runtime types.
///
/// Populated at startup by the application or by plugins. Supertypes are
/// kept in declaration order, which determines lookup specificity.
#[derive(Default)]
pub struct TypeHierarchy {
    supers: RwLock<IndexMap<TypeKey, IndexSet<TypeKey>>>,
}

impl fmt::Debug for TypeHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let supers = self.supers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TypeHierarchy")
            .field("declared", &supers.len())
            .finish()
    }
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that values of `sub` are also instances of `sup`.
    pub fn declare(&self, sub: TypeKey, sup: TypeKey) {
        if sub == sup || sup.is_any() {
            return;
        }
        let mut supers = self.supers.write().unwrap_or_else(PoisonError::into_inner);
        supers.entry(sub).or_default().insert(sup);
    }

    /// Typed shorthand for [`declare`](Self::declare).
    pub fn declare_of<Sub: Any, Sup: Any>(&self) {
        self.declare(TypeKey::of::<Sub>(), TypeKey::of::<Sup>());
    }

    /// All keys `key` is assignable to, most specific first.
    ///
    /// Starts with `key`, then declared supertypes breadth-first in
    /// declaration order, and always ends with [`TypeKey::any`].
    pub fn ancestors(&self, key: TypeKey) -> Vec<TypeKey> {
        let supers = self.supers.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = IndexSet::new();
        let mut queue = VecDeque::from([key]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = supers.get(&current) {
                queue.extend(parents.iter().copied());
            }
        }
        seen.insert(TypeKey::any());
        seen.into_iter().collect()
    }

    /// Check if a value of type `from` is an instance of `to`.
    pub fn is_assignable(&self, from: TypeKey, to: TypeKey) -> bool {
        from == to || to.is_any() || self.ancestors(from).contains(&to)
    }

    /// Check if `value` is an instance of `to`.
    pub fn is_instance(&self, value: &dyn Object, to: TypeKey) -> bool {
        self.is_assignable(value.type_key(), to)
    }
}
