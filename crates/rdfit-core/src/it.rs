//! Record iterators.
//!
//! [`RdfIt`] is the single-pass, closeable iterator every parser and
//! combinator produces. It reports failures through `Result` instead of
//! ending silently, and carries the element kind, the value type and the
//! source it reads from.

use crate::error::{ItElement, RdfItError, SourceInfo};
use crate::types::{BoxObject, TypeKey, downcast};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Single-pass iterator over records of one element kind.
///
/// `has_next` is idempotent between calls to `next_value`. Once it has
/// returned `Ok(false)` it keeps doing so. `close` is idempotent and must be
/// safe to call at any point; implementations should also close on drop.
pub trait RdfIt: Send {
    /// Every yielded value is an instance of this type.
    fn value_type(&self) -> TypeKey;

    fn element(&self) -> ItElement;

    /// Source the records come from.
    fn source(&self) -> &SourceInfo;

    fn has_next(&mut self) -> Result<bool, RdfItError>;

    /// Next value, or [`RdfItError::Exhausted`] past the end.
    fn next_value(&mut self) -> Result<BoxObject, RdfItError>;

    /// Release resources. Later `has_next` calls return `Ok(false)`.
    fn close(&mut self);
}

impl fmt::Debug for dyn RdfIt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdfIt")
            .field("element", &self.element())
            .field("value_type", &self.value_type())
            .field("source", &self.source())
            .finish()
    }
}

pub type BoxIt = Box<dyn RdfIt>;

/// Step function driving an [`EagerIt`].
pub trait Advance: Send {
    /// Produce the next value, or `None` at the end.
    fn advance(&mut self) -> Result<Option<BoxObject>, RdfItError>;

    /// Release resources. Called once, at the end or on close.
    fn release(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Open,
    Exhausted,
    Closed,
}

/// Iterator computing one value ahead.
///
/// `has_next` advances and buffers; `next_value` hands out the buffer.
pub struct EagerIt<A: Advance> {
    advance: A,
    value_type: TypeKey,
    element: ItElement,
    source: SourceInfo,
    lookahead: Option<BoxObject>,
    stage: Stage,
}

impl<A: Advance> EagerIt<A> {
    pub fn new(advance: A, value_type: TypeKey, element: ItElement, source: SourceInfo) -> Self {
        Self {
            advance,
            value_type,
            element,
            source,
            lookahead: None,
            stage: Stage::Open,
        }
    }

    pub fn get_ref(&self) -> &A {
        &self.advance
    }
}

impl<A: Advance> RdfIt for EagerIt<A> {
    fn value_type(&self) -> TypeKey {
        self.value_type
    }

    fn element(&self) -> ItElement {
        self.element
    }

    fn source(&self) -> &SourceInfo {
        &self.source
    }

    fn has_next(&mut self) -> Result<bool, RdfItError> {
        if self.lookahead.is_some() {
            return Ok(true);
        }
        if self.stage != Stage::Open {
            return Ok(false);
        }
        match self.advance.advance()? {
            Some(value) => {
                self.lookahead = Some(value);
                Ok(true)
            }
            None => {
                self.stage = Stage::Exhausted;
                self.advance.release();
                Ok(false)
            }
        }
    }

    fn next_value(&mut self) -> Result<BoxObject, RdfItError> {
        if !self.has_next()? {
            return Err(RdfItError::Exhausted);
        }
        self.lookahead.take().ok_or(RdfItError::Exhausted)
    }

    fn close(&mut self) {
        self.lookahead = None;
        if self.stage == Stage::Open {
            self.advance.release();
        }
        self.stage = Stage::Closed;
    }
}

impl<A: Advance> Drop for EagerIt<A> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<A: Advance> fmt::Debug for EagerIt<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerIt")
            .field("element", &self.element)
            .field("value_type", &self.value_type)
            .field("source", &self.source)
            .field("stage", &self.stage)
            .finish()
    }
}

/// Adapter over an in-memory iterator of values.
pub struct FromIter<I> {
    iter: Option<I>,
}

impl<I> Advance for FromIter<I>
where
    I: Iterator<Item = BoxObject> + Send,
{
    fn advance(&mut self) -> Result<Option<BoxObject>, RdfItError> {
        Ok(self.iter.as_mut().and_then(Iterator::next))
    }

    fn release(&mut self) {
        self.iter = None;
    }
}

/// Iterator over already materialized values.
pub fn from_iter<I>(
    iter: I,
    value_type: TypeKey,
    element: ItElement,
    source: SourceInfo,
) -> EagerIt<FromIter<I::IntoIter>>
where
    I: IntoIterator<Item = BoxObject>,
    I::IntoIter: Send,
{
    EagerIt::new(
        FromIter {
            iter: Some(iter.into_iter()),
        },
        value_type,
        element,
        source,
    )
}

/// Typed shorthand for [`from_iter`], detached from any source.
pub fn from_values<T>(
    values: Vec<T>,
    element: ItElement,
) -> EagerIt<FromIter<std::vec::IntoIter<BoxObject>>>
where
    T: Any + Send + fmt::Debug,
{
    let boxed: Vec<BoxObject> = values.into_iter().map(|v| Box::new(v) as BoxObject).collect();
    from_iter(
        boxed,
        TypeKey::of::<T>(),
        element,
        SourceInfo::detached("values"),
    )
}

/// Iterator that yields nothing.
#[derive(Debug)]
pub struct EmptyIt {
    value_type: TypeKey,
    element: ItElement,
    source: SourceInfo,
}

impl EmptyIt {
    pub fn new(value_type: TypeKey, element: ItElement) -> Self {
        Self {
            value_type,
            element,
            source: SourceInfo::detached("no sources"),
        }
    }
}

impl RdfIt for EmptyIt {
    fn value_type(&self) -> TypeKey {
        self.value_type
    }

    fn element(&self) -> ItElement {
        self.element
    }

    fn source(&self) -> &SourceInfo {
        &self.source
    }

    fn has_next(&mut self) -> Result<bool, RdfItError> {
        Ok(false)
    }

    fn next_value(&mut self) -> Result<BoxObject, RdfItError> {
        Err(RdfItError::Exhausted)
    }

    fn close(&mut self) {}
}

/// Typed view of an [`RdfIt`], usable as a std [`Iterator`].
///
/// Each item is downcast to `T`; a value of another type yields
/// [`RdfItError::UnexpectedType`]. The underlying iterator is closed when
/// the view is dropped.
pub struct Records<T> {
    inner: BoxIt,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> Records<T> {
    pub fn new(inner: BoxIt) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn element(&self) -> ItElement {
        self.inner.element()
    }

    pub fn source(&self) -> &SourceInfo {
        self.inner.source()
    }

    pub fn has_next(&mut self) -> Result<bool, RdfItError> {
        self.inner.has_next()
    }

    /// Next record, downcast to `T`.
    pub fn next_record(&mut self) -> Result<T, RdfItError> {
        let value = self.inner.next_value()?;
        downcast::<T>(value).map_err(|value| RdfItError::UnexpectedType {
            expected: TypeKey::of::<T>(),
            found: (*value).type_key(),
        })
    }

    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl<T: Any> Iterator for Records<T> {
    type Item = Result<T, RdfItError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.has_next() {
            Ok(true) => Some(self.next_record()),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<T> Drop for Records<T> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl<T> fmt::Debug for Records<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Records").field(&self.inner).finish()
    }
}
