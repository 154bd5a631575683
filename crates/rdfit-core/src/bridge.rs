//! Push-to-pull bridge.
//!
//! Runs a [`PushParser`] on a pool worker and exposes what it delivers as an
//! [`RdfIt`]. Records travel through a bounded queue: the worker blocks
//! when the queue is full, the consumer blocks when it is empty. Closing the
//! iterator interrupts the worker and waits until it has stopped
//! delivering, so nothing outlives `close`.

use crate::error::{ItElement, RdfItError, SourceError, SourceInfo};
use crate::it::RdfIt;
use crate::listener::RdfListener;
use crate::parser::PushParser;
use crate::pool::WorkerPool;
use crate::types::{BoxObject, TypeHierarchy, TypeKey};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

// ============================================================================
// Channel
// ============================================================================

enum Slot {
    Value(BoxObject),
    End,
}

#[derive(Default)]
struct ChannelState {
    queue: VecDeque<Slot>,
    /// The end marker has been queued.
    terminated: bool,
    /// The job has begun running the parser.
    started: bool,
    /// The worker will not deliver anything anymore.
    finished: bool,
    /// The consumer asked the worker to stop.
    aborted: bool,
    error: Option<SourceError>,
}

struct Channel {
    state: Mutex<ChannelState>,
    not_empty: Condvar,
    not_full: Condvar,
    done: Condvar,
    capacity: usize,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            done: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the job as running, unless the consumer already gave up on it.
    fn begin(&self) -> bool {
        let mut state = self.lock();
        if state.aborted {
            return false;
        }
        state.started = true;
        true
    }

    /// Block until there is room, then queue `value`.
    fn deliver(&self, value: BoxObject) -> Result<(), RdfItError> {
        let mut state = self.lock();
        loop {
            if state.aborted || state.terminated {
                return Err(RdfItError::Interrupted);
            }
            if state.queue.len() < self.capacity {
                state.queue.push_back(Slot::Value(value));
                self.not_empty.notify_one();
                return Ok(());
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Keep the first failure; later distinct ones become secondary.
    fn record_error(&self, origin: &SourceInfo, err: RdfItError) {
        if err.is_interrupt() {
            return;
        }
        let mut state = self.lock();
        if state.finished && state.queue.is_empty() {
            log::warn!("failure after {origin} was fully consumed: {err}");
        }
        if let Some(primary) = state.error.as_mut() {
            primary.add_secondary(err);
            return;
        }
        state.error = Some(match err {
            RdfItError::Source(e) => *e,
            other => SourceError::new(origin.clone(), other),
        });
    }

    /// Queue the end marker once and mark delivery as finished.
    fn finish(&self) {
        let mut state = self.lock();
        if !state.terminated {
            state.queue.push_back(Slot::End);
            state.terminated = true;
        }
        state.finished = true;
        self.not_empty.notify_all();
        self.done.notify_all();
    }

    /// Interrupt the worker, wait until it stops, and drop what is queued.
    ///
    /// A job that has not begun yet never will, so there is nothing to wait
    /// for.
    fn abort(&self) {
        let mut state = self.lock();
        state.aborted = true;
        self.not_full.notify_all();
        if !state.started {
            state.finished = true;
        }
        while !state.finished {
            state = self
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.queue.clear();
    }
}

// ============================================================================
// Producer side
// ============================================================================

/// Listener the push parser talks to on the worker thread.
///
/// Checks every record against the iterator's element kind and value type
/// before queueing it. Records of the other element kind are skipped when
/// the parser declares it produces both, and rejected otherwise.
pub struct BridgeListener {
    channel: Arc<Channel>,
    hierarchy: Arc<TypeHierarchy>,
    element: ItElement,
    value_type: TypeKey,
    skipped: Option<ItElement>,
    origin: SourceInfo,
    rejected: bool,
}

impl BridgeListener {
    fn accept(&mut self, found: ItElement, value: BoxObject) -> Result<(), RdfItError> {
        if self.rejected {
            return Err(RdfItError::Interrupted);
        }
        if self.skipped == Some(found) {
            return Ok(());
        }
        let checked = if found != self.element {
            Err(RdfItError::UnexpectedElement {
                expected: self.element,
                found,
            })
        } else if !self.hierarchy.is_instance(&*value, self.value_type) {
            Err(RdfItError::UnexpectedType {
                expected: self.value_type,
                found: (*value).type_key(),
            })
        } else {
            Ok(())
        };
        match checked {
            Ok(()) => self.channel.deliver(value),
            Err(e) => {
                // the error is kept here; the parser only needs to stop
                self.channel.record_error(&self.origin, e);
                self.rejected = true;
                Err(RdfItError::Interrupted)
            }
        }
    }
}

impl RdfListener for BridgeListener {
    fn triple_type(&self) -> TypeKey {
        match self.element {
            ItElement::Triple => self.value_type,
            ItElement::Quad => TypeKey::any(),
        }
    }

    fn quad_type(&self) -> TypeKey {
        match self.element {
            ItElement::Quad => self.value_type,
            ItElement::Triple => TypeKey::any(),
        }
    }

    fn on_triple(&mut self, triple: BoxObject) -> Result<(), RdfItError> {
        self.accept(ItElement::Triple, triple)
    }

    fn on_quad(&mut self, quad: BoxObject) -> Result<(), RdfItError> {
        self.accept(ItElement::Quad, quad)
    }

    fn on_source_error(&mut self, source: &SourceInfo, error: &RdfItError) -> bool {
        log::debug!("background parse of {source} failed: {error}");
        false
    }

    fn on_finish(&mut self) -> Result<(), RdfItError> {
        self.channel.finish();
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Consumer side
// ============================================================================

/// Iterator over the records a push parser delivers in the background.
pub struct CallbackIt {
    channel: Arc<Channel>,
    pool: WorkerPool,
    task: Option<JoinHandle<()>>,
    value_type: TypeKey,
    element: ItElement,
    source: SourceInfo,
    lookahead: Option<BoxObject>,
    ended: bool,
    closed: bool,
}

impl CallbackIt {
    /// Start parsing `source` with `parser` on `pool`.
    ///
    /// Returns immediately; records become available as the parser
    /// delivers them. At most `capacity` records are buffered.
    pub fn spawn(
        pool: &WorkerPool,
        parser: Arc<dyn PushParser>,
        source: BoxObject,
        element: ItElement,
        value_type: TypeKey,
        hierarchy: Arc<TypeHierarchy>,
        capacity: usize,
    ) -> Result<Self, RdfItError> {
        let origin = SourceInfo::of(&*source);
        let channel = Arc::new(Channel::new(capacity));
        let other = match element {
            ItElement::Triple => ItElement::Quad,
            ItElement::Quad => ItElement::Triple,
        };
        let mut listener = BridgeListener {
            channel: channel.clone(),
            hierarchy,
            element,
            value_type,
            skipped: parser.decl().produces(other).map(|_| other),
            origin: origin.clone(),
            rejected: false,
        };

        let job_channel = channel.clone();
        let task = pool.submit(move || {
            let origin = listener.origin.clone();
            if !job_channel.begin() {
                log::trace!("background parse of {origin} cancelled before it started");
                return;
            }
            log::debug!("background parse of {origin} with {}", parser.decl().id);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), RdfItError> {
                parser.parse(source, &mut listener)?;
                listener.on_finish_source(&origin)?;
                listener.on_finish()
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => job_channel.record_error(&origin, e),
                Err(payload) => {
                    let message = panic_message(payload);
                    log::error!("parser {} panicked on {origin}: {message}", parser.decl().id);
                    job_channel.record_error(&origin, RdfItError::Panicked(message));
                }
            }
            job_channel.finish();
        })?;

        Ok(Self {
            channel,
            pool: pool.clone(),
            task: Some(task),
            value_type,
            element,
            source: origin,
            lookahead: None,
            ended: false,
            closed: false,
        })
    }
}

impl RdfIt for CallbackIt {
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
        if self.ended {
            return Ok(false);
        }
        let mut state = self.channel.lock();
        let slot = loop {
            if let Some(slot) = state.queue.pop_front() {
                break slot;
            }
            state = self
                .channel
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };
        match slot {
            Slot::Value(value) => {
                self.channel.not_full.notify_one();
                drop(state);
                self.lookahead = Some(value);
                Ok(true)
            }
            Slot::End => {
                self.ended = true;
                match state.error.take() {
                    Some(err) => Err(err.into()),
                    None => Ok(false),
                }
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
        if self.closed {
            return;
        }
        self.closed = true;
        self.ended = true;
        self.lookahead = None;
        self.channel.abort();
        // drops the job from the pool queue if it never got a thread
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CallbackIt {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CallbackIt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackIt")
            .field("element", &self.element)
            .field("value_type", &self.value_type)
            .field("source", &self.source)
            .field("pool", &self.pool)
            .field("ended", &self.ended)
            .field("closed", &self.closed)
            .finish()
    }
}
