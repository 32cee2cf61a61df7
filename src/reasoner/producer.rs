//! Consumer bridge: producer state machine, root node, and answer stream.
//!
//! The producer accepts demand from the consumer, lazily builds the root of
//! the node graph, and pumps the pull protocol one answer at a time. The
//! [`AnswerStream`] is the public handle: a channel of ordered answers that
//! ends with a clean completion or the failure that aborted the request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::concept::ConceptMap;
use crate::error::{EntailError, EntailResult, ExecutionError};
use crate::executor::Driver;
use crate::logic::ConjunctionPlan;
use crate::reasoner::actor::{ActorNode, NodeCore};
use crate::reasoner::message::{Inversion, NodeId, PortId};
use crate::reasoner::registry::NodeRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerState {
    Init,
    Ready,
    Pulling,
    Finished,
    Exception,
}

/// Items delivered on the consumer queue.
enum StreamItem {
    Answer(ConceptMap),
    Done,
    Failed(EntailError),
}

/// Shared producer state between the consumer thread and the root actor.
pub(crate) struct ReasonerProducer {
    registry: Arc<NodeRegistry>,
    plan: Arc<ConjunctionPlan>,
    state: Mutex<ProducerState>,
    required_answers: AtomicUsize,
    answers_received: AtomicUsize,
    queue: Sender<StreamItem>,
    root: OnceLock<Driver<RootNode>>,
}

impl ReasonerProducer {
    /// Add demand for `requested` answers, initialising on first use.
    fn produce(self: &Arc<Self>, requested: usize) -> EntailResult<()> {
        if requested == 0 {
            return Ok(());
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| EntailError::internal("producer lock poisoned"))?;
        match *state {
            ProducerState::Exception => {
                let _ = self.queue.send(StreamItem::Failed(self.registry.terminated_error()));
                Ok(())
            }
            ProducerState::Finished => {
                let _ = self.queue.send(StreamItem::Done);
                Ok(())
            }
            ProducerState::Init => {
                self.required_answers.fetch_add(requested, Ordering::SeqCst);
                self.initialise()?;
                *state = ProducerState::Pulling;
                self.pull();
                Ok(())
            }
            ProducerState::Ready => {
                self.required_answers.fetch_add(requested, Ordering::SeqCst);
                *state = ProducerState::Pulling;
                self.pull();
                Ok(())
            }
            ProducerState::Pulling => {
                self.required_answers.fetch_add(requested, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn initialise(self: &Arc<Self>) -> EntailResult<()> {
        let source = self
            .registry
            .conjunction_node(&self.plan, ConceptMap::new())?;
        let source_id = source.node_id();
        let shared = Arc::downgrade(self);
        // The root is never pulled, so it never originates inversion probes;
        // probes reaching it die there (no downstream ports).
        let (node_id, driver) = self.registry.register_root(move |id, registry| {
            RootNode::new(id, registry, source_id, shared)
        })?;
        debug!(root = %node_id, source = %source_id, "root node created");
        let _ = self.root.set(driver);
        Ok(())
    }

    /// Schedule the next pull on the root.
    fn pull(&self) {
        let index = self.answers_received.fetch_add(1, Ordering::SeqCst);
        if let Some(driver) = self.root.get() {
            driver.execute(move |root| {
                if let Err(e) = root.pull_next(index) {
                    root.fail(e);
                }
            });
        }
    }

    /// Root saw an answer: forward it and keep pulling while demand remains.
    fn on_answer(&self, answer: ConceptMap) {
        let Ok(mut state) = self.state.lock() else { return };
        if matches!(*state, ProducerState::Finished | ProducerState::Exception) {
            return;
        }
        let _ = self.queue.send(StreamItem::Answer(answer));
        let previous = self.required_answers.load(Ordering::SeqCst);
        let remaining = previous.saturating_sub(1);
        self.required_answers.store(remaining, Ordering::SeqCst);
        if remaining > 0 {
            self.pull();
        } else {
            *state = ProducerState::Ready;
        }
    }

    /// Root saw a terminal: the stream is complete.
    fn on_finish(&self) {
        let Ok(mut state) = self.state.lock() else { return };
        if matches!(*state, ProducerState::Finished | ProducerState::Exception) {
            return;
        }
        *state = ProducerState::Finished;
        self.required_answers.store(0, Ordering::SeqCst);
        let _ = self.queue.send(StreamItem::Done);
    }

    /// Registry terminated: the stream failed.
    fn on_failure(&self, cause: EntailError) {
        let Ok(mut state) = self.state.lock() else { return };
        if matches!(*state, ProducerState::Finished | ProducerState::Exception) {
            return;
        }
        *state = ProducerState::Exception;
        self.required_answers.store(0, Ordering::SeqCst);
        let _ = self.queue.send(StreamItem::Failed(cause));
    }
}

/// The consumer-facing node: holds the single port into the graph root.
pub(crate) struct RootNode {
    core: NodeCore,
    source: NodeId,
    port: Option<PortId>,
    producer: Weak<ReasonerProducer>,
}

impl RootNode {
    fn new(
        node_id: NodeId,
        registry: Arc<NodeRegistry>,
        source: NodeId,
        producer: Weak<ReasonerProducer>,
    ) -> Self {
        Self {
            core: NodeCore::new(node_id, registry),
            source,
            port: None,
            producer,
        }
    }

    /// Pull the answer at `index` from the source conjunction.
    pub(crate) fn pull_next(&mut self, index: usize) -> EntailResult<()> {
        let port = match self.port {
            Some(port) => port,
            None => {
                let port = self.core.create_port(self.source)?;
                self.port = Some(port);
                port
            }
        };
        debug_assert_eq!(
            Some(index),
            self.core.port(port).map(|p| p.last_requested().map_or(0, |i| i + 1)),
        );
        self.core.read_next(port)
    }
}

impl ActorNode for RootNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn handle_answer(&mut self, _port: PortId, _index: usize, answer: ConceptMap) -> EntailResult<()> {
        if let Some(producer) = self.producer.upgrade() {
            producer.on_answer(answer);
        }
        Ok(())
    }

    fn handle_done(&mut self, _port: PortId) -> EntailResult<()> {
        if let Some(producer) = self.producer.upgrade() {
            producer.on_finish();
        }
        Ok(())
    }

    fn handle_terminate_scc(&mut self, _port: PortId, _expected: Inversion) -> EntailResult<()> {
        if let Some(producer) = self.producer.upgrade() {
            producer.on_finish();
        }
        Ok(())
    }
}

/// Ordered stream of answers for one query.
///
/// Dropping the stream recycles the request: the registry is poisoned and
/// its nodes released.
pub struct AnswerStream {
    producer: Arc<ReasonerProducer>,
    rx: Receiver<StreamItem>,
    outstanding: usize,
    finished: bool,
}

impl AnswerStream {
    /// Wire a producer for `plan` onto `registry`.
    pub(crate) fn open(registry: Arc<NodeRegistry>, plan: Arc<ConjunctionPlan>) -> Self {
        let (tx, rx) = unbounded::<StreamItem>();
        let producer = Arc::new(ReasonerProducer {
            registry: Arc::clone(&registry),
            plan,
            state: Mutex::new(ProducerState::Init),
            required_answers: AtomicUsize::new(0),
            answers_received: AtomicUsize::new(0),
            queue: tx,
            root: OnceLock::new(),
        });
        let hook = Arc::downgrade(&producer);
        registry.set_failure_hook(Box::new(move |cause| {
            if let Some(producer) = hook.upgrade() {
                producer.on_failure(cause);
            }
        }));
        Self {
            producer,
            rx,
            outstanding: 0,
            finished: false,
        }
    }

    /// Request `n` more answers without blocking.
    pub fn request(&mut self, n: usize) -> EntailResult<()> {
        self.producer.produce(n)?;
        self.outstanding += n;
        Ok(())
    }

    /// The next answer, blocking until one arrives or the stream ends.
    ///
    /// Returns `Ok(None)` on clean completion. Demand is issued one answer
    /// at a time; answers already requested are never re-produced.
    pub fn next_answer(&mut self) -> EntailResult<Option<ConceptMap>> {
        if self.finished {
            return Ok(None);
        }
        if self.outstanding == 0 {
            self.request(1)?;
        }
        match self.rx.recv() {
            Ok(item) => self.consume(item),
            Err(_) => {
                self.finished = true;
                Err(ExecutionError::Disconnected.into())
            }
        }
    }

    /// Like [`next_answer`](Self::next_answer) with a timeout.
    pub fn next_answer_timeout(&mut self, timeout: Duration) -> EntailResult<Option<ConceptMap>> {
        if self.finished {
            return Ok(None);
        }
        if self.outstanding == 0 {
            self.request(1)?;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(item) => self.consume(item),
            Err(RecvTimeoutError::Timeout) => Err(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                Err(ExecutionError::Disconnected.into())
            }
        }
    }

    fn consume(&mut self, item: StreamItem) -> EntailResult<Option<ConceptMap>> {
        self.outstanding = self.outstanding.saturating_sub(1);
        match item {
            StreamItem::Answer(answer) => Ok(Some(answer)),
            StreamItem::Done => {
                self.finished = true;
                Ok(None)
            }
            StreamItem::Failed(cause) => {
                self.finished = true;
                Err(cause)
            }
        }
    }

    /// Collect every remaining answer.
    pub fn collect_all(mut self) -> EntailResult<Vec<ConceptMap>> {
        let mut answers = Vec::new();
        while let Some(answer) = self.next_answer()? {
            answers.push(answer);
        }
        Ok(answers)
    }
}

impl Iterator for AnswerStream {
    type Item = EntailResult<ConceptMap>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_answer().transpose()
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.producer.registry.shutdown();
    }
}
