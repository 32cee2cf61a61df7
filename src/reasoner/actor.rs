//! Actor-node base: ports, node core, and the termination protocol.
//!
//! Every node runs as a single-threaded actor. Its handlers mutate node
//! state with no locking; cross-node calls go exclusively through the
//! registry's drivers, which enqueue onto the remote's lane.
//!
//! The hard part lives here: in a pull graph with cycles, "done when all
//! upstream ports are done" never fires, because some node in the cycle is
//! always waiting on itself. Nodes therefore circulate inversion probes.
//! Each active upstream port remembers the latest probe it saw; a node
//! aggregates those into the best witnessed inversion and either forwards
//! it downstream or, when its own probe has come back strengthened and its
//! table has not grown, commits termination for the whole component.

use std::collections::{HashMap, HashSet};
use std::cmp::Ordering;

use tracing::{debug, trace};

use crate::concept::ConceptMap;
use crate::error::{EntailError, EntailResult, ProtocolError};
use crate::executor::Driver;
use crate::reasoner::answer_table::AnswerTable;
use crate::reasoner::message::{Inversion, Message, NodeId, PortId, PortRef};
use crate::reasoner::registry::NodeRegistry;
use std::sync::Arc;

/// Port lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Idle; the owner may pull.
    Ready,
    /// A pull is outstanding.
    Pulling,
    /// Terminal; the remote finished.
    Done,
}

impl PortState {
    const fn name(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Pulling => "PULLING",
            Self::Done => "DONE",
        }
    }
}

/// What the dispatcher should do with a message after the port recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Receipt {
    /// Dispatch to the node's handlers.
    Dispatch,
    /// Late traffic on a finished port; drop it.
    Drop,
}

/// Half-duplex pull channel from its owning node to one remote node.
#[derive(Debug)]
pub struct Port {
    id: PortId,
    owner: NodeId,
    remote: NodeId,
    state: PortState,
    next_index: usize,
    received_inversion: Option<Inversion>,
}

impl Port {
    fn new(id: PortId, owner: NodeId, remote: NodeId) -> Self {
        Self {
            id,
            owner,
            remote,
            state: PortState::Ready,
            next_index: 0,
            received_inversion: None,
        }
    }

    /// The remote node this port pulls from.
    #[must_use]
    pub const fn remote(&self) -> NodeId {
        self.remote
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> PortState {
        self.state
    }

    /// Index of the most recent pull, if any pull happened yet.
    #[must_use]
    pub const fn last_requested(&self) -> Option<usize> {
        self.next_index.checked_sub(1)
    }

    /// The latest inversion probe seen on this port.
    #[must_use]
    pub const fn received_inversion(&self) -> Option<Inversion> {
        self.received_inversion
    }

    /// Record an incoming message, transitioning the state machine.
    ///
    /// Answers must match the outstanding pull; probes may arrive at any
    /// time; terminals close the port from any state. A finished port drops
    /// everything else that trickles in afterwards.
    pub(crate) fn record_receive(&mut self, msg: &Message) -> EntailResult<Receipt> {
        if self.state == PortState::Done {
            return Ok(Receipt::Drop);
        }
        match msg {
            Message::Answer { index, .. } | Message::Conclusion { index, .. } => {
                if self.state != PortState::Pulling {
                    return Err(ProtocolError::PortStateViolation {
                        node: self.owner,
                        port: self.id.0,
                        state: self.state.name(),
                        received: msg.variant(),
                    }
                    .into());
                }
                let requested = self.next_index - 1;
                if *index != requested {
                    return Err(ProtocolError::IndexMismatch {
                        node: self.owner,
                        port: self.id.0,
                        requested,
                        received: *index,
                    }
                    .into());
                }
                self.state = PortState::Ready;
            }
            Message::HitInversion(inv) => {
                self.received_inversion = Some(*inv);
            }
            Message::Done { index } | Message::TerminateScc { index, .. } => {
                // A terminal is honoured only at the index we asked for.
                // Committed terminations are broadcast to every downstream
                // port, including readers still behind the frontier; those
                // readers must keep pulling the memoised answers, and will
                // meet this same terminal record in order at the frontier.
                if Some(*index) != self.last_requested() {
                    return Ok(Receipt::Drop);
                }
                self.state = PortState::Done;
            }
        }
        Ok(Receipt::Dispatch)
    }
}

/// Aggregate the inversions witnessed by a set of active ports.
///
/// The best entry wins under [`Inversion::priority`]; the aggregate's
/// `through_all_paths` additionally requires every port to carry an
/// inversion equal to the best one.
pub(crate) fn aggregate_inversions<'a>(
    entries: impl Iterator<Item = Option<&'a Inversion>> + Clone,
) -> Option<Inversion> {
    let mut best: Option<&Inversion> = None;
    for entry in entries.clone() {
        best = Inversion::better(best, entry);
    }
    let best = best?;
    let through_all_paths = best.through_all_paths
        && entries.into_iter().all(|entry| {
            entry.is_some_and(|other| best.priority(other) == Ordering::Equal)
        });
    Some(Inversion {
        node_id: best.node_id,
        through_all_paths,
        index: best.index,
    })
}

/// Per-node state shared by every node kind: identity, answer table, port
/// registry, downstream mirror set, and the forwarded-inversion cell.
pub struct NodeCore {
    node_id: NodeId,
    registry: Arc<NodeRegistry>,
    table: AnswerTable,
    ports: HashMap<PortId, Port>,
    active_ports: HashSet<PortId>,
    downstream: Vec<PortRef>,
    forwarded_inversion: Option<Inversion>,
    next_port_id: u64,
}

impl NodeCore {
    /// Create the core for a freshly registered node.
    pub(crate) fn new(node_id: NodeId, registry: Arc<NodeRegistry>) -> Self {
        Self {
            node_id,
            registry,
            table: AnswerTable::new(node_id),
            ports: HashMap::new(),
            active_ports: HashSet::new(),
            downstream: Vec::new(),
            forwarded_inversion: None,
            next_port_id: 0,
        }
    }

    /// This node's identity.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The owning registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// The node's answer table.
    #[must_use]
    pub const fn table(&self) -> &AnswerTable {
        &self.table
    }

    /// Mutable access to the answer table.
    pub fn table_mut(&mut self) -> &mut AnswerTable {
        &mut self.table
    }

    /// A port by id.
    #[must_use]
    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    /// True when no upstream port remains active.
    #[must_use]
    pub fn all_ports_done(&self) -> bool {
        self.active_ports.is_empty()
    }

    /// Open a new upstream port to `remote` and mirror it on the remote's
    /// downstream set.
    pub fn create_port(&mut self, remote: NodeId) -> EntailResult<PortId> {
        let id = PortId(self.next_port_id);
        self.next_port_id += 1;
        self.ports.insert(id, Port::new(id, self.node_id, remote));
        self.active_ports.insert(id);
        let downstream = PortRef {
            node: self.node_id,
            port: id,
        };
        self.registry.driver(remote)?.register_downstream(downstream);
        trace!(owner = %self.node_id, port = %id, remote = %remote, "port created");
        Ok(id)
    }

    pub(crate) fn add_downstream(&mut self, downstream: PortRef) {
        self.downstream.push(downstream);
    }

    /// Pull the next index on `port`.
    pub fn read_next(&mut self, port_id: PortId) -> EntailResult<()> {
        let port = self.ports.get_mut(&port_id).ok_or(ProtocolError::UnknownPort {
            node: self.node_id,
            port: port_id.0,
        })?;
        if port.state != PortState::Ready {
            return Err(ProtocolError::PortStateViolation {
                node: self.node_id,
                port: port_id.0,
                state: port.state.name(),
                received: "readNext",
            }
            .into());
        }
        port.state = PortState::Pulling;
        let index = port.next_index;
        port.next_index += 1;
        let reader = PortRef {
            node: self.node_id,
            port: port_id,
        };
        let remote = port.remote;
        if let Ok(driver) = self.registry.driver(remote) {
            driver.read_answer_at(reader, index);
        }
        Ok(())
    }

    /// Pull every active port that is ready.
    pub fn pull_ready_ports(&mut self) -> EntailResult<()> {
        let ready: Vec<PortId> = self
            .active_ports
            .iter()
            .copied()
            .filter(|id| self.ports.get(id).is_some_and(|p| p.state == PortState::Ready))
            .collect();
        for id in ready {
            self.read_next(id)?;
        }
        Ok(())
    }

    /// Send a message to one downstream port.
    pub fn send(&self, to: PortRef, message: Message) {
        trace!(from = %self.node_id, to = %to, msg = %message, "send");
        if let Ok(driver) = self.registry.driver(to.node) {
            driver.deliver(to.port, message);
        }
    }

    /// Send a message to every downstream port.
    pub fn broadcast_downstream(&self, message: &Message) {
        for downstream in &self.downstream {
            self.send(*downstream, message.clone());
        }
    }

    /// The best inversion witnessed across active ports, if any.
    #[must_use]
    pub fn aggregate_inversion(&self) -> Option<Inversion> {
        aggregate_inversions(
            self.active_ports
                .iter()
                .map(|id| self.ports[id].received_inversion.as_ref()),
        )
    }

    fn record_receive(&mut self, port_id: PortId, msg: &Message) -> EntailResult<Receipt> {
        let port = self
            .ports
            .get_mut(&port_id)
            .ok_or(ProtocolError::UnknownPort {
                node: self.node_id,
                port: port_id.0,
            })?;
        let was_active = port.state != PortState::Done;
        let receipt = port.record_receive(msg)?;
        if was_active && port.state == PortState::Done {
            self.active_ports.remove(&port_id);
        }
        Ok(receipt)
    }

    fn mark_port_done(&mut self, port_id: PortId) {
        if let Some(port) = self.ports.get_mut(&port_id) {
            port.state = PortState::Done;
        }
        self.active_ports.remove(&port_id);
    }

    fn active_port_ids(&self) -> Vec<PortId> {
        self.active_ports.iter().copied().collect()
    }
}

/// Behaviour of an actor node.
///
/// The provided methods implement the shared protocol; node kinds override
/// the handlers they specialise. All methods run on the node's own lane.
pub trait ActorNode: Send + 'static {
    /// Shared node state.
    fn core(&self) -> &NodeCore;

    /// Shared node state, mutably.
    fn core_mut(&mut self) -> &mut NodeCore;

    /// Lazy first-pull initialisation hook.
    fn ensure_initialised(&mut self) -> EntailResult<()> {
        Ok(())
    }

    /// True when the node has no production in flight outside its ports.
    ///
    /// While false, the node neither forwards nor commits inversion state:
    /// a probe crossing a node with pending output could certify a
    /// saturation that is about to be broken.
    fn is_quiescent(&self) -> bool {
        true
    }

    /// Whether the node may declare `Done` now.
    fn check_termination(&self) -> bool {
        self.core().all_ports_done()
    }

    /// Serve the pull `read_answer_at(reader, index)`.
    fn read_answer_at(&mut self, reader: PortRef, index: usize) -> EntailResult<()> {
        self.ensure_initialised()?;
        let node_id = self.core().node_id();
        if let Some(msg) = self.core().table().at(index)? {
            self.core().send(reader, msg);
            return Ok(());
        }
        if reader.node >= node_id {
            // Early probe: lets a cycle detect inversion before producing
            // anything. index=None marks it untrustworthy as a witness.
            self.core().send(
                reader,
                Message::HitInversion(Inversion {
                    node_id,
                    through_all_paths: true,
                    index: None,
                }),
            );
        }
        self.core_mut().table_mut().subscribe(reader, index)?;
        self.propagate_pull()
    }

    /// Enlist upstream ports to produce more answers.
    fn propagate_pull(&mut self) -> EntailResult<()> {
        self.core_mut().pull_ready_ports()
    }

    /// An ordinary answer arrived on `port`.
    fn handle_answer(&mut self, port: PortId, index: usize, answer: ConceptMap)
        -> EntailResult<()>;

    /// A conclusion answer arrived on `port`.
    fn handle_conclusion(
        &mut self,
        _port: PortId,
        _index: usize,
        _answer: ConceptMap,
    ) -> EntailResult<()> {
        Err(ProtocolError::UnexpectedMessage {
            node: self.core().node_id(),
            variant: "Conclusion",
        }
        .into())
    }

    /// A materialisation reply arrived from the materialiser service.
    fn receive_materialisation(
        &mut self,
        _port: PortId,
        _index: usize,
        _binding: Option<ConceptMap>,
    ) -> EntailResult<()> {
        Err(ProtocolError::UnexpectedMessage {
            node: self.core().node_id(),
            variant: "Materialisation",
        }
        .into())
    }

    /// A `Done` arrived on `port` (already marked inactive).
    fn handle_done(&mut self, _port: PortId) -> EntailResult<()> {
        if self.check_termination() {
            self.on_termination()
        } else {
            self.check_inversion_status_change()
        }
    }

    /// A `TerminateScc` arrived on `port` (already marked inactive).
    fn handle_terminate_scc(&mut self, port: PortId, expected: Inversion) -> EntailResult<()> {
        let matches = self
            .core()
            .forwarded_inversion
            .is_some_and(|fwd| fwd.priority(&expected) == Ordering::Equal);
        if matches {
            self.commit_termination(expected)
        } else {
            // Conservative fallback: the cycle must rediscover itself.
            self.handle_done(port)
        }
    }

    /// All upstream ports finished: complete this node with `Done`.
    fn on_termination(&mut self) -> EntailResult<()> {
        if self.core().table().is_complete() {
            return Ok(());
        }
        let core = self.core_mut();
        let size = core.table().size();
        let subscribers = core.table_mut().drain_subscribers(size)?;
        let msg = core.table_mut().record_done()?;
        debug!(node = %core.node_id(), size, "node done");
        for subscriber in subscribers {
            core.send(subscriber, msg.clone());
        }
        Ok(())
    }

    /// Commit SCC termination anchored at `expected`.
    ///
    /// Terminal in both directions: the table records `TerminateScc`, every
    /// still-active upstream port is closed, and the decision is broadcast
    /// on every downstream port (which covers all subscribers).
    fn commit_termination(&mut self, expected: Inversion) -> EntailResult<()> {
        if self.core().table().is_complete() {
            return Ok(());
        }
        let core = self.core_mut();
        let size = core.table().size();
        core.table_mut().drain_subscribers(size)?;
        let msg = core.table_mut().record_terminate_scc(expected)?;
        debug!(node = %core.node_id(), size, anchor = %expected, "SCC terminated");
        for port_id in core.active_port_ids() {
            core.mark_port_done(port_id);
        }
        core.broadcast_downstream(&msg);
        Ok(())
    }

    /// Recompute the aggregate inversion and forward or commit on change.
    fn check_inversion_status_change(&mut self) -> EntailResult<()> {
        if self.core().table().is_complete() || !self.is_quiescent() {
            return Ok(());
        }
        let Some(aggregate) = self.core().aggregate_inversion() else {
            return Ok(());
        };
        if self.core().forwarded_inversion == Some(aggregate) {
            return Ok(());
        }
        self.core_mut().forwarded_inversion = Some(aggregate);
        let node_id = self.core().node_id();
        let size = self.core().table().size();
        if aggregate.node_id == node_id {
            if aggregate.through_all_paths && aggregate.index == Some(size) {
                // Our probe returned on every path with our table unchanged:
                // the component is saturated.
                self.commit_termination(aggregate)
            } else {
                // Returned weakened or stale: circulate a fresh probe.
                let probe = Message::HitInversion(Inversion {
                    node_id,
                    through_all_paths: true,
                    index: Some(size),
                });
                self.core().broadcast_downstream(&probe);
                Ok(())
            }
        } else {
            self.core()
                .broadcast_downstream(&Message::HitInversion(aggregate));
            Ok(())
        }
    }

    /// Dispatch one incoming port message.
    fn receive_on_port(&mut self, port: PortId, msg: Message) -> EntailResult<()> {
        trace!(node = %self.core().node_id(), port = %port, msg = %msg, "received");
        let receipt = self.core_mut().record_receive(port, &msg)?;
        if receipt == Receipt::Drop {
            return Ok(());
        }
        match msg {
            Message::Answer { index, answer } => {
                self.handle_answer(port, index, answer)?;
                self.check_inversion_status_change()
            }
            Message::Conclusion { index, answer } => {
                self.handle_conclusion(port, index, answer)?;
                self.check_inversion_status_change()
            }
            Message::HitInversion(_) => self.check_inversion_status_change(),
            Message::Done { .. } => self.handle_done(port),
            Message::TerminateScc { expected, .. } => self.handle_terminate_scc(port, expected),
        }
    }

    /// Handler failure: escalate to the registry (global abort).
    fn fail(&self, error: EntailError) {
        self.core().registry().terminate(error);
    }
}

/// Type-erased scheduling surface of one node, held by the registry.
///
/// Every method enqueues onto the node's lane and returns immediately.
pub trait NodeDriver: Send + Sync {
    /// The node's identity.
    fn node_id(&self) -> NodeId;

    /// Schedule a pull against this node.
    fn read_answer_at(&self, reader: PortRef, index: usize);

    /// Schedule delivery of a port message.
    fn deliver(&self, port: PortId, message: Message);

    /// Schedule registration of a downstream mirror port.
    fn register_downstream(&self, downstream: PortRef);

    /// Schedule a materialisation reply.
    fn receive_materialisation(&self, port: PortId, index: usize, binding: Option<ConceptMap>);
}

/// Driver-backed handle implementing [`NodeDriver`] for a concrete node.
pub(crate) struct NodeHandle<N: ActorNode> {
    pub(crate) node_id: NodeId,
    pub(crate) driver: Driver<N>,
}

impl<N: ActorNode> NodeDriver for NodeHandle<N> {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn read_answer_at(&self, reader: PortRef, index: usize) {
        self.driver.execute(move |node| {
            if let Err(e) = ActorNode::read_answer_at(node, reader, index) {
                node.fail(e);
            }
        });
    }

    fn deliver(&self, port: PortId, message: Message) {
        self.driver.execute(move |node| {
            if let Err(e) = node.receive_on_port(port, message) {
                node.fail(e);
            }
        });
    }

    fn register_downstream(&self, downstream: PortRef) {
        self.driver.execute(move |node| {
            node.core_mut().add_downstream(downstream);
        });
    }

    fn receive_materialisation(&self, port: PortId, index: usize, binding: Option<ConceptMap>) {
        self.driver.execute(move |node| {
            if let Err(e) = ActorNode::receive_materialisation(node, port, index, binding) {
                node.fail(e);
            }
        });
    }
}
