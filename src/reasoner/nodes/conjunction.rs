//! Node evaluating a conjunction plan.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::concept::{ConceptMap, Variable};
use crate::error::{EntailResult, ProtocolError};
use crate::logic::{ConjunctionPlan, Resolvable};
use crate::reasoner::actor::{ActorNode, NodeCore};
use crate::reasoner::message::{NodeId, PortId};
use crate::reasoner::registry::NodeRegistry;

/// Joins a compiled plan head-first.
///
/// One port pulls the head resolvable's node; every head answer extends the
/// bounds and opens a port to the node for the remaining plan under the
/// extended bounds. The registry cache makes equal-bounds tails shared, so
/// recursion through a conjunction converges on the same node instances and
/// the termination protocol can close the cycle.
pub(crate) struct ConjunctionNode {
    core: NodeCore,
    plan: Arc<ConjunctionPlan>,
    bounds: ConceptMap,
    head_port: Option<PortId>,
    tail_prefixes: HashMap<PortId, ConceptMap>,
    spawned: HashSet<ConceptMap>,
    initialised: bool,
}

impl ConjunctionNode {
    pub(crate) fn new(
        node_id: NodeId,
        registry: Arc<NodeRegistry>,
        plan: Arc<ConjunctionPlan>,
        bounds: ConceptMap,
    ) -> Self {
        Self {
            core: NodeCore::new(node_id, registry),
            plan,
            bounds,
            head_port: None,
            tail_prefixes: HashMap::new(),
            spawned: HashSet::new(),
            initialised: false,
        }
    }

    fn record(&mut self, answer: ConceptMap) -> EntailResult<()> {
        let size = self.core.table().size();
        let subscribers = self.core.table_mut().drain_subscribers(size)?;
        let msg = self.core.table_mut().record_answer(answer)?;
        for subscriber in subscribers {
            self.core.send(subscriber, msg.clone());
        }
        Ok(())
    }

    /// Open a port to the tail plan under `extended` bounds, once per
    /// distinct extension.
    fn spawn_tail(&mut self, tail: Vec<Resolvable>, extended: ConceptMap) -> EntailResult<()> {
        if !self.spawned.insert(extended.clone()) {
            return Ok(());
        }
        let registry = Arc::clone(self.core.registry());
        let tail_vars = variables_of(&tail);
        let tail_bounds = extended.restrict(tail_vars.iter());
        let tail_plan = registry.logic().plan(tail)?;
        let node = registry.conjunction_node(&tail_plan, tail_bounds)?;
        let port = self.core.create_port(node.node_id())?;
        self.tail_prefixes.insert(port, extended);
        self.core.read_next(port)
    }
}

fn variables_of(resolvables: &[Resolvable]) -> BTreeSet<Variable> {
    resolvables
        .iter()
        .flat_map(|r| r.atom().variables())
        .collect()
}

impl ActorNode for ConjunctionNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn ensure_initialised(&mut self) -> EntailResult<()> {
        if self.initialised {
            return Ok(());
        }
        self.initialised = true;
        let registry = Arc::clone(self.core.registry());
        let head = registry.resolvable_node(self.plan.head(), &self.bounds)?;
        self.head_port = Some(self.core.create_port(head.node_id())?);
        Ok(())
    }

    fn handle_answer(&mut self, port: PortId, _index: usize, answer: ConceptMap) -> EntailResult<()> {
        if self.core.table().is_complete() {
            return Ok(());
        }
        if self.head_port == Some(port) {
            // Head answers never clash with the bounds: the head node only
            // saw the restriction of our bounds to its own variables.
            if let Some(extended) = self.bounds.merge(&answer) {
                match self.plan.tail() {
                    None => self.record(extended)?,
                    Some(tail) => self.spawn_tail(tail, extended)?,
                }
            }
            return self.core.read_next(port);
        }
        if let Some(prefix) = self.tail_prefixes.get(&port).cloned() {
            if let Some(full) = prefix.merge(&answer) {
                self.record(full)?;
            }
            return self.core.read_next(port);
        }
        Err(ProtocolError::UnexpectedMessage {
            node: self.core.node_id(),
            variant: "Answer",
        }
        .into())
    }
}
