//! Recursive node for an atom that rules can conclude.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::concept::ConceptMap;
use crate::error::{EntailResult, ProtocolError};
use crate::logic::Unifier;
use crate::pattern::Atom;
use crate::reasoner::actor::{ActorNode, NodeCore};
use crate::reasoner::message::{NodeId, PortId};
use crate::reasoner::registry::NodeRegistry;

/// Serves an atom from direct facts and from every applicable rule.
///
/// On first pull it opens one port to the retrievable node for its own
/// atom and, per applicable `(rule, unifier)` with satisfiable bounds, one
/// port to the rule's conclusion node. Appended answers are deduplicated
/// through a node-local seen-set; ports are re-pulled after every receipt
/// to stay hot.
pub(crate) struct ConcludableNode {
    core: NodeCore,
    atom: Atom,
    bounds: ConceptMap,
    seen: HashSet<ConceptMap>,
    traversal_port: Option<PortId>,
    rule_ports: HashMap<PortId, Unifier>,
    initialised: bool,
}

impl ConcludableNode {
    pub(crate) fn new(
        node_id: NodeId,
        registry: Arc<NodeRegistry>,
        atom: Atom,
        bounds: ConceptMap,
    ) -> Self {
        Self {
            core: NodeCore::new(node_id, registry),
            atom,
            bounds,
            seen: HashSet::new(),
            traversal_port: None,
            rule_ports: HashMap::new(),
            initialised: false,
        }
    }

    /// Record `answer` if novel and notify waiting subscribers.
    fn record_if_novel(&mut self, answer: ConceptMap) -> EntailResult<()> {
        if !self.seen.insert(answer.clone()) {
            trace!(node = %self.core.node_id(), %answer, "duplicate suppressed");
            return Ok(());
        }
        let size = self.core.table().size();
        let subscribers = self.core.table_mut().drain_subscribers(size)?;
        let msg = self.core.table_mut().record_answer(answer)?;
        for subscriber in subscribers {
            self.core.send(subscriber, msg.clone());
        }
        Ok(())
    }
}

impl ActorNode for ConcludableNode {
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

        let retrievable = registry.retrievable_node(self.atom.clone(), self.bounds.clone())?;
        self.traversal_port = Some(self.core.create_port(retrievable.node_id())?);

        for (rule_id, unifier) in registry.logic().applicable_rules(&self.atom) {
            let Some(conclusion_bounds) = unifier.bounds_to_conclusion(&self.bounds) else {
                continue;
            };
            let conclusion = registry.conclusion_node(rule_id, conclusion_bounds)?;
            let port = self.core.create_port(conclusion.node_id())?;
            self.rule_ports.insert(port, unifier);
        }
        Ok(())
    }

    fn handle_answer(&mut self, port: PortId, _index: usize, answer: ConceptMap) -> EntailResult<()> {
        if self.core.table().is_complete() {
            return Ok(());
        }
        if self.traversal_port != Some(port) {
            return Err(ProtocolError::UnexpectedMessage {
                node: self.core.node_id(),
                variant: "Answer",
            }
            .into());
        }
        self.record_if_novel(answer)?;
        self.core.read_next(port)
    }

    fn handle_conclusion(
        &mut self,
        port: PortId,
        _index: usize,
        answer: ConceptMap,
    ) -> EntailResult<()> {
        if self.core.table().is_complete() {
            return Ok(());
        }
        let Some(unifier) = self.rule_ports.get(&port).cloned() else {
            return Err(ProtocolError::UnexpectedMessage {
                node: self.core.node_id(),
                variant: "Conclusion",
            }
            .into());
        };
        if let Some(translated) = unifier.conclusion_to_answer(&answer, &self.bounds) {
            self.record_if_novel(translated)?;
        }
        self.core.read_next(port)
    }
}
