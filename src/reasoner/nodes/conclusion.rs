//! Node producing one rule's conclusions.

use std::sync::Arc;

use crate::concept::ConceptMap;
use crate::error::{EntailError, EntailResult};
use crate::logic::{Rule, RuleId};
use crate::reasoner::actor::{ActorNode, NodeCore, PortState};
use crate::reasoner::message::{NodeId, PortId};
use crate::reasoner::registry::NodeRegistry;

/// Pulls the rule's condition conjunction and materialises every condition
/// answer into a conclusion record.
///
/// The materialiser round-trip is asynchronous, so the node counts in-flight
/// requests: while any are pending the node is not quiescent for the
/// termination protocol, and `Done` is deferred until the count drains.
pub(crate) struct ConclusionNode {
    core: NodeCore,
    rule: Rule,
    bounds: ConceptMap,
    condition_port: Option<PortId>,
    pending_materialisations: usize,
    initialised: bool,
}

impl ConclusionNode {
    pub(crate) fn new(
        node_id: NodeId,
        registry: Arc<NodeRegistry>,
        rule: RuleId,
        bounds: ConceptMap,
    ) -> EntailResult<Self> {
        let rule = registry
            .logic()
            .rule(rule)
            .cloned()
            .ok_or_else(|| EntailError::internal(format!("unknown rule {rule}")))?;
        Ok(Self {
            core: NodeCore::new(node_id, registry),
            rule,
            bounds,
            condition_port: None,
            pending_materialisations: 0,
            initialised: false,
        })
    }
}

impl ActorNode for ConclusionNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn is_quiescent(&self) -> bool {
        self.pending_materialisations == 0
    }

    fn check_termination(&self) -> bool {
        self.core.all_ports_done() && self.pending_materialisations == 0
    }

    fn ensure_initialised(&mut self) -> EntailResult<()> {
        if self.initialised {
            return Ok(());
        }
        self.initialised = true;
        let registry = Arc::clone(self.core.registry());
        // Conclusion variables are condition variables by rule validation,
        // so the conclusion-space bounds apply to the condition directly.
        let resolvables = registry.logic().compile(&self.rule.when);
        let plan = registry.logic().plan(resolvables)?;
        let condition = registry.conjunction_node(&plan, self.bounds.clone())?;
        self.condition_port = Some(self.core.create_port(condition.node_id())?);
        Ok(())
    }

    fn handle_answer(&mut self, port: PortId, index: usize, answer: ConceptMap) -> EntailResult<()> {
        if self.core.table().is_complete() {
            return Ok(());
        }
        if self.condition_port != Some(port) {
            return Err(crate::error::ProtocolError::UnexpectedMessage {
                node: self.core.node_id(),
                variant: "Answer",
            }
            .into());
        }
        let registry = Arc::clone(self.core.registry());
        self.pending_materialisations += 1;
        registry.materialiser()?.materialise(
            self.core.node_id(),
            port,
            index,
            answer,
            self.rule.id,
        );
        // The port is re-pulled when the reply arrives; one condition answer
        // is in flight per port at a time.
        Ok(())
    }

    fn receive_materialisation(
        &mut self,
        port: PortId,
        _index: usize,
        binding: Option<ConceptMap>,
    ) -> EntailResult<()> {
        self.pending_materialisations = self.pending_materialisations.saturating_sub(1);
        if self.core.table().is_complete() {
            return Ok(());
        }
        if let Some(binding) = binding {
            let size = self.core.table().size();
            let subscribers = self.core.table_mut().drain_subscribers(size)?;
            let msg = self.core.table_mut().record_conclusion(binding)?;
            for subscriber in subscribers {
                self.core.send(subscriber, msg.clone());
            }
        }
        if self
            .core
            .port(port)
            .is_some_and(|p| p.state() == PortState::Ready)
        {
            self.core.read_next(port)?;
        }
        if self.pending_materialisations == 0 {
            if self.check_termination() {
                return self.on_termination();
            }
            // Resume probe propagation now that production has drained.
            return self.check_inversion_status_change();
        }
        Ok(())
    }
}
