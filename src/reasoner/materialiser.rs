//! Materialiser service actor.
//!
//! A stateless service that turns condition answers into conclusion
//! bindings. It is an actor for scheduling purposes but not a reasoner
//! node: it has no answer table, no ports, and takes no part in the
//! termination protocol.

use std::sync::Arc;

use tracing::trace;

use crate::concept::ConceptMap;
use crate::error::EntailError;
use crate::executor::Driver;
use crate::logic::RuleId;
use crate::reasoner::message::{NodeId, PortId};
use crate::reasoner::registry::NodeRegistry;

/// The materialiser actor's state.
pub(crate) struct MaterialiserNode {
    registry: Arc<NodeRegistry>,
}

impl MaterialiserNode {
    pub(crate) fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Materialise one condition answer against `rule`'s conclusion and
    /// reply to the sender's conclusion handler.
    ///
    /// Delivery is best-effort ordered per sender but carries no causal
    /// guarantee between distinct materialisation requests.
    fn materialise(
        &mut self,
        sender: NodeId,
        port: PortId,
        index: usize,
        condition_answer: &ConceptMap,
        rule: RuleId,
    ) {
        let Some(rule) = self.registry.logic().rule(rule) else {
            self.registry
                .terminate(EntailError::internal(format!("unknown rule {rule}")));
            return;
        };
        let binding = self.registry.logic().bind_conclusion(rule, condition_answer);
        trace!(%sender, %port, index, produced = binding.is_some(), "materialised");
        if let Ok(driver) = self.registry.driver(sender) {
            driver.receive_materialisation(port, index, binding);
        }
    }
}

/// Scheduling handle for the materialiser actor.
#[derive(Clone)]
pub(crate) struct MaterialiserHandle {
    driver: Driver<MaterialiserNode>,
}

impl MaterialiserHandle {
    pub(crate) fn new(driver: Driver<MaterialiserNode>) -> Self {
        Self { driver }
    }

    /// Schedule one materialisation request.
    pub(crate) fn materialise(
        &self,
        sender: NodeId,
        port: PortId,
        index: usize,
        condition_answer: ConceptMap,
        rule: RuleId,
    ) {
        self.driver.execute(move |node| {
            node.materialise(sender, port, index, &condition_answer, rule);
        });
    }
}
