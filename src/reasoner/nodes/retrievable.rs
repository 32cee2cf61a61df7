//! Leaf node over a storage traversal.

use std::sync::Arc;

use crate::concept::ConceptMap;
use crate::error::{EntailResult, ProtocolError};
use crate::pattern::Atom;
use crate::reasoner::actor::{ActorNode, NodeCore};
use crate::reasoner::message::{Message, NodeId, PortId, PortRef};
use crate::reasoner::registry::NodeRegistry;
use crate::storage::TraversalIter;

/// Wraps a lazy traversal iterator over the fact store.
///
/// Retrievable nodes have no upstream ports and never participate in
/// cycles, so every pull is served synchronously: from the table if the
/// index is already memoised, otherwise by advancing the traversal once.
pub(crate) struct RetrievableNode {
    core: NodeCore,
    traversal: TraversalIter,
}

impl RetrievableNode {
    pub(crate) fn new(
        node_id: NodeId,
        registry: Arc<NodeRegistry>,
        atom: &Atom,
        bounds: &ConceptMap,
    ) -> EntailResult<Self> {
        let traversal = registry.store().scan(atom, bounds)?;
        Ok(Self {
            core: NodeCore::new(node_id, registry),
            traversal,
        })
    }
}

impl ActorNode for RetrievableNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn read_answer_at(&mut self, reader: PortRef, index: usize) -> EntailResult<()> {
        if let Some(msg) = self.core.table().at(index)? {
            self.core.send(reader, msg);
            return Ok(());
        }
        let msg = match self.traversal.next() {
            Some(answer) => self.core.table_mut().record_answer(answer)?,
            None => self.core.table_mut().record_done()?,
        };
        self.core.send(reader, msg);
        Ok(())
    }

    fn handle_answer(
        &mut self,
        _port: PortId,
        _index: usize,
        _answer: ConceptMap,
    ) -> EntailResult<()> {
        Err(ProtocolError::UnexpectedMessage {
            node: self.core.node_id(),
            variant: "Answer",
        }
        .into())
    }

    fn receive_on_port(&mut self, _port: PortId, msg: Message) -> EntailResult<()> {
        // A leaf has no upstream ports; nothing may be delivered to it.
        Err(ProtocolError::UnexpectedMessage {
            node: self.core.node_id(),
            variant: msg.variant(),
        }
        .into())
    }
}
