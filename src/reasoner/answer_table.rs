//! Per-node answer table.
//!
//! A monotone, append-only log serving two purposes: memoising the node's
//! output for all future readers, and holding the subscribers waiting for
//! the next not-yet-recorded index. Indexes are dense from zero; at most
//! one terminal record exists and it is always last.

use std::collections::HashSet;

use crate::concept::ConceptMap;
use crate::error::{EntailResult, ProtocolError};
use crate::reasoner::message::{Inversion, Message, NodeId, PortRef};

/// Monotone answer log with a subscriber set.
#[derive(Debug)]
pub struct AnswerTable {
    node: NodeId,
    answers: Vec<Message>,
    subscribers: HashSet<PortRef>,
    complete: bool,
}

impl AnswerTable {
    /// Creates an empty table owned by `node`.
    #[must_use]
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            answers: Vec::new(),
            subscribers: HashSet::new(),
            complete: false,
        }
    }

    /// Number of records, including a terminal record if present.
    #[must_use]
    pub fn size(&self) -> usize {
        self.answers.len()
    }

    /// True iff the last record is terminal.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// The record at `index`, or `None` when `index` is the frontier of an
    /// incomplete table. Reading past the frontier is a protocol violation.
    pub fn at(&self, index: usize) -> EntailResult<Option<Message>> {
        if index < self.answers.len() {
            return Ok(Some(self.answers[index].clone()));
        }
        if index == self.answers.len() && !self.complete {
            return Ok(None);
        }
        Err(ProtocolError::ReadPastFrontier {
            node: self.node,
            index,
            size: self.answers.len(),
        }
        .into())
    }

    /// Register `subscriber` as waiting for the record at `index`.
    ///
    /// Idempotent per port; `index` must be the frontier of an incomplete
    /// table.
    pub fn subscribe(&mut self, subscriber: PortRef, index: usize) -> EntailResult<()> {
        if index != self.answers.len() || self.complete {
            return Err(ProtocolError::SubscribeOffFrontier {
                node: self.node,
                index,
                size: self.answers.len(),
            }
            .into());
        }
        self.subscribers.insert(subscriber);
        Ok(())
    }

    /// Return and clear the subscriber set, immediately before appending the
    /// record at `index`.
    pub fn drain_subscribers(&mut self, index: usize) -> EntailResult<Vec<PortRef>> {
        if index != self.answers.len() || self.complete {
            return Err(ProtocolError::SubscribeOffFrontier {
                node: self.node,
                index,
                size: self.answers.len(),
            }
            .into());
        }
        Ok(self.subscribers.drain().collect())
    }

    /// Append an ordinary answer; returns the stored record.
    pub fn record_answer(&mut self, answer: ConceptMap) -> EntailResult<Message> {
        self.append(|index| Message::Answer { index, answer })
    }

    /// Append a conclusion answer; returns the stored record.
    pub fn record_conclusion(&mut self, answer: ConceptMap) -> EntailResult<Message> {
        self.append(|index| Message::Conclusion { index, answer })
    }

    /// Append the `Done` terminal record.
    pub fn record_done(&mut self) -> EntailResult<Message> {
        let msg = self.append(|index| Message::Done { index })?;
        self.complete = true;
        Ok(msg)
    }

    /// Append the `TerminateScc` terminal record.
    pub fn record_terminate_scc(&mut self, expected: Inversion) -> EntailResult<Message> {
        let msg = self.append(|index| Message::TerminateScc { index, expected })?;
        self.complete = true;
        Ok(msg)
    }

    fn append(&mut self, make: impl FnOnce(usize) -> Message) -> EntailResult<Message> {
        if self.complete {
            return Err(ProtocolError::AppendAfterComplete { node: self.node }.into());
        }
        let msg = make(self.answers.len());
        self.answers.push(msg.clone());
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::message::PortId;

    fn table() -> AnswerTable {
        AnswerTable::new(NodeId(0))
    }

    fn port(node: u64, port: u64) -> PortRef {
        PortRef {
            node: NodeId(node),
            port: PortId(port),
        }
    }

    #[test]
    fn records_are_dense_and_immutable() {
        let mut t = table();
        let a = t.record_answer(ConceptMap::new().with("x", 1)).unwrap();
        let b = t.record_answer(ConceptMap::new().with("x", 2)).unwrap();
        assert_eq!(a.index(), Some(0));
        assert_eq!(b.index(), Some(1));
        assert_eq!(t.at(0).unwrap(), Some(a));
        assert_eq!(t.at(1).unwrap(), Some(b));
        assert_eq!(t.at(2).unwrap(), None);
    }

    #[test]
    fn done_is_terminal_and_last() {
        let mut t = table();
        t.record_answer(ConceptMap::new()).unwrap();
        let done = t.record_done().unwrap();
        assert_eq!(done.index(), Some(1));
        assert!(t.is_complete());
        assert_eq!(t.size(), 2);
        assert!(t.record_answer(ConceptMap::new()).is_err());
        assert!(t.record_done().is_err());
    }

    #[test]
    fn read_past_frontier_is_protocol_error() {
        let t = table();
        assert!(t.at(1).is_err());
    }

    #[test]
    fn read_at_frontier_of_complete_table_is_protocol_error() {
        let mut t = table();
        t.record_done().unwrap();
        assert!(t.at(1).is_err());
        // The terminal record itself stays readable.
        assert!(matches!(t.at(0).unwrap(), Some(Message::Done { index: 0 })));
    }

    #[test]
    fn subscribers_drain_atomically() {
        let mut t = table();
        t.subscribe(port(1, 0), 0).unwrap();
        t.subscribe(port(1, 0), 0).unwrap();
        t.subscribe(port(2, 3), 0).unwrap();
        let drained = t.drain_subscribers(0).unwrap();
        assert_eq!(drained.len(), 2);
        assert!(t.drain_subscribers(0).unwrap().is_empty());
    }

    #[test]
    fn subscribe_off_frontier_rejected() {
        let mut t = table();
        t.record_answer(ConceptMap::new()).unwrap();
        assert!(t.subscribe(port(1, 0), 0).is_err());
        assert!(t.subscribe(port(1, 0), 2).is_err());
        t.record_done().unwrap();
        assert!(t.subscribe(port(1, 0), 2).is_err());
    }

    #[test]
    fn terminate_scc_is_terminal() {
        let mut t = table();
        let inv = Inversion {
            node_id: NodeId(0),
            through_all_paths: true,
            index: Some(0),
        };
        let msg = t.record_terminate_scc(inv).unwrap();
        assert!(msg.is_terminal());
        assert!(t.is_complete());
        assert!(t.record_answer(ConceptMap::new()).is_err());
    }
}
