//! Error types for entail.
//!
//! All errors are strongly typed using thiserror. The taxonomy follows the
//! failure model of the reasoner: protocol violations are programming errors
//! and fatal to the whole request, execution errors surface scheduling and
//! consumer-side failures, validation errors reject malformed input before
//! any actor is spawned.

use thiserror::Error;

use crate::reasoner::message::NodeId;

/// Violations of the node protocol.
///
/// Any of these aborts the owning [`NodeRegistry`](crate::NodeRegistry):
/// there is no local recovery from a corrupted pull graph.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An answer table was appended after its terminal record.
    #[error("Node {node} appended to a complete answer table")]
    AppendAfterComplete {
        /// Node owning the table.
        node: NodeId,
    },

    /// An answer table read skipped past the frontier.
    #[error("Node {node} read answer {index} past table size {size}")]
    ReadPastFrontier {
        /// Node owning the table.
        node: NodeId,
        /// Requested index.
        index: usize,
        /// Table size at the time of the read.
        size: usize,
    },

    /// A subscriber registered at an index other than the table frontier.
    #[error("Node {node} subscribed at {index}, expected frontier {size}")]
    SubscribeOffFrontier {
        /// Node owning the table.
        node: NodeId,
        /// Requested index.
        index: usize,
        /// Table size at the time of the subscription.
        size: usize,
    },

    /// A port received a message inconsistent with its state machine.
    #[error("Port {port} on node {node} received {received} in state {state}")]
    PortStateViolation {
        /// Node owning the port.
        node: NodeId,
        /// Port identifier within the node.
        port: u64,
        /// State the port was in.
        state: &'static str,
        /// Message variant that arrived.
        received: &'static str,
    },

    /// An answer arrived with an index other than the one pulled.
    #[error("Port {port} on node {node} pulled index {requested} but received {received}")]
    IndexMismatch {
        /// Node owning the port.
        node: NodeId,
        /// Port identifier within the node.
        port: u64,
        /// Index of the outstanding pull.
        requested: usize,
        /// Index carried by the message.
        received: usize,
    },

    /// A message variant arrived at a node that never accepts it.
    #[error("Node {node} cannot handle {variant}")]
    UnexpectedMessage {
        /// Receiving node.
        node: NodeId,
        /// Offending message variant.
        variant: &'static str,
    },

    /// A message was routed to a node the registry does not know.
    #[error("No driver registered for node {node}")]
    UnknownNode {
        /// The unroutable node id.
        node: NodeId,
    },

    /// A message addressed a port its owner does not have.
    #[error("Node {node} has no port {port}")]
    UnknownPort {
        /// The addressed node.
        node: NodeId,
        /// The missing port id.
        port: u64,
    },
}

/// Errors raised while executing a query.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The registry was terminated; the cause is recorded once.
    #[error("Reasoning request aborted: {cause}")]
    Terminated {
        /// Rendered cause of the abort.
        cause: String,
    },

    /// The consumer stream lost its producer.
    #[error("Answer stream disconnected")]
    Disconnected,

    /// A blocking receive timed out.
    #[error("Timed out after {duration_ms}ms waiting for an answer")]
    Timeout {
        /// Configured timeout in milliseconds.
        duration_ms: u64,
    },
}

/// Validation errors raised before a query or rule set is accepted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A conjunction with no atoms.
    #[error("Conjunction must contain at least one atom")]
    EmptyConjunction,

    /// An atom with an empty predicate.
    #[error("Atom predicate cannot be empty")]
    EmptyPredicate,

    /// A rule with an empty label.
    #[error("Rule label cannot be empty")]
    EmptyRuleLabel,

    /// Two rules sharing a label.
    #[error("Duplicate rule label '{label}'")]
    DuplicateRuleLabel {
        /// The repeated label.
        label: String,
    },

    /// A conclusion variable the condition never binds.
    #[error("Rule '{rule}' concludes unbound variable '{variable}'")]
    UnboundConclusionVariable {
        /// Offending rule label.
        rule: String,
        /// The unbound variable.
        variable: String,
    },
}

/// Top-level error type for entail.
#[derive(Debug, Error)]
pub enum EntailError {
    /// Node-protocol violation (fatal for the request).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Execution failure.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Input validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Storage backend failure.
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    /// Internal invariant violation that fits no other category.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EntailError {
    /// Construct an internal error from any displayable context.
    pub fn internal(context: impl Into<String>) -> Self {
        Self::Internal(context.into())
    }
}

/// Result alias used throughout the crate.
pub type EntailResult<T> = Result<T, EntailError>;
