//! The reasoner core: actor nodes, the pull protocol, and SCC termination.
//!
//! A query becomes a directed graph of single-threaded actor nodes wired by
//! typed ports. A consumer pulls the i-th answer at the root; requests flow
//! up-graph, answers and termination notices flow back down. Cycles between
//! nodes are expected (recursive rules) and resolved by the inversion-status
//! protocol in [`actor`].

pub mod actor;
pub mod answer_table;
pub mod message;
pub mod producer;
pub mod registry;

pub(crate) mod materialiser;
pub(crate) mod nodes;
