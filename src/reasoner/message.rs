//! Messages exchanged on ports.
//!
//! Everything a node says to another node is one of these tagged records.
//! Answers and conclusions are also what answer tables store, so the same
//! record that memoises an answer is the record sent to later readers.

use std::cmp::Ordering;
use std::fmt;

use crate::concept::ConceptMap;

/// Identifier of a node, assigned by the registry at construction.
///
/// Ordering defines priority in the termination protocol: lower id means
/// older, and older wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// Numeric value, for diagnostics.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier of a port within its owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(pub(crate) u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Address of a port: the owning node plus the port within it.
///
/// Nodes refer to each other exclusively through these indexed references;
/// the registry resolves them to drivers, so the node graph carries no
/// owning pointers and cycles cannot leak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRef {
    /// Node owning the port.
    pub node: NodeId,
    /// Port within the owner.
    pub port: PortId,
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.port)
    }
}

/// A candidate saturation witness propagating through the graph.
///
/// `index: None` is the early probe sent before the originator has settled:
/// it announces the inversion but must never be accepted as a saturation
/// witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inversion {
    /// Originating node.
    pub node_id: NodeId,
    /// True when every active upstream path witnessed this same inversion.
    pub through_all_paths: bool,
    /// Originator table size at emission; `None` for the early probe.
    pub index: Option<usize>,
}

impl Inversion {
    /// Priority order: smaller node id is better; for equal ids a larger
    /// index is better (`None` worst); for equal id and index,
    /// `through_all_paths = true` is better.
    #[must_use]
    pub fn priority(&self, other: &Self) -> Ordering {
        self.node_id
            .cmp(&other.node_id)
            .then_with(|| index_rank(other.index).cmp(&index_rank(self.index)))
            .then_with(|| other.through_all_paths.cmp(&self.through_all_paths))
    }

    /// The better of two optional inversions under [`priority`](Self::priority);
    /// absent entries sort worst.
    #[must_use]
    pub fn better<'a>(a: Option<&'a Self>, b: Option<&'a Self>) -> Option<&'a Self> {
        match (a, b) {
            (Some(x), Some(y)) => {
                if x.priority(y) == Ordering::Greater {
                    Some(y)
                } else {
                    Some(x)
                }
            }
            (Some(x), None) => Some(x),
            (None, y) => y,
        }
    }
}

fn index_rank(index: Option<usize>) -> i128 {
    index.map_or(-1, |i| i128::try_from(i).unwrap_or(i128::MAX))
}

impl fmt::Display for Inversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(
                f,
                "inv({}, all_paths={}, index={i})",
                self.node_id, self.through_all_paths
            ),
            None => write!(
                f,
                "inv({}, all_paths={}, early)",
                self.node_id, self.through_all_paths
            ),
        }
    }
}

/// Tagged message records exchanged on ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// An ordinary answer at `index`.
    Answer {
        /// Table index of the record.
        index: usize,
        /// The variable→concept binding.
        answer: ConceptMap,
    },

    /// A rule-conclusion answer at `index`.
    Conclusion {
        /// Table index of the record.
        index: usize,
        /// Binding over the rule conclusion's variables.
        answer: ConceptMap,
    },

    /// No more answers will be produced; `index` equals the table size at
    /// the moment of completion.
    Done {
        /// Table size at completion.
        index: usize,
    },

    /// A probe propagating the inversion state of its originating node.
    HitInversion(Inversion),

    /// A committed termination decision for the SCC anchored at the
    /// inversion's originator.
    TerminateScc {
        /// Table size at commit.
        index: usize,
        /// The inversion the commit is anchored on.
        expected: Inversion,
    },
}

impl Message {
    /// The message's index, where one applies.
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        match self {
            Self::Answer { index, .. }
            | Self::Conclusion { index, .. }
            | Self::Done { index }
            | Self::TerminateScc { index, .. } => Some(*index),
            Self::HitInversion(inv) => inv.index,
        }
    }

    /// Variant name for diagnostics and protocol errors.
    #[must_use]
    pub const fn variant(&self) -> &'static str {
        match self {
            Self::Answer { .. } => "Answer",
            Self::Conclusion { .. } => "Conclusion",
            Self::Done { .. } => "Done",
            Self::HitInversion(_) => "HitInversion",
            Self::TerminateScc { .. } => "TerminateScc",
        }
    }

    /// True for `Done` and `TerminateScc`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::TerminateScc { .. })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answer { index, answer } => write!(f, "Answer[{index}: {answer}]"),
            Self::Conclusion { index, answer } => write!(f, "Conclusion[{index}: {answer}]"),
            Self::Done { index } => write!(f, "Done[{index}]"),
            Self::HitInversion(inv) => write!(f, "{inv}"),
            Self::TerminateScc { index, expected } => {
                write!(f, "TerminateScc[{index}: {expected}]")
            }
        }
    }
}
