//! # entail — a recursive reasoning engine over a knowledge graph
//!
//! entail enumerates all answers for a conjunction of pattern atoms under a
//! set of inference rules. Rules may recursively invoke each other; the
//! engine evaluates the resulting cyclic dependency graph with cooperating
//! single-threaded actors that pull answers lazily, memoise them per node,
//! and detect when a strongly-connected component of mutually-recursive
//! nodes has produced everything it ever will.
//!
//! ## Core concepts
//!
//! - **Fact**: one stored edge `(entity, predicate, concept)`
//! - **Atom / Conjunction**: triple patterns and ordered conjunctions of them
//! - **Rule**: condition conjunction implying a concluded atom
//! - **Answer**: an immutable variable→concept binding ([`ConceptMap`])
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use entail::{
//!     Atom, Conjunction, EntailEngine, EntityId, Fact, FactStore,
//!     InMemoryFactStore, Rule, Term,
//! };
//!
//! # fn main() -> entail::EntailResult<()> {
//! let store = Arc::new(InMemoryFactStore::new());
//! let (a, b) = (EntityId::new(), EntityId::new());
//! store.insert(Fact::new(a, "edge", b))?;
//!
//! let base = Rule::new(
//!     "reach-base",
//!     Conjunction::new(vec![Atom::new(Term::var("x"), "edge", Term::var("y"))?])?,
//!     Atom::new(Term::var("x"), "reach", Term::var("y"))?,
//! )?;
//!
//! let engine = EntailEngine::new(store, vec![base])?;
//! let query = Conjunction::new(vec![Atom::new(Term::var("x"), "reach", Term::var("y"))?])?;
//! for answer in engine.query(&query)? {
//!     println!("{}", answer?);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod concept;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logic;
pub mod pattern;
pub mod reasoner;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use concept::{Concept, ConceptMap, EntityId, Variable};
pub use engine::{EngineConfig, EntailEngine};
pub use error::{EntailError, EntailResult, ExecutionError, ProtocolError, ValidationError};
pub use logic::{LogicManager, Resolvable, Rule, RuleId};
pub use pattern::{Atom, Conjunction, Term};
pub use reasoner::producer::AnswerStream;
pub use storage::{Fact, FactStore, InMemoryFactStore, StorageError};
