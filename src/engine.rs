//! Query engine facade.
//!
//! Owns the fact store, the validated rule set, and the executor pool, and
//! builds one node registry per query.

use std::sync::Arc;

use tracing::debug;

use crate::error::EntailResult;
use crate::executor::ExecutorPool;
use crate::logic::{LogicManager, Rule};
use crate::pattern::Conjunction;
use crate::reasoner::producer::AnswerStream;
use crate::reasoner::registry::NodeRegistry;
use crate::storage::FactStore;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of executor threads actors are scheduled across.
    pub executor_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executor_threads: 4,
        }
    }
}

/// The entail query engine.
///
/// Queries return an [`AnswerStream`]; the engine must outlive its streams,
/// since dropping it stops the executor pool.
pub struct EntailEngine {
    store: Arc<dyn FactStore>,
    logic: Arc<LogicManager>,
    pool: Arc<ExecutorPool>,
}

impl EntailEngine {
    /// Create an engine over `store` with the given rule set.
    pub fn new(store: Arc<dyn FactStore>, rules: Vec<Rule>) -> EntailResult<Self> {
        Self::with_config(store, rules, EngineConfig::default())
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(
        store: Arc<dyn FactStore>,
        rules: Vec<Rule>,
        config: EngineConfig,
    ) -> EntailResult<Self> {
        let logic = Arc::new(LogicManager::new(rules)?);
        let pool = Arc::new(ExecutorPool::start(config.executor_threads));
        Ok(Self { store, logic, pool })
    }

    /// The engine's rule set and plan interner.
    #[must_use]
    pub fn logic(&self) -> &Arc<LogicManager> {
        &self.logic
    }

    /// Evaluate `conjunction` and stream its answers.
    ///
    /// Every distinct answer reachable through facts and rules is produced
    /// exactly as the graph yields it; the stream ends once the graph has
    /// proven no further answers exist.
    pub fn query(&self, conjunction: &Conjunction) -> EntailResult<AnswerStream> {
        let resolvables = self.logic.compile(conjunction);
        let plan = self.logic.plan(resolvables)?;
        debug!(%conjunction, plan = %plan.id(), "query compiled");
        let registry = NodeRegistry::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.logic),
            Arc::clone(&self.store),
        );
        Ok(AnswerStream::open(registry, plan))
    }
}

impl Drop for EntailEngine {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}
