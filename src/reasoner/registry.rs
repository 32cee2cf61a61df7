//! Node registry.
//!
//! Hands out node identifiers, caches one node driver per
//! `(compiled plan, bounds)` key, routes messages by node id, and owns the
//! global-abort path for the request. The registry holds the only strong
//! references to node state; `shutdown` clears its maps, which breaks the
//! node→registry back-reference cycle deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error};

use crate::concept::ConceptMap;
use crate::error::{EntailError, EntailResult, ExecutionError, ProtocolError};
use crate::executor::ExecutorPool;
use crate::logic::{ConjunctionPlan, LogicManager, PlanId, Resolvable, RuleId};
use crate::pattern::Atom;
use crate::reasoner::actor::{ActorNode, NodeDriver, NodeHandle};
use crate::reasoner::materialiser::{MaterialiserHandle, MaterialiserNode};
use crate::reasoner::message::NodeId;
use crate::reasoner::nodes::{ConcludableNode, ConclusionNode, ConjunctionNode, RetrievableNode};
use crate::storage::FactStore;

/// Cache key: which node serves which `(pattern, bounds)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum NodeKey {
    Retrievable { atom: Atom, bounds: ConceptMap },
    Concludable { atom: Atom, bounds: ConceptMap },
    Conjunction { plan: PlanId, bounds: ConceptMap },
    Conclusion { rule: RuleId, bounds: ConceptMap },
}

#[derive(Default)]
struct RegistryInner {
    nodes: HashMap<NodeKey, Arc<dyn NodeDriver>>,
    by_id: HashMap<NodeId, Arc<dyn NodeDriver>>,
    materialiser: Option<MaterialiserHandle>,
}

type FailureHook = Box<dyn Fn(EntailError) + Send + Sync>;

/// Per-request registry of reasoner nodes.
pub struct NodeRegistry {
    pool: Arc<ExecutorPool>,
    logic: Arc<LogicManager>,
    store: Arc<dyn FactStore>,
    next_node_id: AtomicU64,
    poison: Arc<AtomicBool>,
    terminated: Mutex<Option<String>>,
    failure_hook: Mutex<Option<FailureHook>>,
    inner: RwLock<RegistryInner>,
}

impl NodeRegistry {
    /// Create a registry bound to the engine's pool, logic, and store.
    pub fn new(
        pool: Arc<ExecutorPool>,
        logic: Arc<LogicManager>,
        store: Arc<dyn FactStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            logic,
            store,
            next_node_id: AtomicU64::new(0),
            poison: Arc::new(AtomicBool::new(false)),
            terminated: Mutex::new(None),
            failure_hook: Mutex::new(None),
            inner: RwLock::new(RegistryInner::default()),
        })
    }

    /// The rule set and plan interner behind this request.
    #[must_use]
    pub fn logic(&self) -> &Arc<LogicManager> {
        &self.logic
    }

    /// The fact store behind this request.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn FactStore> {
        &self.store
    }

    /// Install the consumer failure hook invoked on terminate.
    pub(crate) fn set_failure_hook(&self, hook: FailureHook) {
        if let Ok(mut guard) = self.failure_hook.lock() {
            *guard = Some(hook);
        }
    }

    fn next_node_id(&self) -> NodeId {
        NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The driver routing messages to `node`.
    pub fn driver(&self, node: NodeId) -> EntailResult<Arc<dyn NodeDriver>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EntailError::internal("registry lock poisoned"))?;
        inner
            .by_id
            .get(&node)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownNode { node }.into())
    }

    fn cached<N, F>(self: &Arc<Self>, key: NodeKey, build: F) -> EntailResult<Arc<dyn NodeDriver>>
    where
        N: ActorNode,
        F: FnOnce(NodeId, Arc<Self>) -> EntailResult<N>,
    {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EntailError::internal("registry lock poisoned"))?;
        if let Some(driver) = inner.nodes.get(&key) {
            return Ok(Arc::clone(driver));
        }
        let node_id = self.next_node_id();
        let state = build(node_id, Arc::clone(self))?;
        let driver = self
            .pool
            .spawn(Arc::clone(&self.poison), move |_| state);
        let handle: Arc<dyn NodeDriver> = Arc::new(NodeHandle { node_id, driver });
        inner.nodes.insert(key, Arc::clone(&handle));
        inner.by_id.insert(node_id, Arc::clone(&handle));
        debug!(node = %node_id, "node registered");
        Ok(handle)
    }

    /// The leaf node for `(atom, bounds)`.
    pub(crate) fn retrievable_node(
        self: &Arc<Self>,
        atom: Atom,
        bounds: ConceptMap,
    ) -> EntailResult<Arc<dyn NodeDriver>> {
        let key = NodeKey::Retrievable {
            atom: atom.clone(),
            bounds: bounds.clone(),
        };
        self.cached(key, |node_id, registry| {
            RetrievableNode::new(node_id, registry, &atom, &bounds)
        })
    }

    /// The recursive node for `(atom, bounds)`.
    pub(crate) fn concludable_node(
        self: &Arc<Self>,
        atom: Atom,
        bounds: ConceptMap,
    ) -> EntailResult<Arc<dyn NodeDriver>> {
        let key = NodeKey::Concludable {
            atom: atom.clone(),
            bounds: bounds.clone(),
        };
        self.cached(key, |node_id, registry| {
            Ok(ConcludableNode::new(node_id, registry, atom, bounds))
        })
    }

    /// The node evaluating `plan` under `bounds`.
    pub(crate) fn conjunction_node(
        self: &Arc<Self>,
        plan: &Arc<ConjunctionPlan>,
        bounds: ConceptMap,
    ) -> EntailResult<Arc<dyn NodeDriver>> {
        let key = NodeKey::Conjunction {
            plan: plan.id(),
            bounds: bounds.clone(),
        };
        let plan = Arc::clone(plan);
        self.cached(key, |node_id, registry| {
            Ok(ConjunctionNode::new(node_id, registry, plan, bounds))
        })
    }

    /// The node producing `rule`'s conclusions under `bounds`.
    pub(crate) fn conclusion_node(
        self: &Arc<Self>,
        rule: RuleId,
        bounds: ConceptMap,
    ) -> EntailResult<Arc<dyn NodeDriver>> {
        let key = NodeKey::Conclusion {
            rule,
            bounds: bounds.clone(),
        };
        self.cached(key, |node_id, registry| {
            ConclusionNode::new(node_id, registry, rule, bounds)
        })
    }

    /// The node for one resolvable, with bounds restricted to its atom.
    pub(crate) fn resolvable_node(
        self: &Arc<Self>,
        resolvable: &Resolvable,
        bounds: &ConceptMap,
    ) -> EntailResult<Arc<dyn NodeDriver>> {
        let atom = resolvable.atom().clone();
        let vars = atom.variables();
        let restricted = bounds.restrict(vars.iter());
        match resolvable {
            Resolvable::Retrievable(_) => self.retrievable_node(atom, restricted),
            Resolvable::Concludable(_) => self.concludable_node(atom, restricted),
        }
    }

    /// Register a root node that is not keyed in the cache.
    ///
    /// Returns the typed driver so the producer can schedule pulls on it.
    pub(crate) fn register_root<N, F>(
        self: &Arc<Self>,
        build: F,
    ) -> EntailResult<(NodeId, crate::executor::Driver<N>)>
    where
        N: ActorNode,
        F: FnOnce(NodeId, Arc<Self>) -> N,
    {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EntailError::internal("registry lock poisoned"))?;
        let node_id = self.next_node_id();
        let state = build(node_id, Arc::clone(self));
        let driver = self
            .pool
            .spawn(Arc::clone(&self.poison), move |_| state);
        let handle: Arc<dyn NodeDriver> = Arc::new(NodeHandle {
            node_id,
            driver: driver.clone(),
        });
        inner.by_id.insert(node_id, handle);
        Ok((node_id, driver))
    }

    /// The materialiser service actor, created on first use.
    pub(crate) fn materialiser(self: &Arc<Self>) -> EntailResult<MaterialiserHandle> {
        {
            let inner = self
                .inner
                .read()
                .map_err(|_| EntailError::internal("registry lock poisoned"))?;
            if let Some(handle) = &inner.materialiser {
                return Ok(handle.clone());
            }
        }
        let mut inner = self
            .inner
            .write()
            .map_err(|_| EntailError::internal("registry lock poisoned"))?;
        if let Some(handle) = &inner.materialiser {
            return Ok(handle.clone());
        }
        let registry = Arc::clone(self);
        let driver = self
            .pool
            .spawn(Arc::clone(&self.poison), move |_| MaterialiserNode::new(registry));
        let handle = MaterialiserHandle::new(driver);
        inner.materialiser = Some(handle.clone());
        Ok(handle)
    }

    /// Abort the whole request.
    ///
    /// Marks the registry exceptional, drops future scheduled closures, and
    /// delivers the failure to the consumer queue. Later calls are ignored.
    pub fn terminate(&self, cause: EntailError) {
        {
            let Ok(mut terminated) = self.terminated.lock() else { return };
            if terminated.is_some() {
                return;
            }
            *terminated = Some(cause.to_string());
        }
        error!(%cause, "reasoning request terminated");
        self.poison.store(true, Ordering::Release);
        let hook = self
            .failure_hook
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(hook) = hook {
            hook(cause);
        }
    }

    /// The rendered cause of a previous terminate, if any.
    #[must_use]
    pub fn terminated_cause(&self) -> Option<String> {
        self.terminated.lock().ok().and_then(|guard| guard.clone())
    }

    /// Poison the request and release every node.
    ///
    /// Safe to call repeatedly; also invoked when the consumer stream is
    /// dropped.
    pub fn shutdown(&self) {
        self.poison.store(true, Ordering::Release);
        if let Ok(mut inner) = self.inner.write() {
            inner.nodes.clear();
            inner.by_id.clear();
            inner.materialiser = None;
        }
    }

    /// Build the terminated error surfaced to late consumers.
    pub(crate) fn terminated_error(&self) -> EntailError {
        ExecutionError::Terminated {
            cause: self
                .terminated_cause()
                .unwrap_or_else(|| "registry shut down".to_string()),
        }
        .into()
    }
}

impl Drop for NodeRegistry {
    fn drop(&mut self) {
        self.poison.store(true, Ordering::Release);
    }
}
