//! End-to-end reasoning scenarios: acyclic pulls, recursive SCCs, and
//! consumer demand control.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use entail::{
    Atom, Concept, ConceptMap, Conjunction, EntailEngine, EntityId, Fact, FactStore,
    InMemoryFactStore, Rule, Term, Variable,
};

const PULL_TIMEOUT: Duration = Duration::from_secs(10);

/// Honour `RUST_LOG` when debugging a scenario; a no-op otherwise.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn atom(s: &str, p: &str, o: &str) -> Atom {
    Atom::new(Term::var(s), p, Term::var(o)).unwrap()
}

fn conj(atoms: Vec<Atom>) -> Conjunction {
    Conjunction::new(atoms).unwrap()
}

fn reach_rules() -> Vec<Rule> {
    let base = Rule::new(
        "reach-base",
        conj(vec![atom("x", "edge", "y")]),
        atom("x", "reach", "y"),
    )
    .unwrap();
    let step = Rule::new(
        "reach-step",
        conj(vec![atom("x", "reach", "y"), atom("y", "edge", "z")]),
        atom("x", "reach", "z"),
    )
    .unwrap();
    vec![base, step]
}

fn entity_pair(answer: &ConceptMap, x: &str, y: &str) -> (EntityId, EntityId) {
    let sx = answer
        .get(&Variable::named(x))
        .and_then(Concept::as_entity)
        .unwrap();
    let sy = answer
        .get(&Variable::named(y))
        .and_then(Concept::as_entity)
        .unwrap();
    (sx, sy)
}

/// Drain a stream to completion with a per-answer timeout.
fn drain(stream: &mut entail::AnswerStream, limit: usize) -> Vec<ConceptMap> {
    let mut answers = Vec::new();
    loop {
        match stream.next_answer_timeout(PULL_TIMEOUT).unwrap() {
            Some(answer) => answers.push(answer),
            None => return answers,
        }
        assert!(
            answers.len() <= limit,
            "stream produced more than {limit} answers"
        );
    }
}

#[test]
fn linear_chain_serves_answers_then_done() {
    let store = Arc::new(InMemoryFactStore::new());
    let (a, b, c) = (EntityId::new(), EntityId::new(), EntityId::new());
    store.insert(Fact::new(a, "edge", b)).unwrap();
    store.insert(Fact::new(b, "edge", c)).unwrap();

    let engine = EntailEngine::new(store, Vec::new()).unwrap();
    let mut stream = engine.query(&conj(vec![atom("x", "edge", "y")])).unwrap();

    let answers = drain(&mut stream, 2);
    assert_eq!(answers.len(), 2);
    assert_eq!(entity_pair(&answers[0], "x", "y"), (a, b));
    assert_eq!(entity_pair(&answers[1], "x", "y"), (b, c));

    // The stream stays complete.
    assert!(stream.next_answer().unwrap().is_none());
}

#[test]
fn acyclic_join_terminates() {
    let store = Arc::new(InMemoryFactStore::new());
    let (a, b, c, d) = (EntityId::new(), EntityId::new(), EntityId::new(), EntityId::new());
    store.insert(Fact::new(a, "edge", b)).unwrap();
    store.insert(Fact::new(b, "edge", c)).unwrap();
    store.insert(Fact::new(c, "edge", d)).unwrap();

    let engine = EntailEngine::new(store, Vec::new()).unwrap();
    let mut stream = engine
        .query(&conj(vec![atom("x", "edge", "y"), atom("y", "edge", "z")]))
        .unwrap();

    let answers = drain(&mut stream, 2);
    let found: HashSet<_> = answers
        .iter()
        .map(|ans| {
            let (x, y) = entity_pair(ans, "x", "y");
            let (_, z) = entity_pair(ans, "y", "z");
            (x, y, z)
        })
        .collect();
    assert_eq!(found, HashSet::from([(a, b, c), (b, c, d)]));
}

#[test]
fn self_recursive_rule_with_no_facts_terminates_empty() {
    init_tracing();
    let store = Arc::new(InMemoryFactStore::new());
    let self_rule = Rule::new(
        "p-from-p",
        conj(vec![atom("x", "p", "y")]),
        atom("x", "p", "y"),
    )
    .unwrap();

    let engine = EntailEngine::new(store, vec![self_rule]).unwrap();
    let mut stream = engine.query(&conj(vec![atom("x", "p", "y")])).unwrap();

    // The cycle has nothing to produce: the probe must circle back and
    // terminate the component instead of hanging the pull.
    assert!(stream.next_answer_timeout(PULL_TIMEOUT).unwrap().is_none());
}

#[test]
fn mutual_recursion_seeded_by_one_fact() {
    let store = Arc::new(InMemoryFactStore::new());
    let (a, b) = (EntityId::new(), EntityId::new());
    store.insert(Fact::new(a, "p", b)).unwrap();

    let p_from_q = Rule::new(
        "p-from-q",
        conj(vec![atom("x", "q", "y")]),
        atom("x", "p", "y"),
    )
    .unwrap();
    let q_from_p = Rule::new(
        "q-from-p",
        conj(vec![atom("x", "p", "y")]),
        atom("x", "q", "y"),
    )
    .unwrap();

    let engine = EntailEngine::new(store, vec![p_from_q, q_from_p]).unwrap();
    let mut stream = engine.query(&conj(vec![atom("x", "p", "y")])).unwrap();

    let answers = drain(&mut stream, 1);
    assert_eq!(answers.len(), 1);
    assert_eq!(entity_pair(&answers[0], "x", "y"), (a, b));
}

#[test]
fn diamond_join_yields_single_answer() {
    let store = Arc::new(InMemoryFactStore::new());
    let (a, b) = (EntityId::new(), EntityId::new());
    store.insert(Fact::new(a, "d", b)).unwrap();

    let p_from_d = Rule::new(
        "p-from-d",
        conj(vec![atom("x", "d", "y")]),
        atom("x", "p", "y"),
    )
    .unwrap();
    let q_from_d = Rule::new(
        "q-from-d",
        conj(vec![atom("x", "d", "y")]),
        atom("x", "q", "y"),
    )
    .unwrap();

    let engine = EntailEngine::new(store, vec![p_from_d, q_from_d]).unwrap();
    // Both conjuncts derive from the same leaf; the join must see the
    // answer exactly once and then complete.
    let mut stream = engine
        .query(&conj(vec![atom("x", "p", "y"), atom("x", "q", "y")]))
        .unwrap();

    let answers = drain(&mut stream, 1);
    assert_eq!(answers.len(), 1);
    assert_eq!(entity_pair(&answers[0], "x", "y"), (a, b));
}

#[test]
fn cycle_with_external_feed_produces_all_answers() {
    let store = Arc::new(InMemoryFactStore::new());
    let mut expected = HashSet::new();
    for _ in 0..100 {
        let (a, b) = (EntityId::new(), EntityId::new());
        store.insert(Fact::new(a, "p", b)).unwrap();
        expected.insert((a, b));
    }

    let p_from_q = Rule::new(
        "p-from-q",
        conj(vec![atom("x", "q", "y")]),
        atom("x", "p", "y"),
    )
    .unwrap();
    let q_from_p = Rule::new(
        "q-from-p",
        conj(vec![atom("x", "p", "y")]),
        atom("x", "q", "y"),
    )
    .unwrap();

    let engine = EntailEngine::new(store, vec![p_from_q, q_from_p]).unwrap();
    let mut stream = engine.query(&conj(vec![atom("x", "p", "y")])).unwrap();

    let answers = drain(&mut stream, 100);
    let found: HashSet<_> = answers.iter().map(|ans| entity_pair(ans, "x", "y")).collect();
    assert_eq!(found.len(), answers.len(), "duplicate answers reached the consumer");
    assert_eq!(found, expected);
}

#[test]
fn transitive_closure_saturates() {
    init_tracing();
    let store = Arc::new(InMemoryFactStore::new());
    let ids: Vec<EntityId> = (0..4).map(|_| EntityId::new()).collect();
    for window in ids.windows(2) {
        store.insert(Fact::new(window[0], "edge", window[1])).unwrap();
    }

    let engine = EntailEngine::new(store, reach_rules()).unwrap();
    let mut stream = engine.query(&conj(vec![atom("x", "reach", "y")])).unwrap();

    let answers = drain(&mut stream, 6);
    let found: HashSet<_> = answers.iter().map(|ans| entity_pair(ans, "x", "y")).collect();

    let mut expected = HashSet::new();
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            expected.insert((ids[i], ids[j]));
        }
    }
    // Every derivable pair arrives before the terminal: no spurious
    // termination, and saturation is reached.
    assert_eq!(found, expected);
}

#[test]
fn bounded_query_restricts_answers() {
    let store = Arc::new(InMemoryFactStore::new());
    let ids: Vec<EntityId> = (0..4).map(|_| EntityId::new()).collect();
    for window in ids.windows(2) {
        store.insert(Fact::new(window[0], "edge", window[1])).unwrap();
    }

    let engine = EntailEngine::new(store, reach_rules()).unwrap();
    let bound = Atom::new(
        Term::Concept(Concept::Entity(ids[1])),
        "reach",
        Term::var("y"),
    )
    .unwrap();
    let mut stream = engine.query(&conj(vec![bound])).unwrap();

    let answers = drain(&mut stream, 2);
    let found: HashSet<_> = answers
        .iter()
        .map(|ans| {
            ans.get(&Variable::named("y"))
                .and_then(Concept::as_entity)
                .unwrap()
        })
        .collect();
    assert_eq!(found, HashSet::from([ids[2], ids[3]]));
}

#[test]
fn demand_of_one_then_resume_without_replay() {
    let store = Arc::new(InMemoryFactStore::new());
    let mut inserted = Vec::new();
    for _ in 0..5 {
        let (a, b) = (EntityId::new(), EntityId::new());
        store.insert(Fact::new(a, "edge", b)).unwrap();
        inserted.push((a, b));
    }

    let engine = EntailEngine::new(store, Vec::new()).unwrap();
    let mut stream = engine.query(&conj(vec![atom("x", "edge", "y")])).unwrap();

    // One unit of demand: exactly one answer comes back.
    let first = stream.next_answer_timeout(PULL_TIMEOUT).unwrap().unwrap();
    assert_eq!(entity_pair(&first, "x", "y"), inserted[0]);

    // Resuming picks up where the demand left off; nothing is replayed.
    let rest = drain(&mut stream, 4);
    let sequence: Vec<_> = std::iter::once(&first)
        .chain(rest.iter())
        .map(|ans| entity_pair(ans, "x", "y"))
        .collect();
    assert_eq!(sequence, inserted);
}

#[test]
fn request_batches_demand_up_front() {
    let store = Arc::new(InMemoryFactStore::new());
    for _ in 0..3 {
        store
            .insert(Fact::new(EntityId::new(), "edge", EntityId::new()))
            .unwrap();
    }

    let engine = EntailEngine::new(store, Vec::new()).unwrap();
    let mut stream = engine.query(&conj(vec![atom("x", "edge", "y")])).unwrap();

    stream.request(3).unwrap();
    let answers = drain(&mut stream, 3);
    assert_eq!(answers.len(), 3);
}

struct FailingStore;

impl FactStore for FailingStore {
    fn insert(&self, _fact: Fact) -> Result<(), entail::StorageError> {
        Ok(())
    }

    fn scan(
        &self,
        _atom: &Atom,
        _bounds: &ConceptMap,
    ) -> Result<entail::storage::TraversalIter, entail::StorageError> {
        Err(entail::StorageError::Backend("scan exploded".to_string()))
    }

    fn len(&self) -> Result<usize, entail::StorageError> {
        Ok(0)
    }
}

#[test]
fn storage_failure_aborts_the_request() {
    let engine = EntailEngine::new(Arc::new(FailingStore), Vec::new()).unwrap();
    let mut stream = engine.query(&conj(vec![atom("x", "edge", "y")])).unwrap();

    let err = stream
        .next_answer_timeout(PULL_TIMEOUT)
        .expect_err("the stream must surface the storage failure");
    assert!(err.to_string().contains("scan exploded"), "unexpected error: {err}");

    // The stream is dead afterwards.
    assert!(stream.next_answer().unwrap().is_none());
}
