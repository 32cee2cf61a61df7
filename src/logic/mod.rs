//! Rules, compilation, and plans.
//!
//! The [`LogicManager`] owns the validated rule set and answers the three
//! questions the reasoner asks of it: how a conjunction compiles into
//! resolvables, which rules can conclude a given atom, and what a condition
//! answer materialises into. It also interns conjunction plans so the node
//! registry can key its cache on a stable plan id.

mod unify;

pub use unify::Unifier;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::concept::ConceptMap;
use crate::error::ValidationError;
use crate::pattern::{Atom, Conjunction, Term};

/// Stable identifier for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(Uuid);

impl RuleId {
    /// Creates a new random rule ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inference rule: when the condition holds, the conclusion holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier.
    pub id: RuleId,
    /// Human-readable label, unique within a rule set.
    pub label: String,
    /// Condition conjunction.
    pub when: Conjunction,
    /// Concluded atom.
    pub then: Atom,
}

impl Rule {
    /// Construct a rule with validation.
    ///
    /// Every variable of the conclusion must be bound by the condition;
    /// the materialiser has no way to invent concepts for free variables.
    pub fn new(
        label: impl Into<String>,
        when: Conjunction,
        then: Atom,
    ) -> Result<Self, ValidationError> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(ValidationError::EmptyRuleLabel);
        }
        let condition_vars = when.variables();
        for var in then.variables() {
            if !condition_vars.contains(&var) {
                return Err(ValidationError::UnboundConclusionVariable {
                    rule: label,
                    variable: var.name().to_string(),
                });
            }
        }
        Ok(Self {
            id: RuleId::new(),
            label,
            when,
            then,
        })
    }
}

/// A compiled sub-pattern: served by traversal alone, or by traversal plus
/// rule conclusions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "atom", rename_all = "snake_case")]
pub enum Resolvable {
    /// Answered directly from storage.
    Retrievable(Atom),
    /// Answered from storage and from applicable rules; may recurse.
    Concludable(Atom),
}

impl Resolvable {
    /// The underlying atom.
    #[must_use]
    pub const fn atom(&self) -> &Atom {
        match self {
            Self::Retrievable(atom) | Self::Concludable(atom) => atom,
        }
    }

    /// True for the recursive kind.
    #[must_use]
    pub const fn is_concludable(&self) -> bool {
        matches!(self, Self::Concludable(_))
    }
}

/// Stable identifier for an interned conjunction plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(u64);

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plan-{}", self.0)
    }
}

/// An interned, ordered list of resolvables.
///
/// Plans are interned by content: equal resolvable lists share one id, which
/// is what lets the node registry cache nodes per `(plan, bounds)`.
#[derive(Debug)]
pub struct ConjunctionPlan {
    id: PlanId,
    resolvables: Vec<Resolvable>,
}

impl ConjunctionPlan {
    /// The plan's interned id.
    #[must_use]
    pub const fn id(&self) -> PlanId {
        self.id
    }

    /// The resolvables in evaluation order.
    #[must_use]
    pub fn resolvables(&self) -> &[Resolvable] {
        &self.resolvables
    }

    /// The head resolvable.
    #[must_use]
    pub fn head(&self) -> &Resolvable {
        &self.resolvables[0]
    }

    /// The plan's tail, if any resolvables remain after the head.
    #[must_use]
    pub fn tail(&self) -> Option<Vec<Resolvable>> {
        if self.resolvables.len() > 1 {
            Some(self.resolvables[1..].to_vec())
        } else {
            None
        }
    }
}

#[derive(Default)]
struct PlanInterner {
    by_content: HashMap<Vec<Resolvable>, Arc<ConjunctionPlan>>,
    next_id: u64,
}

/// Owns the rule set and the plan interner.
pub struct LogicManager {
    rules: Vec<Rule>,
    by_conclusion_predicate: HashMap<String, Vec<usize>>,
    plans: RwLock<PlanInterner>,
}

impl LogicManager {
    /// Build a manager from a validated rule set.
    pub fn new(rules: Vec<Rule>) -> Result<Self, ValidationError> {
        let mut seen_labels = HashMap::new();
        let mut by_conclusion_predicate: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, rule) in rules.iter().enumerate() {
            if seen_labels.insert(rule.label.clone(), idx).is_some() {
                return Err(ValidationError::DuplicateRuleLabel {
                    label: rule.label.clone(),
                });
            }
            by_conclusion_predicate
                .entry(rule.then.predicate.clone())
                .or_default()
                .push(idx);
        }
        Ok(Self {
            rules,
            by_conclusion_predicate,
            plans: RwLock::new(PlanInterner::default()),
        })
    }

    /// Look up a rule by id.
    #[must_use]
    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// The rules whose conclusion can unify with `atom`, with their unifiers.
    #[must_use]
    pub fn applicable_rules(&self, atom: &Atom) -> Vec<(RuleId, Unifier)> {
        self.by_conclusion_predicate
            .get(&atom.predicate)
            .into_iter()
            .flatten()
            .filter_map(|&idx| {
                let rule = &self.rules[idx];
                Unifier::unify(atom, rule).map(|u| (rule.id, u))
            })
            .collect()
    }

    /// Compile a conjunction into resolvables.
    ///
    /// An atom is concludable iff at least one rule can conclude it.
    #[must_use]
    pub fn compile(&self, conjunction: &Conjunction) -> Vec<Resolvable> {
        conjunction
            .atoms()
            .iter()
            .map(|atom| {
                if self.applicable_rules(atom).is_empty() {
                    Resolvable::Retrievable(atom.clone())
                } else {
                    Resolvable::Concludable(atom.clone())
                }
            })
            .collect()
    }

    /// Intern a resolvable list as a plan.
    ///
    /// Equal lists return the same [`ConjunctionPlan`] instance.
    pub fn plan(&self, resolvables: Vec<Resolvable>) -> Result<Arc<ConjunctionPlan>, crate::error::EntailError> {
        let mut interner = self
            .plans
            .write()
            .map_err(|_| crate::error::EntailError::internal("plan interner lock poisoned"))?;
        if let Some(plan) = interner.by_content.get(&resolvables) {
            return Ok(Arc::clone(plan));
        }
        let id = PlanId(interner.next_id);
        interner.next_id += 1;
        let plan = Arc::new(ConjunctionPlan {
            id,
            resolvables: resolvables.clone(),
        });
        interner.by_content.insert(resolvables, Arc::clone(&plan));
        Ok(plan)
    }

    /// Materialise a condition answer into a conclusion binding.
    ///
    /// Returns the binding over the conclusion atom's variables, or `None`
    /// when the condition answer leaves a conclusion variable unbound.
    #[must_use]
    pub fn bind_conclusion(&self, rule: &Rule, condition_answer: &ConceptMap) -> Option<ConceptMap> {
        let mut binding = ConceptMap::new();
        for position in [&rule.then.subject, &rule.then.object] {
            match position {
                Term::Var(var) => {
                    let concept = condition_answer.get(var)?;
                    if let Some(existing) = binding.get(var) {
                        if existing != concept {
                            return None;
                        }
                    }
                    binding.bind(var.clone(), concept.clone());
                }
                Term::Concept(_) => {}
            }
        }
        Some(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{Concept, Variable};
    use crate::pattern::Term;

    fn var_atom(s: &str, p: &str, o: &str) -> Atom {
        Atom::new(Term::var(s), p, Term::var(o)).unwrap()
    }

    fn reach_rules() -> Vec<Rule> {
        let base = Rule::new(
            "reach-base",
            Conjunction::new(vec![var_atom("x", "edge", "y")]).unwrap(),
            var_atom("x", "reach", "y"),
        )
        .unwrap();
        let step = Rule::new(
            "reach-step",
            Conjunction::new(vec![var_atom("x", "reach", "y"), var_atom("y", "edge", "z")])
                .unwrap(),
            var_atom("x", "reach", "z"),
        )
        .unwrap();
        vec![base, step]
    }

    #[test]
    fn unbound_conclusion_variable_rejected() {
        let err = Rule::new(
            "bad",
            Conjunction::new(vec![var_atom("x", "edge", "y")]).unwrap(),
            var_atom("x", "reach", "z"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnboundConclusionVariable { .. }
        ));
    }

    #[test]
    fn duplicate_labels_rejected() {
        let mut rules = reach_rules();
        rules[1].label = "reach-base".to_string();
        assert!(matches!(
            LogicManager::new(rules),
            Err(ValidationError::DuplicateRuleLabel { .. })
        ));
    }

    #[test]
    fn compile_marks_rule_heads_concludable() {
        let logic = LogicManager::new(reach_rules()).unwrap();
        let conjunction =
            Conjunction::new(vec![var_atom("a", "reach", "b"), var_atom("a", "edge", "b")])
                .unwrap();
        let compiled = logic.compile(&conjunction);
        assert!(compiled[0].is_concludable());
        assert!(!compiled[1].is_concludable());
    }

    #[test]
    fn plans_intern_by_content() {
        let logic = LogicManager::new(reach_rules()).unwrap();
        let resolvables = logic.compile(&Conjunction::new(vec![var_atom("a", "edge", "b")]).unwrap());
        let p1 = logic.plan(resolvables.clone()).unwrap();
        let p2 = logic.plan(resolvables).unwrap();
        assert_eq!(p1.id(), p2.id());
    }

    #[test]
    fn bind_conclusion_projects_condition_answer() {
        let logic = LogicManager::new(reach_rules()).unwrap();
        let rule = logic
            .rules
            .iter()
            .find(|r| r.label == "reach-base")
            .unwrap();
        let answer = ConceptMap::new().with("x", 1).with("y", 2);
        let binding = logic.bind_conclusion(rule, &answer).unwrap();
        assert_eq!(binding.get(&Variable::named("x")), Some(&Concept::Int(1)));
        assert_eq!(binding.get(&Variable::named("y")), Some(&Concept::Int(2)));
    }

    #[test]
    fn bind_conclusion_missing_variable_yields_none() {
        let logic = LogicManager::new(reach_rules()).unwrap();
        let rule = logic
            .rules
            .iter()
            .find(|r| r.label == "reach-base")
            .unwrap();
        let partial = ConceptMap::new().with("x", 1);
        assert!(logic.bind_conclusion(rule, &partial).is_none());
    }
}
