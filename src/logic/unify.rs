//! Unification between a concludable atom and a rule conclusion.
//!
//! A [`Unifier`] is the positional correspondence between the variables of a
//! query atom and the terms of a rule's concluded atom. It is computed once
//! per (atom, rule) pair and then used in both directions: translating the
//! atom's bounds into conclusion-space bounds when a node graph is built,
//! and translating materialised conclusion bindings back into atom-space
//! answers as they flow down.

use crate::concept::{Concept, ConceptMap, Variable};
use crate::logic::{Rule, RuleId};
use crate::pattern::{Atom, Term};

/// Where an atom variable's value comes from in conclusion space.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    /// The conclusion binds this variable.
    ConclusionVar(Variable),
    /// The rule concludes a constant at this position.
    Constant(Concept),
}

/// Correspondence between one atom and one rule conclusion.
#[derive(Debug, Clone)]
pub struct Unifier {
    rule: RuleId,
    /// Atom variable → conclusion-space source, one entry per occurrence.
    mappings: Vec<(Variable, Source)>,
    /// Conclusion variable must equal this constant (the atom pinned it).
    requirements: Vec<(Variable, Concept)>,
}

impl Unifier {
    /// Unify `atom` against `rule`'s conclusion.
    ///
    /// Returns `None` when the predicates differ or constants clash; such a
    /// rule can never produce an answer for the atom.
    #[must_use]
    pub fn unify(atom: &Atom, rule: &Rule) -> Option<Self> {
        if atom.predicate != rule.then.predicate {
            return None;
        }
        let mut mappings = Vec::new();
        let mut requirements = Vec::new();
        let positions = [
            (&atom.subject, &rule.then.subject),
            (&atom.object, &rule.then.object),
        ];
        for (atom_term, then_term) in positions {
            match (atom_term, then_term) {
                (Term::Var(av), Term::Var(cv)) => {
                    mappings.push((av.clone(), Source::ConclusionVar(cv.clone())));
                }
                (Term::Var(av), Term::Concept(k)) => {
                    mappings.push((av.clone(), Source::Constant(k.clone())));
                }
                (Term::Concept(k), Term::Var(cv)) => {
                    requirements.push((cv.clone(), k.clone()));
                }
                (Term::Concept(a), Term::Concept(b)) => {
                    if a != b {
                        return None;
                    }
                }
            }
        }
        Some(Self {
            rule: rule.id,
            mappings,
            requirements,
        })
    }

    /// The rule this unifier targets.
    #[must_use]
    pub const fn rule(&self) -> RuleId {
        self.rule
    }

    /// Translate atom-space bounds into conclusion-space bounds.
    ///
    /// Returns `None` when the bounds contradict the rule's constants, in
    /// which case the rule is inapplicable under these bounds.
    #[must_use]
    pub fn bounds_to_conclusion(&self, bounds: &ConceptMap) -> Option<ConceptMap> {
        let mut conclusion = ConceptMap::new();
        for (cv, k) in &self.requirements {
            if matches!(conclusion.get(cv), Some(existing) if existing != k) {
                return None;
            }
            conclusion.bind(cv.clone(), k.clone());
        }
        for (av, source) in &self.mappings {
            let Some(bound) = bounds.get(av) else { continue };
            match source {
                Source::ConclusionVar(cv) => {
                    if matches!(conclusion.get(cv), Some(existing) if existing != bound) {
                        return None;
                    }
                    conclusion.bind(cv.clone(), bound.clone());
                }
                Source::Constant(k) => {
                    if bound != k {
                        return None;
                    }
                }
            }
        }
        Some(conclusion)
    }

    /// Translate a materialised conclusion binding into an atom-space answer.
    ///
    /// `bounds` is carried through unchanged. Returns `None` when the
    /// binding violates a requirement or clashes with the bounds.
    #[must_use]
    pub fn conclusion_to_answer(
        &self,
        binding: &ConceptMap,
        bounds: &ConceptMap,
    ) -> Option<ConceptMap> {
        for (cv, k) in &self.requirements {
            if binding.get(cv)? != k {
                return None;
            }
        }
        let mut answer = bounds.clone();
        for (av, source) in &self.mappings {
            let concept = match source {
                Source::ConclusionVar(cv) => binding.get(cv)?.clone(),
                Source::Constant(k) => k.clone(),
            };
            if matches!(answer.get(av), Some(existing) if existing != &concept) {
                return None;
            }
            answer.bind(av.clone(), concept);
        }
        Some(answer)
    }
}
