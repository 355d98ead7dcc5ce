//! Static program map: source positions and the language elements at them.
//!
//! Occurrences only carry a [`SourcePosition`]. The map resolves positions
//! back to rules, modules and action specifications, and answers the reverse
//! question the explainer needs: which rules can call an action with a given
//! signature.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::term::{Signature, Term};

/// A pointer into the static program.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Source file (as given to the parser).
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl SourcePosition {
    /// Creates a source position.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A rule: mental-state guard plus the actions it may call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleInfo {
    /// Signatures referenced by the rule's condition.
    pub condition: BTreeSet<Signature>,
    /// Action calls in the rule's action part, unground.
    pub actions: Vec<Term>,
}

/// A syntactic element registered at a source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramElement {
    /// A module definition.
    Module(Signature),
    /// A decision or event rule.
    Rule(RuleInfo),
    /// A user-specified action (with pre- and postconditions).
    ActionSpec(Signature),
}

impl ProgramElement {
    /// Signatures this element concerns.
    #[must_use]
    pub fn signatures(&self) -> BTreeSet<Signature> {
        match self {
            Self::Module(sig) | Self::ActionSpec(sig) => BTreeSet::from([sig.clone()]),
            Self::Rule(rule) => rule
                .condition
                .iter()
                .cloned()
                .chain(rule.actions.iter().filter_map(Term::signature))
                .collect(),
        }
    }
}

/// Index from source positions to program elements and from action
/// signatures to the rules that can call them.
#[derive(Debug, Clone, Default)]
pub struct ProgramMap {
    elements: BTreeMap<SourcePosition, ProgramElement>,
    callers: BTreeMap<Signature, BTreeSet<SourcePosition>>,
}

impl ProgramMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module definition.
    pub fn add_module(&mut self, position: SourcePosition, signature: Signature) {
        self.insert(position, ProgramElement::Module(signature));
    }

    /// Registers a user-specified action.
    pub fn add_action_spec(&mut self, position: SourcePosition, signature: Signature) {
        self.insert(position, ProgramElement::ActionSpec(signature));
    }

    /// Registers a rule and indexes every action it calls.
    pub fn add_rule(
        &mut self,
        position: SourcePosition,
        condition: impl IntoIterator<Item = Signature>,
        actions: Vec<Term>,
    ) {
        for sig in actions.iter().filter_map(Term::signature) {
            self.callers.entry(sig).or_default().insert(position.clone());
        }
        self.insert(
            position,
            ProgramElement::Rule(RuleInfo {
                condition: condition.into_iter().collect(),
                actions,
            }),
        );
    }

    /// Stores `element`, dropping caller entries of a rule it replaces that
    /// the new element does not repeat.
    fn insert(&mut self, position: SourcePosition, element: ProgramElement) {
        let kept: BTreeSet<Signature> = match &element {
            ProgramElement::Rule(rule) => rule.actions.iter().filter_map(Term::signature).collect(),
            ProgramElement::Module(_) | ProgramElement::ActionSpec(_) => BTreeSet::new(),
        };
        let previous = self.elements.insert(position.clone(), element);
        let Some(ProgramElement::Rule(old)) = previous else {
            return;
        };
        for sig in old.actions.iter().filter_map(Term::signature) {
            if kept.contains(&sig) {
                continue;
            }
            if let Some(positions) = self.callers.get_mut(&sig) {
                positions.remove(&position);
                if positions.is_empty() {
                    self.callers.remove(&sig);
                }
            }
        }
    }

    /// The element registered at `position`.
    #[must_use]
    pub fn element_at(&self, position: &SourcePosition) -> Option<&ProgramElement> {
        self.elements.get(position)
    }

    /// Signatures of the element at `position`; empty if nothing is registered.
    #[must_use]
    pub fn signatures_at(&self, position: &SourcePosition) -> BTreeSet<Signature> {
        self.element_at(position)
            .map(ProgramElement::signatures)
            .unwrap_or_default()
    }

    /// Every rule position whose action part calls an action with `signature`.
    #[must_use]
    pub fn rules_calling(&self, signature: &Signature) -> BTreeSet<SourcePosition> {
        self.callers.get(signature).cloned().unwrap_or_default()
    }

    /// Number of registered elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
