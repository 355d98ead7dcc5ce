//! Live agent state as seen by the history subsystem.
//!
//! Replaying an occurrence mutates the paused agent through [`AgentState`].
//! [`MentalState`] is an in-memory implementation with a deterministic
//! snapshot, used for replay verification and by embedders that do not have
//! their own mental-state store.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::term::{Signature, Term};

/// Which mental base a modification targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseKind {
    /// Belief base.
    Belief,
    /// Goal base.
    Goal,
    /// Percept base.
    Percept,
    /// Message box.
    Message,
}

impl fmt::Display for BaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Belief => write!(f, "belief"),
            Self::Goal => write!(f, "goal"),
            Self::Percept => write!(f, "percept"),
            Self::Message => write!(f, "message"),
        }
    }
}

/// The resolved target of a base modification, snapshotted when the
/// modification is recorded so replay never re-resolves it against the
/// current module stack.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Focus {
    /// The agent's own top-level bases.
    Agent,
    /// The bases attached to a module's attention set.
    Module {
        /// Module the focus was resolved to.
        module: Signature,
    },
    /// Bases modelling another agent (e.g. its beliefs about `agent`).
    Other {
        /// The other agent's name.
        agent: String,
    },
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent => write!(f, "self"),
            Self::Module { module } => write!(f, "module {module}"),
            Self::Other { agent } => write!(f, "agent {agent}"),
        }
    }
}

/// Mutable agent state that occurrences are applied to and undone against.
pub trait AgentState {
    /// Pushes a module onto the module stack.
    fn push_module(&mut self, module: &Signature) -> Result<(), StateError>;

    /// Pops `module` from the top of the module stack.
    fn pop_module(&mut self, module: &Signature) -> Result<(), StateError>;

    /// Removes `remove` from and then adds `add` to the `base` at `focus`.
    fn modify_base(
        &mut self,
        base: BaseKind,
        focus: &Focus,
        add: &[Term],
        remove: &[Term],
    ) -> Result<(), StateError>;

    /// A deterministic rendering of every externally observable field,
    /// used for equivalence checks.
    fn snapshot(&self) -> String;
}

/// In-memory mental state: a module stack plus one formula set per
/// `(focus, base)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentalState {
    modules: Vec<Signature>,
    bases: BTreeMap<(Focus, BaseKind), BTreeSet<Term>>,
}

impl MentalState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The module stack, bottom first.
    #[must_use]
    pub fn modules(&self) -> &[Signature] {
        &self.modules
    }

    /// The formulas of one base, if it is non-empty.
    #[must_use]
    pub fn base(&self, kind: BaseKind, focus: &Focus) -> Option<&BTreeSet<Term>> {
        self.bases.get(&(focus.clone(), kind))
    }

    /// Returns true if `formula` is in the given base.
    #[must_use]
    pub fn contains(&self, kind: BaseKind, focus: &Focus, formula: &Term) -> bool {
        self.base(kind, focus).is_some_and(|set| set.contains(formula))
    }
}

impl AgentState for MentalState {
    fn push_module(&mut self, module: &Signature) -> Result<(), StateError> {
        self.modules.push(module.clone());
        Ok(())
    }

    fn pop_module(&mut self, module: &Signature) -> Result<(), StateError> {
        match self.modules.last() {
            None => Err(StateError::ModuleStackEmpty),
            Some(top) if top != module => Err(StateError::ModuleMismatch {
                expected: module.to_string(),
                found: top.to_string(),
            }),
            Some(_) => {
                self.modules.pop();
                Ok(())
            }
        }
    }

    fn modify_base(
        &mut self,
        base: BaseKind,
        focus: &Focus,
        add: &[Term],
        remove: &[Term],
    ) -> Result<(), StateError> {
        let key = (focus.clone(), base);
        let set = self.bases.entry(key.clone()).or_default();
        for formula in remove {
            set.remove(formula);
        }
        for formula in add {
            set.insert(formula.clone());
        }
        // Empty bases are dropped so structural equality ignores them.
        if set.is_empty() {
            self.bases.remove(&key);
        }
        Ok(())
    }

    fn snapshot(&self) -> String {
        let mut out = String::from("modules:");
        for module in &self.modules {
            let _ = write!(out, " {module}");
        }
        for ((focus, kind), formulas) in &self.bases {
            let _ = write!(out, "\n{kind}@{focus}:");
            for formula in formulas {
                let _ = write!(out, " {formula}");
            }
        }
        out
    }
}
