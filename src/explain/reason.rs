//! Causal explanations produced by the trace explainer.

use std::collections::BTreeSet;
use std::fmt;

use crate::occurrence::Condition;
use crate::program::SourcePosition;
use crate::term::Term;

/// A condition inspection that supports an explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionEvidence {
    /// Index of the inspection in the log.
    pub trace_index: usize,
    /// The condition that was evaluated.
    pub condition: Condition,
}

/// One complete causal chain behind an action occurrence: the rule guard
/// held, the action's precondition held, the action was called and executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReason {
    /// The executed action instance.
    pub action: Term,
    /// Index of the call in the log.
    pub trace_index: usize,
    /// The action precondition evaluation preceding the call.
    pub precondition_evidence: InspectionEvidence,
    /// The rule guard evaluation that selected the action.
    pub rule_condition_evidence: InspectionEvidence,
}

/// Why an action did or did not happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// The action happened; here is how.
    Action(ActionReason),
    /// No rule that can call the action was ever evaluated.
    NoActionNeverEvaluated {
        /// The queried action.
        action: Term,
        /// Every rule whose action part calls the action's signature.
        related_rule_positions: BTreeSet<SourcePosition>,
    },
    /// A related rule was evaluated but the action never followed.
    NoActionNeverSatisfied {
        /// The queried action.
        action: Term,
        /// True if the rule selected the action but its precondition failed.
        rule_was_satisfied: bool,
    },
    /// The action's signature was attempted, only with other arguments.
    NoActionNeverApplied {
        /// The queried action.
        action: Term,
        /// The instances that were attempted instead.
        other_instances: BTreeSet<Term>,
    },
}

impl Reason {
    /// The action this reason is about.
    #[must_use]
    pub fn action(&self) -> &Term {
        match self {
            Self::Action(reason) => &reason.action,
            Self::NoActionNeverEvaluated { action, .. }
            | Self::NoActionNeverSatisfied { action, .. }
            | Self::NoActionNeverApplied { action, .. } => action,
        }
    }

    /// Returns true for explanations of an action that did happen.
    #[must_use]
    pub const fn is_occurrence(&self) -> bool {
        matches!(self, Self::Action(_))
    }
}

impl From<ActionReason> for Reason {
    fn from(reason: ActionReason) -> Self {
        Self::Action(reason)
    }
}

fn join<T: fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ActionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} was called at step {} because rule condition '{}' held (step {}) and precondition '{}' held (step {})",
            self.action,
            self.trace_index,
            self.rule_condition_evidence.condition,
            self.rule_condition_evidence.trace_index,
            self.precondition_evidence.condition,
            self.precondition_evidence.trace_index,
        )
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(reason) => write!(f, "{reason}"),
            Self::NoActionNeverEvaluated {
                action,
                related_rule_positions,
            } => {
                if related_rule_positions.is_empty() {
                    write!(f, "{action} was never performed: no rule calls it")
                } else {
                    write!(
                        f,
                        "{action} was never performed: the rules that call it ({}) were never evaluated",
                        join(related_rule_positions)
                    )
                }
            }
            Self::NoActionNeverSatisfied {
                action,
                rule_was_satisfied: true,
            } => write!(f, "{action} was never performed: it was selected but its precondition never held"),
            Self::NoActionNeverSatisfied {
                action,
                rule_was_satisfied: false,
            } => write!(
                f,
                "{action} was never performed: a rule that calls it was evaluated but its condition never held"
            ),
            Self::NoActionNeverApplied {
                action,
                other_instances,
            } => write!(
                f,
                "{action} was never performed with these arguments; attempted instead: {}",
                join(other_instances)
            ),
        }
    }
}
