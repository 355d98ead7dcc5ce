//! Occurrences: the replayable records of an agent run.
//!
//! The variant set is closed. `apply`, `undo` and `signatures` match
//! exhaustively, so adding a variant is a compile-checked change.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::program::{ProgramMap, SourcePosition};
use crate::state::{AgentState, BaseKind, Focus};
use crate::term::{Signature, Substitution, Term};

/// What a condition inspection evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationKind {
    /// A rule's mental-state guard.
    RuleCondition,
    /// An action's precondition.
    ActionPrecondition,
}

/// Mental-state operator of a condition literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentalOperator {
    /// `bel(..)`
    Bel,
    /// `percept(..)`
    Percept,
    /// `received(..)`
    Received,
    /// `sent(..)`
    Sent,
    /// `goal(..)`
    Goal,
    /// `a-goal(..)`: goal not yet believed achieved.
    AGoal,
    /// `goal-a(..)`: goal already believed achieved.
    GoalA,
}

impl MentalOperator {
    /// The base this operator queries.
    #[must_use]
    pub const fn base_kind(self) -> BaseKind {
        match self {
            Self::Bel => BaseKind::Belief,
            Self::Percept => BaseKind::Percept,
            Self::Received | Self::Sent => BaseKind::Message,
            Self::Goal | Self::AGoal | Self::GoalA => BaseKind::Goal,
        }
    }

    const fn keyword(self) -> &'static str {
        match self {
            Self::Bel => "bel",
            Self::Percept => "percept",
            Self::Received => "received",
            Self::Sent => "sent",
            Self::Goal => "goal",
            Self::AGoal => "a-goal",
            Self::GoalA => "goal-a",
        }
    }
}

/// One (possibly negated) literal of a mental-state condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MentalLiteral {
    /// Operator applied to the formula.
    pub operator: MentalOperator,
    /// False for `not(op(..))`.
    pub positive: bool,
    /// The queried formula.
    pub formula: Term,
}

impl MentalLiteral {
    /// A positive literal.
    #[must_use]
    pub fn new(operator: MentalOperator, formula: Term) -> Self {
        Self {
            operator,
            positive: true,
            formula,
        }
    }

    /// Shorthand for a positive `bel(formula)`.
    #[must_use]
    pub fn bel(formula: Term) -> Self {
        Self::new(MentalOperator::Bel, formula)
    }

    /// Shorthand for a positive `goal(formula)`.
    #[must_use]
    pub fn goal(formula: Term) -> Self {
        Self::new(MentalOperator::Goal, formula)
    }

    /// The negation of this literal.
    #[must_use]
    pub fn negated(mut self) -> Self {
        self.positive = !self.positive;
        self
    }
}

impl fmt::Display for MentalLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.positive {
            write!(f, "{}({})", self.operator.keyword(), self.formula)
        } else {
            write!(f, "not({}({}))", self.operator.keyword(), self.formula)
        }
    }
}

/// A mental-state condition together with the position of the rule or
/// action specification it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    /// Position of the owning rule or action specification.
    pub source: SourcePosition,
    /// Conjunction of literals; empty means `true`.
    pub literals: Vec<MentalLiteral>,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(source: SourcePosition, literals: Vec<MentalLiteral>) -> Self {
        Self { source, literals }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.literals.is_empty() {
            return write!(f, "true");
        }
        for (i, literal) in self.literals.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{literal}")?;
        }
        Ok(())
    }
}

/// One immutable record of a state-changing or decision event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Occurrence {
    /// A module was pushed onto the module stack.
    ModuleEnter {
        /// Where the module was entered from.
        source: SourcePosition,
        /// The module.
        module: Signature,
    },
    /// A module was popped from the module stack.
    ModuleLeave {
        /// Where the module was left.
        source: SourcePosition,
        /// The module.
        module: Signature,
    },
    /// A rule guard or action precondition was evaluated.
    RuleConditionInspection {
        /// Position of the evaluation.
        source: SourcePosition,
        /// The evaluated condition.
        condition: Condition,
        /// Guard or precondition.
        evaluation: EvaluationKind,
    },
    /// An action was selected and is about to be attempted.
    ActionCall {
        /// Position of the call in its rule.
        source: SourcePosition,
        /// The action as written, possibly with variables.
        action: Term,
        /// Substitution that grounded the action's variables.
        substitution: Substitution,
    },
    /// The previously called action was actually executed.
    ActionExecuted {
        /// Position of the call in its rule.
        source: SourcePosition,
        /// The executed action.
        action: Term,
    },
    /// A mental base changed.
    BaseModification {
        /// Position of the modifying action.
        source: SourcePosition,
        /// The base that changed.
        base: BaseKind,
        /// Target resolved at record time.
        focus: Focus,
        /// Formulas actually inserted.
        added: Vec<Term>,
        /// Formulas actually deleted.
        removed: Vec<Term>,
    },
}

impl Occurrence {
    /// Creates a `ModuleEnter`.
    #[must_use]
    pub fn module_enter(source: SourcePosition, module: Signature) -> Self {
        Self::ModuleEnter { source, module }
    }

    /// Creates a `ModuleLeave`.
    #[must_use]
    pub fn module_leave(source: SourcePosition, module: Signature) -> Self {
        Self::ModuleLeave { source, module }
    }

    /// Creates a `RuleConditionInspection`; the source is the condition's own.
    #[must_use]
    pub fn inspection(condition: Condition, evaluation: EvaluationKind) -> Self {
        Self::RuleConditionInspection {
            source: condition.source.clone(),
            condition,
            evaluation,
        }
    }

    /// Creates an `ActionCall`.
    #[must_use]
    pub fn action_call(source: SourcePosition, action: Term, substitution: Substitution) -> Self {
        Self::ActionCall {
            source,
            action,
            substitution,
        }
    }

    /// Creates an `ActionExecuted`.
    #[must_use]
    pub fn action_executed(source: SourcePosition, action: Term) -> Self {
        Self::ActionExecuted { source, action }
    }

    /// Creates a `BaseModification`.
    #[must_use]
    pub fn base_modification(
        source: SourcePosition,
        base: BaseKind,
        focus: Focus,
        added: Vec<Term>,
        removed: Vec<Term>,
    ) -> Self {
        Self::BaseModification {
            source,
            base,
            focus,
            added,
            removed,
        }
    }

    /// The source position this occurrence points to.
    #[must_use]
    pub fn source(&self) -> &SourcePosition {
        match self {
            Self::ModuleEnter { source, .. }
            | Self::ModuleLeave { source, .. }
            | Self::RuleConditionInspection { source, .. }
            | Self::ActionCall { source, .. }
            | Self::ActionExecuted { source, .. }
            | Self::BaseModification { source, .. } => source,
        }
    }

    /// Re-applies this occurrence to `state` (forward replay).
    ///
    /// # Errors
    /// Propagates whatever the live state rejects.
    pub fn apply<S: AgentState + ?Sized>(&self, state: &mut S) -> Result<(), StateError> {
        match self {
            Self::ModuleEnter { module, .. } => state.push_module(module),
            Self::ModuleLeave { module, .. } => state.pop_module(module),
            Self::BaseModification {
                base,
                focus,
                added,
                removed,
                ..
            } => state.modify_base(*base, focus, added, removed),
            Self::RuleConditionInspection { .. }
            | Self::ActionCall { .. }
            | Self::ActionExecuted { .. } => Ok(()),
        }
    }

    /// Reverts this occurrence on `state` (backward replay).
    ///
    /// # Errors
    /// Propagates whatever the live state rejects.
    pub fn undo<S: AgentState + ?Sized>(&self, state: &mut S) -> Result<(), StateError> {
        match self {
            Self::ModuleEnter { module, .. } => state.pop_module(module),
            Self::ModuleLeave { module, .. } => state.push_module(module),
            Self::BaseModification {
                base,
                focus,
                added,
                removed,
                ..
            } => state.modify_base(*base, focus, removed, added),
            Self::RuleConditionInspection { .. }
            | Self::ActionCall { .. }
            | Self::ActionExecuted { .. } => Ok(()),
        }
    }

    /// Every signature this occurrence concerns: its own payload plus the
    /// program element at its source position.
    #[must_use]
    pub fn signatures(&self, map: &ProgramMap) -> BTreeSet<Signature> {
        let mut out = map.signatures_at(self.source());
        out.extend(self.payload_signatures());
        out
    }

    /// Signatures named by the occurrence itself, independent of any
    /// program map.
    #[must_use]
    pub fn payload_signatures(&self) -> BTreeSet<Signature> {
        let mut out = BTreeSet::new();
        match self {
            Self::ModuleEnter { module, .. } | Self::ModuleLeave { module, .. } => {
                out.insert(module.clone());
            }
            Self::RuleConditionInspection { condition, .. } => {
                out.extend(condition.literals.iter().filter_map(|l| l.formula.signature()));
            }
            Self::ActionCall { action, .. } | Self::ActionExecuted { action, .. } => {
                out.extend(action.signature());
            }
            Self::BaseModification { added, removed, .. } => {
                out.extend(added.iter().chain(removed).filter_map(Term::signature));
            }
        }
        out
    }
}

fn write_terms(f: &mut fmt::Formatter<'_>, terms: &[Term]) -> fmt::Result {
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{term}")?;
    }
    Ok(())
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModuleEnter { module, .. } => write!(f, "entered module {module}"),
            Self::ModuleLeave { module, .. } => write!(f, "left module {module}"),
            Self::RuleConditionInspection {
                condition,
                evaluation,
                ..
            } => match evaluation {
                EvaluationKind::RuleCondition => write!(f, "evaluated rule condition {condition}"),
                EvaluationKind::ActionPrecondition => {
                    write!(f, "evaluated precondition {condition}")
                }
            },
            Self::ActionCall {
                action,
                substitution,
                ..
            } => write!(f, "called {action} with {substitution}"),
            Self::ActionExecuted { action, .. } => write!(f, "executed {action}"),
            Self::BaseModification {
                base,
                focus,
                added,
                removed,
                ..
            } => {
                write!(f, "{base} base of {focus}: +[")?;
                write_terms(f, added)?;
                write!(f, "] -[")?;
                write_terms(f, removed)?;
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MentalState;

    fn pos(line: u32) -> SourcePosition {
        SourcePosition::new("test.mod2g", line, 1)
    }

    fn seeded_state() -> MentalState {
        let mut state = MentalState::new();
        state.push_module(&Signature::new("main", 0)).unwrap();
        state
            .modify_base(BaseKind::Belief, &Focus::Agent, &[Term::atom("sunny")], &[])
            .unwrap();
        state
    }

    fn every_variant() -> Vec<Occurrence> {
        let init = Signature::new("init", 0);
        let cond = Condition::new(pos(2), vec![MentalLiteral::bel(Term::atom("sunny"))]);
        vec![
            Occurrence::module_enter(pos(1), init),
            Occurrence::module_leave(pos(1), Signature::new("main", 0)),
            Occurrence::inspection(cond, EvaluationKind::RuleCondition),
            Occurrence::action_call(
                pos(3),
                Term::compound("walk", vec![Term::var("X")]),
                Substitution::new().with("X", Term::atom("park")),
            ),
            Occurrence::action_executed(pos(3), Term::compound("walk", vec![Term::atom("park")])),
            Occurrence::base_modification(
                pos(4),
                BaseKind::Belief,
                Focus::Agent,
                vec![Term::atom("rainy")],
                vec![Term::atom("sunny")],
            ),
            Occurrence::base_modification(
                pos(5),
                BaseKind::Goal,
                Focus::Module {
                    module: Signature::new("main", 0),
                },
                vec![Term::atom("dry")],
                vec![],
            ),
        ]
    }

    #[test]
    fn test_apply_then_undo_restores_state() {
        for occurrence in every_variant() {
            let original = seeded_state();
            let mut state = original.clone();
            occurrence.apply(&mut state).unwrap();
            occurrence.undo(&mut state).unwrap();
            assert_eq!(state, original, "apply/undo asymmetry for {occurrence}");
        }
    }

    #[test]
    fn test_undo_then_apply_restores_state() {
        // A state that could have followed each occurrence.
        for occurrence in every_variant() {
            let mut after = seeded_state();
            if let Occurrence::ModuleLeave { .. } = occurrence {
                after = MentalState::new();
            }
            if let Occurrence::ModuleEnter { module, .. } = &occurrence {
                after.push_module(module).unwrap();
            }
            if let Occurrence::BaseModification {
                base,
                focus,
                added,
                removed,
                ..
            } = &occurrence
            {
                after.modify_base(*base, focus, added, removed).unwrap();
            }

            let mut state = after.clone();
            occurrence.undo(&mut state).unwrap();
            occurrence.apply(&mut state).unwrap();
            assert_eq!(state, after, "undo/apply asymmetry for {occurrence}");
        }
    }

    #[test]
    fn test_decision_events_do_not_touch_state() {
        let original = seeded_state();
        for occurrence in every_variant().into_iter().filter(|o| {
            matches!(
                o,
                Occurrence::RuleConditionInspection { .. }
                    | Occurrence::ActionCall { .. }
                    | Occurrence::ActionExecuted { .. }
            )
        }) {
            let mut state = original.clone();
            occurrence.apply(&mut state).unwrap();
            assert_eq!(state, original);
        }
    }

    #[test]
    fn test_module_enter_and_leave_are_inverse() {
        let m = Signature::new("init", 0);
        let enter = Occurrence::module_enter(pos(1), m.clone());
        let leave = Occurrence::module_leave(pos(1), m);

        let mut a = seeded_state();
        let mut b = seeded_state();
        enter.apply(&mut a).unwrap();
        leave.undo(&mut b).unwrap();
        assert_eq!(a, b);

        enter.undo(&mut a).unwrap();
        leave.apply(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_focus_is_not_reresolved_on_undo() {
        let main = Signature::new("main", 0);
        let modification = Occurrence::base_modification(
            pos(5),
            BaseKind::Goal,
            Focus::Module { module: main.clone() },
            vec![Term::atom("dry")],
            vec![],
        );

        let mut state = seeded_state();
        modification.apply(&mut state).unwrap();
        // The module stack changes shape before the undo.
        state.push_module(&Signature::new("other", 0)).unwrap();
        modification.undo(&mut state).unwrap();

        assert!(state
            .base(BaseKind::Goal, &Focus::Module { module: main })
            .is_none());
    }

    #[test]
    fn test_signatures_include_payload_and_program_element() {
        let mut map = ProgramMap::new();
        map.add_rule(pos(3), [Signature::new("sunny", 0)], vec![Term::compound("walk", vec![Term::var("X")])]);

        let variants = every_variant();
        let sigs = variants[3].signatures(&map);
        assert!(sigs.contains(&Signature::new("walk", 1)));
        assert!(sigs.contains(&Signature::new("sunny", 0)));

        let sigs = variants[5].signatures(&ProgramMap::new());
        assert_eq!(
            sigs,
            BTreeSet::from([Signature::new("rainy", 0), Signature::new("sunny", 0)])
        );
        assert_eq!(variants[3].payload_signatures(), BTreeSet::from([Signature::new("walk", 1)]));
    }

    #[test]
    fn test_display_is_readable() {
        let rendered: Vec<String> = every_variant().iter().map(ToString::to_string).collect();
        assert_eq!(rendered[0], "entered module init/0");
        assert_eq!(rendered[2], "evaluated rule condition bel(sunny)");
        assert_eq!(rendered[3], "called walk(X) with {X/park}");
        assert_eq!(rendered[5], "belief base of self: +[rainy] -[sunny]");
    }
}
