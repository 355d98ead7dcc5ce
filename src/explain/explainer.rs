//! Questions answered from a recorded trace.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::HistoryResult;
use crate::log::EventLog;
use crate::occurrence::{Condition, EvaluationKind, MentalOperator, Occurrence};
use crate::program::ProgramMap;
use crate::state::BaseKind;
use crate::term::{KrEngine, Term};

use super::reason::{ActionReason, InspectionEvidence, Reason};

/// Answers "why did this action happen" and "why did it not" over an event log.
///
/// The explainer borrows the program map for its lifetime and is handed
/// the log per call, so it can keep its indexed sets while the log grows.
#[derive(Debug)]
pub struct TraceExplainer<'m> {
    map: &'m ProgramMap,
    indexed: Option<PathBuf>,
    processed: usize,
    beliefs: BTreeSet<Term>,
    goals: BTreeSet<Term>,
    actions: BTreeSet<Term>,
}

/// Backward scan state of [`TraceExplainer::why_action`].
enum Scan {
    Idle,
    /// An execution seen, waiting for its call.
    Pending(Term),
    /// A matching call seen, collecting its evidence.
    Open {
        action: Term,
        trace_index: usize,
        precondition: Option<InspectionEvidence>,
    },
}

impl<'m> TraceExplainer<'m> {
    /// Creates an explainer that has indexed nothing yet.
    #[must_use]
    pub fn new(map: &'m ProgramMap) -> Self {
        Self {
            map,
            indexed: None,
            processed: 0,
            beliefs: BTreeSet::new(),
            goals: BTreeSet::new(),
            actions: BTreeSet::new(),
        }
    }

    /// Indexes every belief, goal and action mentioned in occurrences not
    /// processed yet. Calling it again after the log grew extends the sets.
    /// Handing it a different log (by backing file) starts over.
    ///
    /// # Errors
    /// The first read or codec error; occurrences before it stay indexed.
    pub fn process(&mut self, log: &EventLog) -> HistoryResult<()> {
        if self.indexed.as_deref() != Some(log.path()) {
            if self.indexed.is_some() {
                tracing::debug!(path = %log.path().display(), "explainer switched logs, reindexing");
            }
            self.reset();
            self.indexed = Some(log.path().to_path_buf());
        }

        let len = log.len();
        while self.processed < len {
            let occurrence = log.get(self.processed)?;
            self.index(&occurrence);
            self.processed += 1;
        }
        tracing::debug!(
            processed = self.processed,
            beliefs = self.beliefs.len(),
            goals = self.goals.len(),
            actions = self.actions.len(),
            "trace indexed"
        );
        Ok(())
    }

    /// Number of occurrences indexed so far.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Every belief formula seen in modifications or conditions.
    #[must_use]
    pub fn beliefs(&self) -> &BTreeSet<Term> {
        &self.beliefs
    }

    /// Every goal formula seen in modifications or conditions.
    #[must_use]
    pub fn goals(&self) -> &BTreeSet<Term> {
        &self.goals
    }

    /// Every action instance that was called or executed.
    #[must_use]
    pub fn actions(&self) -> &BTreeSet<Term> {
        &self.actions
    }

    fn reset(&mut self) {
        self.processed = 0;
        self.beliefs.clear();
        self.goals.clear();
        self.actions.clear();
    }

    fn index(&mut self, occurrence: &Occurrence) {
        match occurrence {
            Occurrence::BaseModification {
                base, added, removed, ..
            } => {
                let target = match base {
                    BaseKind::Belief => &mut self.beliefs,
                    BaseKind::Goal => &mut self.goals,
                    BaseKind::Percept | BaseKind::Message => return,
                };
                target.extend(added.iter().chain(removed).cloned());
            }
            Occurrence::RuleConditionInspection { condition, .. } => {
                for literal in &condition.literals {
                    match literal.operator {
                        MentalOperator::Bel => {
                            self.beliefs.insert(literal.formula.clone());
                        }
                        MentalOperator::Goal | MentalOperator::AGoal | MentalOperator::GoalA => {
                            self.goals.insert(literal.formula.clone());
                        }
                        MentalOperator::Percept | MentalOperator::Received | MentalOperator::Sent => {}
                    }
                }
            }
            Occurrence::ActionCall {
                action, substitution, ..
            } => {
                self.actions.insert(substitution.apply(action));
            }
            Occurrence::ActionExecuted { action, .. } => {
                self.actions.insert(action.clone());
            }
            Occurrence::ModuleEnter { .. } | Occurrence::ModuleLeave { .. } => {}
        }
    }

    /// Every complete causal chain behind occurrences of `action`, most
    /// recent first.
    ///
    /// Scanning backward, an execution is paired with the call just before
    /// it. The call opens a reason if the grounded instance unifies with
    /// `action`. The first inspection before the call must be the action's
    /// precondition; the first rule-condition inspection before that closes
    /// the reason. Chains that do not complete are dropped.
    ///
    /// # Errors
    /// The first read or codec error.
    pub fn why_action(
        &self,
        log: &EventLog,
        action: &Term,
        kr: &dyn KrEngine,
    ) -> HistoryResult<Vec<ActionReason>> {
        let mut reasons = Vec::new();
        let mut scan = Scan::Idle;

        for index in (0..log.len()).rev() {
            let occurrence = log.get(index)?;
            scan = match (scan, occurrence) {
                // Calls and executions of other actions in the same rule body
                // sit between a call and its evidence.
                (open @ Scan::Open { .. }, Occurrence::ActionCall { .. } | Occurrence::ActionExecuted { .. }) => open,
                (_, Occurrence::ActionExecuted { action: executed, .. }) => Scan::Pending(executed),
                (Scan::Pending(executed), Occurrence::ActionCall { substitution, .. }) => {
                    let grounded = kr.apply_subst(&executed, &substitution);
                    if kr.mgu(action, &grounded).is_some() {
                        Scan::Open {
                            action: grounded,
                            trace_index: index,
                            precondition: None,
                        }
                    } else {
                        Scan::Idle
                    }
                }
                (
                    Scan::Open {
                        action: opened,
                        trace_index,
                        precondition: None,
                    },
                    Occurrence::RuleConditionInspection {
                        condition, evaluation, ..
                    },
                ) => match evaluation {
                    EvaluationKind::ActionPrecondition => Scan::Open {
                        action: opened,
                        trace_index,
                        precondition: Some(InspectionEvidence {
                            trace_index: index,
                            condition,
                        }),
                    },
                    EvaluationKind::RuleCondition => {
                        tracing::debug!(trace_index, "call without precondition evidence dropped");
                        Scan::Idle
                    }
                },
                (
                    Scan::Open {
                        action: opened,
                        trace_index,
                        precondition: Some(precondition),
                    },
                    Occurrence::RuleConditionInspection {
                        condition,
                        evaluation: EvaluationKind::RuleCondition,
                        ..
                    },
                ) => {
                    reasons.push(ActionReason {
                        action: opened,
                        trace_index,
                        precondition_evidence: precondition,
                        rule_condition_evidence: InspectionEvidence {
                            trace_index: index,
                            condition,
                        },
                    });
                    Scan::Idle
                }
                (state, _) => state,
            };
        }

        Ok(reasons)
    }

    /// Explains `action`: its causal chains if it happened, otherwise
    /// exactly one reason why it did not.
    ///
    /// When it never happened, the first match wins:
    /// 1. a covering call was attempted but never executed
    ///    ([`Reason::NoActionNeverSatisfied`] with `rule_was_satisfied`)
    /// 2. the signature was only called with other instances
    ///    ([`Reason::NoActionNeverApplied`])
    /// 3. a rule calling the action was evaluated
    ///    ([`Reason::NoActionNeverSatisfied`])
    /// 4. otherwise [`Reason::NoActionNeverEvaluated`]
    ///
    /// A call covers `action` if its grounded instance unifies with
    /// `action` without binding any of `action`'s variables to a
    /// non-variable.
    ///
    /// # Errors
    /// The first read or codec error.
    pub fn why_not_action(&self, log: &EventLog, action: &Term, kr: &dyn KrEngine) -> HistoryResult<Vec<Reason>> {
        let happened = self.why_action(log, action, kr)?;
        if !happened.is_empty() {
            return Ok(happened.into_iter().map(Reason::Action).collect());
        }

        let signature = action.signature();
        let related_rule_positions = signature
            .as_ref()
            .map(|sig| self.map.rules_calling(sig))
            .unwrap_or_default();
        let query_vars = action.variables();

        let mut rule_evaluated = false;
        let mut pre_evaluated = false;
        let mut other_instances = BTreeSet::new();

        for occurrence in log.iter() {
            match occurrence? {
                Occurrence::ActionCall {
                    action: called,
                    substitution,
                    ..
                } if signature.is_some() && called.signature() == signature => {
                    let grounded = kr.apply_subst(&called, &substitution);
                    if covers(kr, action, &grounded, &query_vars) {
                        pre_evaluated = true;
                    } else {
                        other_instances.insert(grounded);
                    }
                }
                Occurrence::RuleConditionInspection {
                    condition: Condition { source, .. },
                    ..
                } if related_rule_positions.contains(&source) => {
                    rule_evaluated = true;
                }
                _ => {}
            }
        }

        let action = action.clone();
        let reason = if pre_evaluated {
            Reason::NoActionNeverSatisfied {
                action,
                rule_was_satisfied: true,
            }
        } else if !other_instances.is_empty() {
            Reason::NoActionNeverApplied {
                action,
                other_instances,
            }
        } else if rule_evaluated {
            Reason::NoActionNeverSatisfied {
                action,
                rule_was_satisfied: false,
            }
        } else {
            Reason::NoActionNeverEvaluated {
                action,
                related_rule_positions,
            }
        };
        Ok(vec![reason])
    }
}

fn covers(kr: &dyn KrEngine, query: &Term, instance: &Term, query_vars: &BTreeSet<String>) -> bool {
    let Some(unifier) = kr.mgu(query, instance) else {
        return false;
    };
    query_vars
        .iter()
        .all(|var| matches!(unifier.get(var), None | Some(Term::Var { .. })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::config::HistoryConfig;
    use crate::occurrence::MentalLiteral;
    use crate::program::SourcePosition;
    use crate::state::Focus;
    use crate::term::{Signature, Substitution, SyntacticUnifier};

    fn pos(line: u32) -> SourcePosition {
        SourcePosition::new("explain.mod2g", line, 1)
    }

    fn print_text(arg: Term) -> Term {
        Term::compound("printText", vec![arg])
    }

    fn rule_condition(line: u32) -> Occurrence {
        Occurrence::inspection(
            Condition::new(pos(line), vec![MentalLiteral::bel(Term::atom("ready"))]),
            EvaluationKind::RuleCondition,
        )
    }

    fn precondition(line: u32) -> Occurrence {
        Occurrence::inspection(
            Condition::new(pos(line), vec![MentalLiteral::goal(Term::atom("talk"))]),
            EvaluationKind::ActionPrecondition,
        )
    }

    fn call_and_execute(line: u32, text: &str) -> [Occurrence; 2] {
        [
            Occurrence::action_call(
                pos(line),
                print_text(Term::var("X")),
                Substitution::new().with("X", Term::string(text)),
            ),
            Occurrence::action_executed(pos(line), print_text(Term::string(text))),
        ]
    }

    fn log_of(dir: &std::path::Path, occurrences: Vec<Occurrence>) -> EventLog {
        log_named(dir, "explain.trace", occurrences)
    }

    fn log_named(dir: &std::path::Path, name: &str, occurrences: Vec<Occurrence>) -> EventLog {
        let mut log = EventLog::create(dir.join(name), &HistoryConfig::new(dir)).unwrap();
        for occurrence in occurrences {
            log.append(occurrence).unwrap();
        }
        log
    }

    #[test]
    fn test_why_action_single_chain() {
        let dir = tempdir().unwrap();
        let [call, exec] = call_and_execute(10, "hi");
        let mut log = log_of(dir.path(), vec![rule_condition(10), precondition(20), call, exec]);
        let map = ProgramMap::new();
        let explainer = TraceExplainer::new(&map);

        let reasons = explainer
            .why_action(&log, &print_text(Term::var("X")), &SyntacticUnifier)
            .unwrap();
        assert_eq!(reasons.len(), 1);
        let reason = &reasons[0];
        assert_eq!(reason.action, print_text(Term::string("hi")));
        assert_eq!(reason.trace_index, 2);
        assert_eq!(reason.precondition_evidence.trace_index, 1);
        assert_eq!(reason.rule_condition_evidence.trace_index, 0);
        log.finish(true).unwrap();
    }

    #[test]
    fn test_why_action_most_recent_first() {
        let dir = tempdir().unwrap();
        let [c1, e1] = call_and_execute(10, "a");
        let [c2, e2] = call_and_execute(10, "b");
        let mut log = log_of(
            dir.path(),
            vec![
                rule_condition(10),
                precondition(20),
                c1,
                e1,
                rule_condition(10),
                precondition(20),
                c2,
                e2,
            ],
        );
        let map = ProgramMap::new();
        let explainer = TraceExplainer::new(&map);

        let reasons = explainer
            .why_action(&log, &print_text(Term::var("X")), &SyntacticUnifier)
            .unwrap();
        let indices: Vec<usize> = reasons.iter().map(|r| r.trace_index).collect();
        assert_eq!(indices, vec![6, 2]);

        let only_a = explainer
            .why_action(&log, &print_text(Term::string("a")), &SyntacticUnifier)
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].trace_index, 2);
        log.finish(true).unwrap();
    }

    #[test]
    fn test_why_action_drops_incomplete_chain() {
        let dir = tempdir().unwrap();
        let [call, exec] = call_and_execute(10, "hi");
        // No rule condition before the precondition.
        let mut log = log_of(dir.path(), vec![precondition(20), call, exec]);
        let map = ProgramMap::new();
        let explainer = TraceExplainer::new(&map);

        let reasons = explainer
            .why_action(&log, &print_text(Term::var("X")), &SyntacticUnifier)
            .unwrap();
        assert!(reasons.is_empty());
        log.finish(true).unwrap();
    }

    #[test]
    fn test_why_action_newer_execution_replaces_pending() {
        let dir = tempdir().unwrap();
        let [call, exec] = call_and_execute(10, "hi");
        // A dangling execution directly before the real pair.
        let mut log = log_of(
            dir.path(),
            vec![
                rule_condition(10),
                precondition(20),
                call,
                Occurrence::action_executed(pos(30), Term::compound("beep", vec![])),
                exec,
            ],
        );
        let map = ProgramMap::new();
        let explainer = TraceExplainer::new(&map);

        // Scanning backward, "printText" is pending until "beep" replaces it,
        // so the call is paired with "beep" and discarded.
        let reasons = explainer
            .why_action(&log, &print_text(Term::var("X")), &SyntacticUnifier)
            .unwrap();
        assert!(reasons.is_empty());
        log.finish(true).unwrap();
    }

    #[test]
    fn test_why_not_action_prefers_occurrence() {
        let dir = tempdir().unwrap();
        let [call, exec] = call_and_execute(10, "hi");
        let mut log = log_of(dir.path(), vec![rule_condition(10), precondition(20), call, exec]);
        let map = ProgramMap::new();
        let explainer = TraceExplainer::new(&map);

        let reasons = explainer
            .why_not_action(&log, &print_text(Term::var("X")), &SyntacticUnifier)
            .unwrap();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].is_occurrence());
        log.finish(true).unwrap();
    }

    #[test]
    fn test_why_not_action_classification() {
        let dir = tempdir().unwrap();
        let greet = Term::compound("greet", vec![]);
        let wave = Term::compound("wave", vec![]);
        let mut map = ProgramMap::new();
        map.add_rule(pos(10), [Signature::new("ready", 0)], vec![greet.clone()]);
        map.add_rule(pos(40), [Signature::new("ready", 0)], vec![wave.clone()]);

        let mut log = log_of(
            dir.path(),
            vec![
                rule_condition(10),
                precondition(20),
                Occurrence::action_call(pos(10), greet.clone(), Substitution::new()),
            ],
        );
        let explainer = TraceExplainer::new(&map);

        let reasons = explainer.why_not_action(&log, &greet, &SyntacticUnifier).unwrap();
        assert_eq!(
            reasons,
            vec![Reason::NoActionNeverSatisfied {
                action: greet,
                rule_was_satisfied: true,
            }]
        );

        let reasons = explainer.why_not_action(&log, &wave, &SyntacticUnifier).unwrap();
        assert_eq!(
            reasons,
            vec![Reason::NoActionNeverEvaluated {
                action: wave,
                related_rule_positions: BTreeSet::from([pos(40)]),
            }]
        );
        log.finish(true).unwrap();
    }

    #[test]
    fn test_process_indexes_incrementally() {
        let dir = tempdir().unwrap();
        let [call, exec] = call_and_execute(10, "hi");
        let mut log = log_of(
            dir.path(),
            vec![
                rule_condition(10),
                precondition(20),
                Occurrence::base_modification(pos(5), BaseKind::Belief, Focus::Agent, vec![Term::atom("sunny")], vec![]),
            ],
        );
        let map = ProgramMap::new();
        let mut explainer = TraceExplainer::new(&map);

        explainer.process(&log).unwrap();
        assert_eq!(explainer.processed(), 3);
        assert_eq!(
            explainer.beliefs(),
            &BTreeSet::from([Term::atom("ready"), Term::atom("sunny")])
        );
        assert_eq!(explainer.goals(), &BTreeSet::from([Term::atom("talk")]));
        assert!(explainer.actions().is_empty());

        log.append(call).unwrap();
        log.append(exec).unwrap();
        explainer.process(&log).unwrap();
        assert_eq!(explainer.processed(), 5);
        assert_eq!(explainer.actions(), &BTreeSet::from([print_text(Term::string("hi"))]));
        log.finish(true).unwrap();
    }

    #[test]
    fn test_process_starts_over_for_another_log() {
        let dir = tempdir().unwrap();
        let [call, exec] = call_and_execute(10, "hi");
        let mut longer = log_named(dir.path(), "long.trace", vec![rule_condition(10), precondition(20), call, exec]);
        let mut shorter = log_named(
            dir.path(),
            "short.trace",
            vec![Occurrence::base_modification(
                pos(5),
                BaseKind::Goal,
                Focus::Agent,
                vec![Term::atom("rest")],
                vec![],
            )],
        );
        let map = ProgramMap::new();
        let mut explainer = TraceExplainer::new(&map);

        explainer.process(&longer).unwrap();
        assert_eq!(explainer.processed(), 4);

        explainer.process(&shorter).unwrap();
        assert_eq!(explainer.processed(), 1);
        assert_eq!(explainer.goals(), &BTreeSet::from([Term::atom("rest")]));
        assert!(explainer.actions().is_empty());
        assert!(explainer.beliefs().is_empty());

        longer.finish(true).unwrap();
        shorter.finish(true).unwrap();
    }

    #[test]
    fn test_atom_query_matches_zero_arity_call() {
        let dir = tempdir().unwrap();
        let greet = Term::compound("greet", vec![]);
        let mut map = ProgramMap::new();
        map.add_rule(pos(10), [Signature::new("ready", 0)], vec![greet.clone()]);
        let mut log = log_of(
            dir.path(),
            vec![
                rule_condition(10),
                Occurrence::action_call(pos(10), greet, Substitution::new()),
            ],
        );
        let explainer = TraceExplainer::new(&map);

        let reasons = explainer
            .why_not_action(&log, &Term::atom("greet"), &SyntacticUnifier)
            .unwrap();
        assert_eq!(
            reasons,
            vec![Reason::NoActionNeverSatisfied {
                action: Term::atom("greet"),
                rule_was_satisfied: true,
            }]
        );
        log.finish(true).unwrap();
    }
}
