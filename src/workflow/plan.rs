use crate::error::Error;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-account response checklist template, supplied by account management.
/// Stored JSON is an ordered array of steps; boolean questions nest child
/// sequences for each answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionPlanTemplate {
    pub steps: Vec<Step>,
}

/// One node of the action plan tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Stable identifier, unique within the template
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Step behavior. The recursive question shape keeps branch sequences as
/// owned child lists rather than references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepKind {
    /// Plain check-off item
    Checklist,
    /// Yes/no question gating two child sequences
    BooleanQuestion {
        #[serde(default, rename = "yesSteps")]
        yes_steps: Vec<Step>,
        #[serde(default, rename = "noSteps")]
        no_steps: Vec<Step>,
    },
    /// References an external actuator; completion is operator-confirmed
    ToolTrigger {
        #[serde(default, rename = "toolId")]
        tool_id: Option<String>,
    },
    /// Fires an external HTTP callback
    Webhook { url: String },
}

/// Answer to a boolean question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Yes,
    No,
}

/// Recorded value of one step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepValue {
    /// Boolean-question answer
    Answer(Answer),
    /// Completion flag for checklist/tool/webhook steps
    Completed(bool),
}

/// Resolved step values for one event.
///
/// Values are keyed by step id and never erased: switching a question's
/// answer hides the other branch's recorded progress but keeps it, so
/// answering back restores it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanState {
    values: HashMap<String, StepValue>,
}

impl PlanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a step, if any was recorded
    pub fn value(&self, step_id: &str) -> Option<StepValue> {
        self.values.get(step_id).copied()
    }

    /// Current answer of a boolean question
    pub fn answer(&self, step_id: &str) -> Option<Answer> {
        match self.values.get(step_id) {
            Some(StepValue::Answer(a)) => Some(*a),
            _ => None,
        }
    }

    /// Whether a non-question step is currently marked completed
    pub fn completed(&self, step_id: &str) -> bool {
        matches!(self.values.get(step_id), Some(StepValue::Completed(true)))
    }

    /// Record an answer on a reachable boolean question
    pub fn apply_answer(
        &mut self,
        template: &ActionPlanTemplate,
        step_id: &str,
        answer: Answer,
    ) -> Result<StepValue> {
        let step = self.reachable_step(template, step_id)?;

        match step.kind {
            StepKind::BooleanQuestion { .. } => {
                let value = StepValue::Answer(answer);
                self.values.insert(step_id.to_string(), value);
                Ok(value)
            }
            _ => Err(Error::InvalidStep(format!(
                "step {} is not a boolean question",
                step_id
            ))
            .into()),
        }
    }

    /// Flip the completion flag of a reachable checklist/tool/webhook step
    pub fn toggle(&mut self, template: &ActionPlanTemplate, step_id: &str) -> Result<StepValue> {
        let step = self.reachable_step(template, step_id)?;

        match step.kind {
            StepKind::BooleanQuestion { .. } => Err(Error::InvalidStep(format!(
                "step {} is a boolean question, not a toggle",
                step_id
            ))
            .into()),
            _ => {
                let value = StepValue::Completed(!self.completed(step_id));
                self.values.insert(step_id.to_string(), value);
                Ok(value)
            }
        }
    }

    /// Mark a step completed (webhook success path)
    pub fn mark_completed(&mut self, step_id: &str) -> StepValue {
        let value = StepValue::Completed(true);
        self.values.insert(step_id.to_string(), value);
        value
    }

    /// Webhook URL of a reachable webhook step
    pub fn webhook_url(&self, template: &ActionPlanTemplate, step_id: &str) -> Result<String> {
        let step = self.reachable_step(template, step_id)?;

        match &step.kind {
            StepKind::Webhook { url } => Ok(url.clone()),
            _ => Err(Error::InvalidStep(format!("step {} is not a webhook", step_id)).into()),
        }
    }

    /// Find a step that is reachable given current ancestor answers. Steps
    /// inside an unanswered question, or inside the branch the current answer
    /// does not select, are rejected: the operator never saw them.
    fn reachable_step<'a>(
        &self,
        template: &'a ActionPlanTemplate,
        step_id: &str,
    ) -> Result<&'a Step> {
        find_reachable(&template.steps, self, step_id).ok_or_else(|| {
            Error::InvalidStep(format!("step {} is not reachable in the current plan", step_id))
                .into()
        })
    }
}

fn find_reachable<'a>(steps: &'a [Step], state: &PlanState, step_id: &str) -> Option<&'a Step> {
    for step in steps {
        if step.id == step_id {
            return Some(step);
        }

        if let StepKind::BooleanQuestion {
            yes_steps,
            no_steps,
        } = &step.kind
        {
            let branch = match state.answer(&step.id) {
                Some(Answer::Yes) => Some(yes_steps),
                Some(Answer::No) => Some(no_steps),
                None => None,
            };

            if let Some(branch) = branch {
                if let Some(found) = find_reachable(branch, state, step_id) {
                    return Some(found);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ActionPlanTemplate {
        serde_json::from_value(serde_json::json!([
            {"id": "check-feed", "label": "Review live feed", "type": "checklist"},
            {
                "id": "person-visible",
                "label": "Is a person visible?",
                "type": "boolean-question",
                "yesSteps": [
                    {"id": "call-contact", "label": "Call site contact", "type": "checklist"},
                    {"id": "notify-guard", "label": "Notify guard service", "type": "webhook",
                     "url": "http://hooks.local/guard"}
                ],
                "noSteps": [
                    {"id": "log-false", "label": "Log false trigger", "type": "checklist"}
                ]
            },
            {"id": "open-gate", "label": "Open the gate", "type": "tool-trigger", "toolId": "relay-1"}
        ]))
        .unwrap()
    }

    #[test]
    fn parses_nested_template_json() {
        let t = template();
        assert_eq!(t.steps.len(), 3);
        match &t.steps[1].kind {
            StepKind::BooleanQuestion {
                yes_steps,
                no_steps,
            } => {
                assert_eq!(yes_steps.len(), 2);
                assert_eq!(no_steps.len(), 1);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn toggle_round_trips() {
        let t = template();
        let mut state = PlanState::new();

        assert_eq!(
            state.toggle(&t, "check-feed").unwrap(),
            StepValue::Completed(true)
        );
        assert_eq!(
            state.toggle(&t, "check-feed").unwrap(),
            StepValue::Completed(false)
        );
        assert!(!state.completed("check-feed"));
    }

    #[test]
    fn child_of_unanswered_question_is_rejected() {
        let t = template();
        let mut state = PlanState::new();

        let err = state.toggle(&t, "call-contact").unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert!(matches!(err, Error::InvalidStep(_)));
    }

    #[test]
    fn inactive_branch_is_rejected() {
        let t = template();
        let mut state = PlanState::new();

        state
            .apply_answer(&t, "person-visible", Answer::No)
            .unwrap();
        let err = state.toggle(&t, "call-contact").unwrap_err();
        assert!(matches!(
            err.downcast::<Error>().unwrap(),
            Error::InvalidStep(_)
        ));

        // The no-branch child is live.
        state.toggle(&t, "log-false").unwrap();
    }

    #[test]
    fn branch_switch_preserves_progress() {
        let t = template();
        let mut state = PlanState::new();

        state
            .apply_answer(&t, "person-visible", Answer::Yes)
            .unwrap();
        state.toggle(&t, "call-contact").unwrap();
        assert!(state.completed("call-contact"));

        // Flip to no: the yes branch becomes unreachable but keeps its value.
        state
            .apply_answer(&t, "person-visible", Answer::No)
            .unwrap();
        assert!(state.toggle(&t, "call-contact").is_err());
        assert!(state.completed("call-contact"));

        // Back to yes: prior progress is visible again.
        state
            .apply_answer(&t, "person-visible", Answer::Yes)
            .unwrap();
        assert!(state.completed("call-contact"));
        assert_eq!(
            state.toggle(&t, "call-contact").unwrap(),
            StepValue::Completed(false)
        );
    }

    #[test]
    fn answer_on_toggle_step_is_rejected() {
        let t = template();
        let mut state = PlanState::new();

        let err = state.apply_answer(&t, "open-gate", Answer::Yes).unwrap_err();
        assert!(matches!(
            err.downcast::<Error>().unwrap(),
            Error::InvalidStep(_)
        ));
    }

    #[test]
    fn unknown_step_is_rejected() {
        let t = template();
        let mut state = PlanState::new();

        assert!(state.toggle(&t, "missing").is_err());
    }

    #[test]
    fn state_serializes_as_flat_map() {
        let t = template();
        let mut state = PlanState::new();
        state
            .apply_answer(&t, "person-visible", Answer::Yes)
            .unwrap();
        state.toggle(&t, "check-feed").unwrap();

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["person-visible"], "yes");
        assert_eq!(json["check-feed"], true);
    }
}
