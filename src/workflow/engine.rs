use crate::db::models::event_models::{CallLog, Event};
use crate::db::repositories::accounts::TemplateSource;
use crate::db::repositories::events::EventStore;
use crate::error::Error;
use crate::hub::{BroadcastHub, ChannelMessage};
use crate::workflow::plan::{ActionPlanTemplate, Answer, PlanState, StepValue};
use crate::workflow::status::{self, EventStatus, TransitionAction};
use anyhow::Result;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Per-event workflow execution state
struct PlanCell {
    account_id: Uuid,
    template: ActionPlanTemplate,
    state: PlanState,
}

/// Drives events through the escalation state machine and their account's
/// action plan. All mutations for one event are serialized behind that
/// event's cell lock; unrelated events never contend. Every accepted
/// mutation is appended to the account channel before the lock is released,
/// so subscribers observe per-event deltas in apply order.
pub struct WorkflowEngine {
    events: Arc<dyn EventStore>,
    templates: Arc<dyn TemplateSource>,
    hub: Arc<BroadcastHub>,
    http: reqwest::Client,
    cells: RwLock<HashMap<Uuid, Arc<Mutex<PlanCell>>>>,
}

impl WorkflowEngine {
    pub fn new(
        events: Arc<dyn EventStore>,
        templates: Arc<dyn TemplateSource>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            events,
            templates,
            hub,
            http: reqwest::Client::new(),
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Bind a fresh, all-unset plan state to a newly ingested event
    pub async fn initialize(&self, event: &Event, template: Option<ActionPlanTemplate>) {
        let cell = PlanCell {
            account_id: event.account_id,
            template: template.unwrap_or_default(),
            state: PlanState::new(),
        };

        let mut cells = self.cells.write().await;
        cells.insert(event.id, Arc::new(Mutex::new(cell)));
    }

    /// Cell for an event, rebuilding an empty plan state from the account
    /// template when the event is only known from storage.
    async fn cell(&self, event_id: &Uuid) -> Result<Arc<Mutex<PlanCell>>> {
        {
            let cells = self.cells.read().await;
            if let Some(cell) = cells.get(event_id) {
                return Ok(cell.clone());
            }
        }

        let event = self
            .events
            .get(event_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Event not found: {}", event_id)))?;
        let template = self.templates.action_plan(&event.account_id).await?;

        let mut cells = self.cells.write().await;
        let cell = cells.entry(event.id).or_insert_with(|| {
            Arc::new(Mutex::new(PlanCell {
                account_id: event.account_id,
                template: template.unwrap_or_default(),
                state: PlanState::new(),
            }))
        });

        Ok(cell.clone())
    }

    /// Answer a boolean question
    pub async fn apply_answer(
        &self,
        event_id: &Uuid,
        step_id: &str,
        answer: Answer,
    ) -> Result<StepValue> {
        let cell = self.cell(event_id).await?;
        let mut guard = cell.lock().await;
        let cell = &mut *guard;

        let value = cell.state.apply_answer(&cell.template, step_id, answer)?;
        self.publish_plan_delta(cell, event_id, step_id, value).await;

        Ok(value)
    }

    /// Flip a checklist/tool/webhook step's completion flag
    pub async fn toggle_step(&self, event_id: &Uuid, step_id: &str) -> Result<StepValue> {
        let cell = self.cell(event_id).await?;
        let mut guard = cell.lock().await;
        let cell = &mut *guard;

        let value = cell.state.toggle(&cell.template, step_id)?;
        self.publish_plan_delta(cell, event_id, step_id, value).await;

        Ok(value)
    }

    /// Fire a webhook step's callback exactly once. Success marks the step
    /// completed; failure leaves it untouched and surfaces to the caller.
    /// The far end gives no idempotency guarantee, so there is no automatic
    /// retry.
    pub async fn trigger_webhook(&self, event_id: &Uuid, step_id: &str) -> Result<StepValue> {
        let cell = self.cell(event_id).await?;
        let mut guard = cell.lock().await;
        let cell = &mut *guard;

        let url = cell.state.webhook_url(&cell.template, step_id)?;

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "event_id": event_id,
                "step_id": step_id,
            }))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let value = cell.state.mark_completed(step_id);
                info!("Webhook {} fired for event {}", step_id, event_id);
                self.publish_plan_delta(cell, event_id, step_id, value).await;
                Ok(value)
            }
            Ok(resp) => {
                warn!(
                    "Webhook {} for event {} answered {}",
                    step_id,
                    event_id,
                    resp.status()
                );
                Err(Error::WebhookFailure(format!(
                    "webhook {} answered {}",
                    url,
                    resp.status()
                ))
                .into())
            }
            Err(e) => {
                warn!("Webhook {} for event {} failed: {}", step_id, event_id, e);
                Err(Error::WebhookFailure(format!("webhook {} failed: {}", url, e)).into())
            }
        }
    }

    /// Move an event through the escalation state machine and broadcast the
    /// change
    pub async fn transition(
        &self,
        event_id: &Uuid,
        action: TransitionAction,
        reason: Option<&str>,
    ) -> Result<Event> {
        let cell = self.cell(event_id).await?;
        let cell = cell.lock().await;

        let event = self
            .events
            .get(event_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Event not found: {}", event_id)))?;

        let current: EventStatus = event.status.parse()?;
        let next = status::apply(current, action, reason)?;

        // Escalation reasons go on the event notes; the resolution reason is
        // a dedicated field set exactly once.
        if action == TransitionAction::Escalate {
            let reason = reason.unwrap_or_default().trim().to_string();
            let notes = if event.notes.is_empty() {
                format!("[escalated] {}", reason)
            } else {
                format!("{}\n[escalated] {}", event.notes, reason)
            };
            self.events.set_notes(event_id, &notes).await?;
        }

        let resolution = match action {
            TransitionAction::Resolve => reason,
            _ => None,
        };
        let updated = self
            .events
            .update_status(event_id, next.as_str(), resolution)
            .await?;

        info!("Event {} moved {} -> {}", event_id, current, next);

        self.hub
            .publish(
                &cell.account_id,
                ChannelMessage::EventStatusChanged {
                    event_id: *event_id,
                    status: updated.status.clone(),
                    resolution: updated.resolution.clone(),
                },
            )
            .await;

        Ok(updated)
    }

    /// Append a call log entry and broadcast it
    pub async fn log_call(&self, event_id: &Uuid, entry: CallLog) -> Result<Event> {
        let cell = self.cell(event_id).await?;
        let cell = cell.lock().await;

        let updated = self.events.append_call_log(event_id, &entry).await?;

        self.hub
            .publish(
                &cell.account_id,
                ChannelMessage::EventCallLogged {
                    event_id: *event_id,
                    entry,
                },
            )
            .await;

        Ok(updated)
    }

    /// Replace operator notes
    pub async fn set_notes(&self, event_id: &Uuid, notes: &str) -> Result<Event> {
        let cell = self.cell(event_id).await?;
        let _cell = cell.lock().await;

        self.events.set_notes(event_id, notes).await
    }

    /// Snapshot of an event's current plan state
    pub async fn plan_state(&self, event_id: &Uuid) -> Result<PlanState> {
        let cell = self.cell(event_id).await?;
        let cell = cell.lock().await;
        Ok(cell.state.clone())
    }

    async fn publish_plan_delta(
        &self,
        cell: &PlanCell,
        event_id: &Uuid,
        step_id: &str,
        value: StepValue,
    ) {
        self.hub
            .publish(
                &cell.account_id,
                ChannelMessage::EventPlanUpdated {
                    event_id: *event_id,
                    step_id: step_id.to_string(),
                    value,
                },
            )
            .await;
    }
}
