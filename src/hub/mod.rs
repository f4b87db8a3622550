use crate::db::models::event_models::{CallLog, Event};
use crate::workflow::plan::StepValue;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Messages delivered over an account's operator channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChannelMessage {
    /// A new alarm event was ingested
    #[serde(rename = "event.created")]
    EventCreated { event: Event },

    /// An event moved through the escalation state machine
    #[serde(rename = "event.status_changed")]
    EventStatusChanged {
        event_id: Uuid,
        status: String,
        resolution: Option<String>,
    },

    /// One action-plan step changed value
    #[serde(rename = "event.plan_updated")]
    EventPlanUpdated {
        event_id: Uuid,
        step_id: String,
        value: StepValue,
    },

    /// A call log entry was appended
    #[serde(rename = "event.call_logged")]
    EventCallLogged { event_id: Uuid, entry: CallLog },
}

impl Display for ChannelMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventCreated { .. } => write!(f, "event.created"),
            Self::EventStatusChanged { .. } => write!(f, "event.status_changed"),
            Self::EventPlanUpdated { .. } => write!(f, "event.plan_updated"),
            Self::EventCallLogged { .. } => write!(f, "event.call_logged"),
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<ChannelMessage>,
}

/// Fan-out of event and workflow deltas to operators subscribed per account.
///
/// Delivery is fire-and-forget over bounded queues: a slow or disconnected
/// subscriber loses messages instead of stalling the publisher. Within one
/// subscriber queue, messages arrive in publish order.
pub struct BroadcastHub {
    capacity: usize,
    subscribers: RwLock<HashMap<Uuid, HashMap<Uuid, Subscriber>>>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber on an account channel
    pub async fn subscribe(&self, account_id: Uuid) -> (Uuid, mpsc::Receiver<ChannelMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(account_id)
            .or_default()
            .insert(id, Subscriber { tx });

        debug!("Subscriber {} joined account {}", id, account_id);

        (id, rx)
    }

    /// Remove a subscriber
    pub async fn unsubscribe(&self, account_id: &Uuid, subscriber_id: &Uuid) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(subs) = subscribers.get_mut(account_id) {
            subs.remove(subscriber_id);
            if subs.is_empty() {
                subscribers.remove(account_id);
            }
        }

        debug!("Subscriber {} left account {}", subscriber_id, account_id);
    }

    /// Publish a message to every subscriber of an account. Never blocks.
    pub async fn publish(&self, account_id: &Uuid, message: ChannelMessage) {
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            let Some(subs) = subscribers.get(account_id) else {
                return;
            };

            for (id, sub) in subs.iter() {
                match sub.tx.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            "Dropping {} for slow subscriber {} on account {}",
                            message, id, account_id
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(*id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            if let Some(subs) = subscribers.get_mut(account_id) {
                for id in closed {
                    subs.remove(&id);
                }
                if subs.is_empty() {
                    subscribers.remove(account_id);
                }
            }
        }
    }

    /// Subscriber count for an account
    pub async fn subscriber_count(&self, account_id: &Uuid) -> usize {
        let subscribers = self.subscribers.read().await;
        subscribers.get(account_id).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_only_to_the_event_account() {
        let hub = BroadcastHub::new(8);
        let account_a = Uuid::new_v4();
        let account_b = Uuid::new_v4();

        let (_id_a, mut rx_a) = hub.subscribe(account_a).await;
        let (_id_b, mut rx_b) = hub.subscribe(account_b).await;

        hub.publish(
            &account_a,
            ChannelMessage::EventStatusChanged {
                event_id: Uuid::new_v4(),
                status: "acknowledged".to_string(),
                resolution: None,
            },
        )
        .await;

        let got = rx_a.try_recv().unwrap();
        assert_eq!(got.to_string(), "event.status_changed");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_instead_of_blocking() {
        let hub = BroadcastHub::new(1);
        let account = Uuid::new_v4();
        let (_id, mut rx) = hub.subscribe(account).await;

        for _ in 0..5 {
            hub.publish(
                &account,
                ChannelMessage::EventStatusChanged {
                    event_id: Uuid::new_v4(),
                    status: "acknowledged".to_string(),
                    resolution: None,
                },
            )
            .await;
        }

        // Queue holds exactly one; the rest were dropped without blocking.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = BroadcastHub::new(8);
        let account = Uuid::new_v4();
        let (id, mut rx) = hub.subscribe(account).await;

        hub.unsubscribe(&account, &id).await;
        hub.publish(
            &account,
            ChannelMessage::EventStatusChanged {
                event_id: Uuid::new_v4(),
                status: "resolved".to_string(),
                resolution: Some("false alarm".to_string()),
            },
        )
        .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(hub.subscriber_count(&account).await, 0);
    }

    #[test]
    fn message_kinds_serialize_with_dotted_tags() {
        let msg = ChannelMessage::EventCallLogged {
            event_id: Uuid::new_v4(),
            entry: CallLog {
                contact_name: "Dispatch".to_string(),
                phone: "+15550100".to_string(),
                outcome: "reached".to_string(),
                note: String::new(),
                logged_at: chrono::Utc::now(),
            },
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "event.call_logged");
    }
}
