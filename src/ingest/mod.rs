pub mod mime;
pub mod smtp;


pub use smtp::SmtpServer;

use crate::db::models::camera_models::Camera;
use crate::db::models::event_models::Event;
use crate::db::repositories::accounts::TemplateSource;
use crate::db::repositories::events::EventStore;
use crate::hub::{BroadcastHub, ChannelMessage};
use crate::media::MediaStore;
use crate::workflow::WorkflowEngine;
use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Turns one accepted camera message into exactly one durable event:
/// attachments land in the media store in order, the event row is written,
/// the workflow engine binds a fresh plan state, and the account channel
/// gets `event.created`. A message with zero usable attachments still
/// creates its event; the alarm signal itself is the important fact.
pub struct IngestPipeline {
    events: Arc<dyn EventStore>,
    templates: Arc<dyn TemplateSource>,
    media: MediaStore,
    engine: Arc<WorkflowEngine>,
    hub: Arc<BroadcastHub>,
    max_attachment_bytes: usize,
}

impl IngestPipeline {
    pub fn new(
        events: Arc<dyn EventStore>,
        templates: Arc<dyn TemplateSource>,
        media: MediaStore,
        engine: Arc<WorkflowEngine>,
        hub: Arc<BroadcastHub>,
        max_attachment_bytes: usize,
    ) -> Self {
        Self {
            events,
            templates,
            media,
            engine,
            hub,
            max_attachment_bytes,
        }
    }

    /// Ingest one raw message for a resolved camera
    pub async fn ingest(&self, camera: &Camera, raw: &[u8]) -> Result<Event> {
        let attachments = mime::extract_attachments(raw);
        let event_id = Uuid::new_v4();

        let mut media_paths = Vec::new();
        for attachment in &attachments {
            if attachment.data.len() > self.max_attachment_bytes {
                warn!(
                    "Skipping oversized attachment {} ({} bytes) from camera {}",
                    attachment.filename,
                    attachment.data.len(),
                    camera.id
                );
                continue;
            }

            let path = self
                .media
                .save_attachment(
                    &event_id,
                    media_paths.len(),
                    &attachment.filename,
                    &attachment.data,
                )
                .await?;
            media_paths.push(path);
        }

        let mut event = Event::new(camera.id, camera.account_id, media_paths);
        event.id = event_id;

        self.events.insert(&event).await?;

        // Plan binding and broadcast both happen for every accepted message.
        let template = match self.templates.action_plan(&camera.account_id).await {
            Ok(template) => template,
            Err(e) => {
                warn!(
                    "No usable action plan for account {}: {}",
                    camera.account_id, e
                );
                None
            }
        };
        self.engine.initialize(&event, template).await;

        self.hub
            .publish(
                &camera.account_id,
                ChannelMessage::EventCreated {
                    event: event.clone(),
                },
            )
            .await;

        info!(
            "Created event {} for camera {} ({} attachments)",
            event.id,
            camera.id,
            event.media_paths.len()
        );

        Ok(event)
    }
}
