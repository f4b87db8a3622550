pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod media;
pub mod stream;
pub mod workflow;

pub use error::Error;

// Re-export main components for easier use
pub use hub::{BroadcastHub, ChannelMessage};
pub use ingest::{IngestPipeline, SmtpServer};
pub use media::MediaStore;
pub use stream::{StreamHandle, StreamStatus, StreamSupervisor};
pub use workflow::WorkflowEngine;
