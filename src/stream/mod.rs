pub mod supervisor;
pub mod transcode;

#[cfg(test)]
mod tests;

pub use supervisor::{SessionState, StreamHandle, StreamStatus, StreamSupervisor};
