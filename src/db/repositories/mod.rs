pub mod accounts;
pub mod cameras;
pub mod events;
