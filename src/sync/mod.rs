pub mod client;
pub mod engine;

pub use client::SyncClient;
pub use engine::{SyncEngine, SyncStatus};
