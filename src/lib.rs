//! feedsync - real-time market-data synchronization client
//!
//! Keeps a consumer's view of an option-chain / OHLC feed consistent with the server:
//! - WebSocket session supervision with exponential backoff + jitter
//! - JSON / MessagePack frame codec
//! - At-most-one subscription per client with idempotent re-subscription
//! - REST polling fallback, mutually exclusive with a healthy stream
//!
//! The application depends on [`SyncClient`] only; everything below it is exported
//! for tests and for embedding the synchronous [`SyncEngine`] in other runtimes.

pub mod config;
pub mod effect;
pub mod error;
pub mod metrics;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod subscription;
pub mod sync;
pub mod transport;

pub use config::{FeedKind, SyncConfig};
pub use effect::Effect;
pub use error::{DecodeError, SyncError};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use poller::{FallbackPoller, RestSnapshotFetcher, SnapshotFetcher};
pub use protocol::{ClientMessage, Envelope, Frame, WireFormat};
pub use session::{ConnectionQuality, ConnectionState, ConnectionSupervisor, ReconnectPolicy};
pub use subscription::{SubscriptionCoordinator, SubscriptionKey};
pub use sync::{SyncClient, SyncEngine, SyncStatus};
pub use transport::{Transport, TransportEvent, TransportLink, WsTransport};
