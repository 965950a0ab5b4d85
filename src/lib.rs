pub mod catalog;
pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod playback;
pub mod server;

// Re-export main types for convenience
pub use catalog::{EpisodeCatalog, fallback_catalog};
pub use config::{CachePolicy, FeedConfig, ServerConfig};
pub use error::{FeedError, PlaybackError};
pub use feed::{Episode, FeedFetcher, fetch_feed_bytes, parse_episodes};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
#[cfg(feature = "audio")]
pub use playback::{DeviceBackend, DeviceOutput};
pub use playback::{
    AudioBackend, AudioOutput, AudioResource, EngineEvent, EventSink, PlayTrigger,
    PlaybackSession, ResourceEvent, ResourceToken, SeekTarget, SessionOptions, StreamingBackend,
    TransportState, TriggerView,
};
