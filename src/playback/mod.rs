#[cfg(feature = "audio")]
mod device;
mod engine;
mod session;
mod stream;
mod trigger;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "audio")]
pub use device::{DeviceBackend, DeviceOutput};
pub use engine::{
    AudioBackend, AudioResource, EngineEvent, EventSink, PlaybackEngine, ResourceEvent,
    ResourceToken,
};
pub use session::{PlaybackSession, SeekTarget, SessionOptions, TransportState};
pub use stream::{AudioOutput, PROGRESS_INTERVAL, StreamingBackend};
pub use trigger::{PlayTrigger, TriggerView};
