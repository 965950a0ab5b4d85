// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PlaybackError;

/// Identity of one bound audio resource
///
/// Every bind hands out a fresh token, so events carrying an older token
/// can be recognized as coming from a resource that is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceToken(u64);

/// Events an audio resource reports back while it is bound
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// Stream metadata is known
    MetadataReady { duration_seconds: f64 },

    /// Playback position advanced
    Progress { position_seconds: f64 },

    /// End of stream reached
    Ended,

    /// The resource could not be loaded
    LoadError { reason: String },
}

/// A resource event stamped with the token of the resource that emitted it
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub token: ResourceToken,
    pub event: ResourceEvent,
}

/// Handle a resource uses to report events
///
/// The token is fixed at bind time; a resource cannot speak for another.
#[derive(Debug, Clone)]
pub struct EventSink {
    token: ResourceToken,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    pub fn token(&self) -> ResourceToken {
        self.token
    }

    pub fn emit(&self, event: ResourceEvent) {
        // A closed channel means the session is gone; nobody is listening.
        let _ = self.tx.send(EngineEvent {
            token: self.token,
            event,
        });
    }
}

/// One loaded audio stream
#[async_trait]
pub trait AudioResource: Send {
    /// Start or resume playback; resolves once the output accepted it
    async fn play(&mut self) -> Result<(), PlaybackError>;

    fn pause(&mut self);

    fn set_position(&mut self, seconds: f64);

    fn set_volume(&mut self, volume: f32);

    fn set_muted(&mut self, muted: bool);

    /// Stop reporting events and free the underlying output
    fn release(&mut self);
}

/// Creates audio resources for episode URLs
pub trait AudioBackend: Send {
    fn open(
        &mut self,
        url: &str,
        events: EventSink,
    ) -> Result<Box<dyn AudioResource>, PlaybackError>;
}

struct BoundResource {
    token: ResourceToken,
    resource: Box<dyn AudioResource>,
}

/// Owns the single audio resource and forwards session intents to it
pub struct PlaybackEngine<B> {
    backend: B,
    bound: Option<BoundResource>,
    next_token: u64,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl<B> PlaybackEngine<B> {
    /// Pause and release the bound resource, if any
    pub fn teardown(&mut self) {
        if let Some(mut bound) = self.bound.take() {
            bound.resource.pause();
            bound.resource.release();
            tracing::debug!(token = ?bound.token, "released audio resource");
        }
    }
}

impl<B: AudioBackend> PlaybackEngine<B> {
    /// Create an engine and the receiving end of its event channel
    pub fn new(backend: B) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            backend,
            bound: None,
            next_token: 0,
            events: tx,
        };
        (engine, rx)
    }

    /// Bind a new resource for `url`, tearing down the previous one first
    pub fn bind(
        &mut self,
        url: &str,
        volume: f32,
        muted: bool,
    ) -> Result<ResourceToken, PlaybackError> {
        self.teardown();

        self.next_token += 1;
        let token = ResourceToken(self.next_token);
        let sink = EventSink {
            token,
            tx: self.events.clone(),
        };

        let mut resource = self.backend.open(url, sink)?;
        resource.set_volume(volume);
        resource.set_muted(muted);

        tracing::debug!(?token, url, "bound audio resource");
        self.bound = Some(BoundResource { token, resource });
        Ok(token)
    }

    pub fn current_token(&self) -> Option<ResourceToken> {
        self.bound.as_ref().map(|bound| bound.token)
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn is_current(&self, token: ResourceToken) -> bool {
        self.current_token() == Some(token)
    }

    pub async fn play(&mut self) -> Result<(), PlaybackError> {
        match self.bound.as_mut() {
            Some(bound) => bound.resource.play().await,
            None => Err(PlaybackError::NoResource),
        }
    }

    pub fn pause(&mut self) {
        if let Some(bound) = self.bound.as_mut() {
            bound.resource.pause();
        }
    }

    pub fn seek(&mut self, seconds: f64) {
        if let Some(bound) = self.bound.as_mut() {
            bound.resource.set_position(seconds);
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        if let Some(bound) = self.bound.as_mut() {
            bound.resource.set_volume(volume);
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        if let Some(bound) = self.bound.as_mut() {
            bound.resource.set_muted(muted);
        }
    }
}

impl<B> Drop for PlaybackEngine<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
