// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::{DEFAULT_FEED_URL, FeedConfig};
use crate::error::PlaybackError;
use crate::feed::Episode;
use crate::feed::text::format_seconds;

use super::engine::{AudioBackend, EngineEvent, PlaybackEngine, ResourceEvent};

/// Transport state of the current episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
    Errored,
}

/// Where to move the playhead
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekTarget {
    /// Fraction of the known duration, 0.0 to 1.0
    Fraction(f64),
    Seconds(f64),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Offered for external listening when an episode has no audio of its own
    ///
    /// Defaults to the show's feed, which any podcast app can subscribe to.
    /// `None` hides the external-open action for such episodes.
    pub listen_elsewhere_url: Option<String>,
    pub initial_volume: f32,
}

impl SessionOptions {
    /// Options pointing listeners at the configured feed
    pub fn for_feed(config: &FeedConfig) -> Self {
        Self {
            listen_elsewhere_url: Some(config.feed_url.clone()),
            ..Self::default()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            listen_elsewhere_url: Some(DEFAULT_FEED_URL.to_string()),
            initial_volume: 1.0,
        }
    }
}

/// The single shared playback session
///
/// At most one episode is current. All transport changes go through the
/// methods here; resource events are applied through [`handle_event`],
/// which drops anything emitted by a resource that is no longer bound.
///
/// [`handle_event`]: PlaybackSession::handle_event
pub struct PlaybackSession<B> {
    engine: PlaybackEngine<B>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    options: SessionOptions,
    current_episode: Option<Episode>,
    transport_state: TransportState,
    is_open: bool,
    is_minimized: bool,
    volume: f32,
    muted: bool,
    position_seconds: f64,
    duration_seconds: Option<f64>,
    error: Option<PlaybackError>,
}

impl<B: AudioBackend> PlaybackSession<B> {
    pub fn new(backend: B, options: SessionOptions) -> Self {
        let (engine, events) = PlaybackEngine::new(backend);
        let volume = options.initial_volume.clamp(0.0, 1.0);
        Self {
            engine,
            events,
            options,
            current_episode: None,
            transport_state: TransportState::Idle,
            is_open: false,
            is_minimized: false,
            volume,
            muted: false,
            position_seconds: 0.0,
            duration_seconds: None,
            error: None,
        }
    }

    /// Make `episode` current, replacing whatever was bound before
    ///
    /// An episode without audio still becomes current so the player can
    /// offer listening elsewhere, but no resource is bound for it.
    pub fn select_episode(&mut self, episode: Episode) {
        self.engine.teardown();

        tracing::info!(id = %episode.id, title = %episode.title, "selecting episode");
        self.is_open = true;
        self.is_minimized = false;
        self.position_seconds = 0.0;
        self.duration_seconds = None;
        self.error = None;
        self.transport_state = TransportState::Loading;

        if !episode.has_audio() {
            let error = PlaybackError::NoAudio {
                title: episode.title.clone(),
            };
            self.current_episode = Some(episode);
            self.fail(error);
            return;
        }

        let bound = self
            .engine
            .bind(&episode.audio_url, self.volume, self.muted);
        self.current_episode = Some(episode);
        if let Err(e) = bound {
            self.fail(e);
        }
    }

    /// Start or resume playback of the current episode
    ///
    /// From `Errored` the current episode is reloaded first. Already playing
    /// is a no-op.
    pub async fn play(&mut self) -> Result<(), PlaybackError> {
        if self.transport_state == TransportState::Errored {
            self.retry();
        }

        if self.transport_state == TransportState::Playing {
            return Ok(());
        }

        if !self.engine.is_bound() {
            return Err(self.error.clone().unwrap_or(PlaybackError::NoResource));
        }

        if self.transport_state == TransportState::Ended {
            self.engine.seek(self.position_seconds);
        }

        match self.engine.play().await {
            Ok(()) => {
                self.transport_state = TransportState::Playing;
                self.error = None;
                Ok(())
            }
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    /// Pause if playing; otherwise nothing happens
    pub fn pause(&mut self) {
        if self.transport_state == TransportState::Playing {
            self.engine.pause();
            self.transport_state = TransportState::Paused;
        }
    }

    /// Pause when playing, play otherwise
    pub async fn toggle(&mut self) -> Result<(), PlaybackError> {
        if self.transport_state == TransportState::Playing {
            self.pause();
            Ok(())
        } else {
            self.play().await
        }
    }

    /// Move the playhead, clamped into the known duration
    ///
    /// Returns the applied position, or `None` while the duration is unknown.
    pub fn seek(&mut self, target: SeekTarget) -> Option<f64> {
        let duration = self.duration_seconds?;
        let requested = match target {
            SeekTarget::Fraction(fraction) => fraction * duration,
            SeekTarget::Seconds(seconds) => seconds,
        };
        let position = if requested.is_nan() {
            0.0
        } else {
            requested.clamp(0.0, duration)
        };

        self.engine.seek(position);
        self.position_seconds = position;
        Some(position)
    }

    /// Set the volume (clamped to 0.0..=1.0); changing volume unmutes
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.muted = false;
        self.engine.set_volume(self.volume);
        self.engine.set_muted(false);
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
        self.engine.set_muted(self.muted);
    }

    /// Release the resource and return to an empty, idle session
    pub fn close(&mut self) {
        self.engine.teardown();
        if let Some(episode) = self.current_episode.take() {
            tracing::info!(id = %episode.id, "closing player");
        }
        self.transport_state = TransportState::Idle;
        self.is_open = false;
        self.is_minimized = false;
        self.position_seconds = 0.0;
        self.duration_seconds = None;
        self.error = None;
    }

    pub fn toggle_minimize(&mut self) {
        self.is_minimized = !self.is_minimized;
    }

    /// Apply one resource event
    ///
    /// Returns false when the event came from a resource that is no longer
    /// bound and was discarded.
    pub fn handle_event(&mut self, event: EngineEvent) -> bool {
        if !self.engine.is_current(event.token) {
            tracing::debug!(token = ?event.token, event = ?event.event, "discarding stale resource event");
            return false;
        }

        match event.event {
            ResourceEvent::MetadataReady { duration_seconds } => {
                if duration_seconds.is_finite() && duration_seconds > 0.0 {
                    self.duration_seconds = Some(duration_seconds);
                }
                if self.transport_state == TransportState::Loading {
                    self.transport_state = TransportState::Paused;
                }
            }
            ResourceEvent::Progress { position_seconds } => {
                if position_seconds.is_finite() {
                    let ceiling = self.duration_seconds.unwrap_or(f64::MAX);
                    self.position_seconds = position_seconds.clamp(0.0, ceiling);
                }
            }
            ResourceEvent::Ended => {
                self.transport_state = TransportState::Ended;
                self.position_seconds = 0.0;
            }
            ResourceEvent::LoadError { reason } => {
                let url = self
                    .current_episode
                    .as_ref()
                    .map(|episode| episode.audio_url.clone())
                    .unwrap_or_default();
                self.fail(PlaybackError::Unsupported { url, reason });
            }
        }
        true
    }

    /// Apply every event already queued, returning how many were applied
    pub fn process_pending_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            if self.handle_event(event) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next resource event
    ///
    /// Pending forever while nothing is bound; meant for a `select!` loop
    /// that feeds the result into [`handle_event`](Self::handle_event).
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }

    fn retry(&mut self) {
        if let Some(episode) = self.current_episode.clone() {
            tracing::debug!(id = %episode.id, "retrying errored episode");
            self.select_episode(episode);
        }
    }

    fn fail(&mut self, error: PlaybackError) {
        tracing::warn!(error = %error, "playback failed");
        self.transport_state = TransportState::Errored;
        self.error = Some(error);
    }
}

impl<B> PlaybackSession<B> {
    pub fn current_episode(&self) -> Option<&Episode> {
        self.current_episode.as_ref()
    }

    /// Whether `episode_id` is the current episode
    pub fn is_current(&self, episode_id: &str) -> bool {
        self.current_episode
            .as_ref()
            .is_some_and(|episode| episode.id == episode_id)
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport_state
    }

    pub fn is_playing(&self) -> bool {
        self.transport_state == TransportState::Playing
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn is_minimized(&self) -> bool {
        self.is_minimized
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn position_seconds(&self) -> f64 {
        self.position_seconds
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_seconds
    }

    /// User-facing message for the last failure
    pub fn error(&self) -> Option<&'static str> {
        self.error.as_ref().map(PlaybackError::user_message)
    }

    pub fn last_error(&self) -> Option<&PlaybackError> {
        self.error.as_ref()
    }

    /// Link for listening outside the player, offered only after a failure
    pub fn external_url(&self) -> Option<&str> {
        if self.transport_state != TransportState::Errored {
            return None;
        }
        if !self.error.as_ref().is_some_and(PlaybackError::offers_external_open) {
            return None;
        }

        let episode = self.current_episode.as_ref()?;
        if episode.has_audio() {
            Some(&episode.audio_url)
        } else {
            self.options.listen_elsewhere_url.as_deref()
        }
    }

    /// Elapsed time as `minutes:seconds`
    pub fn position_label(&self) -> String {
        format_seconds(self.position_seconds as u64)
    }

    /// Total time as `minutes:seconds`, the feed's figure until metadata loads
    pub fn duration_label(&self) -> String {
        match (self.duration_seconds, self.current_episode.as_ref()) {
            (Some(seconds), _) => format_seconds(seconds as u64),
            (None, Some(episode)) => episode.duration.clone(),
            (None, None) => format_seconds(0),
        }
    }
}
