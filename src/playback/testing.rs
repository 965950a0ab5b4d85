// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory audio backend for playback tests.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::PlaybackError;

use super::engine::{AudioBackend, AudioResource, EventSink, ResourceToken};

#[derive(Default)]
struct MockLog {
    opened: Vec<String>,
    sinks: Vec<EventSink>,
    released: Vec<ResourceToken>,
    active: usize,
    max_active: usize,
    playing: bool,
    position: f64,
    volume: f32,
    muted: bool,
    play_calls: usize,
    refuse_open: Option<String>,
    reject_play: Option<PlaybackError>,
}

/// Backend whose resources record every call in a shared log
#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    log: Arc<Mutex<MockLog>>,
}

impl MockBackend {
    fn log(&self) -> MutexGuard<'_, MockLog> {
        self.log.lock().unwrap()
    }

    /// Make every following `open` fail as unsupported
    pub(crate) fn refuse_open(&self, reason: &str) {
        self.log().refuse_open = Some(reason.to_string());
    }

    /// Make every following `play` fail with `error`
    pub(crate) fn reject_play(&self, error: PlaybackError) {
        self.log().reject_play = Some(error);
    }

    pub(crate) fn accept_play(&self) {
        self.log().reject_play = None;
    }

    /// Event sink handed to the n-th opened resource
    pub(crate) fn sink(&self, n: usize) -> EventSink {
        self.log().sinks[n].clone()
    }

    pub(crate) fn opened(&self) -> Vec<String> {
        self.log().opened.clone()
    }

    pub(crate) fn released(&self) -> Vec<ResourceToken> {
        self.log().released.clone()
    }

    pub(crate) fn active(&self) -> usize {
        self.log().active
    }

    pub(crate) fn max_active(&self) -> usize {
        self.log().max_active
    }

    pub(crate) fn playing(&self) -> bool {
        self.log().playing
    }

    pub(crate) fn position(&self) -> f64 {
        self.log().position
    }

    pub(crate) fn volume(&self) -> f32 {
        self.log().volume
    }

    pub(crate) fn muted(&self) -> bool {
        self.log().muted
    }

    pub(crate) fn play_calls(&self) -> usize {
        self.log().play_calls
    }
}

impl AudioBackend for MockBackend {
    fn open(
        &mut self,
        url: &str,
        events: EventSink,
    ) -> Result<Box<dyn AudioResource>, PlaybackError> {
        let mut log = self.log();
        if let Some(reason) = log.refuse_open.clone() {
            return Err(PlaybackError::Unsupported {
                url: url.to_string(),
                reason,
            });
        }

        log.opened.push(url.to_string());
        log.active += 1;
        log.max_active = log.max_active.max(log.active);
        log.playing = false;
        log.position = 0.0;
        let token = events.token();
        log.sinks.push(events);

        Ok(Box::new(MockResource {
            token,
            log: Arc::clone(&self.log),
            released: false,
        }))
    }
}

struct MockResource {
    token: ResourceToken,
    log: Arc<Mutex<MockLog>>,
    released: bool,
}

impl MockResource {
    fn log(&self) -> MutexGuard<'_, MockLog> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl AudioResource for MockResource {
    async fn play(&mut self) -> Result<(), PlaybackError> {
        let mut log = self.log();
        log.play_calls += 1;
        match log.reject_play.clone() {
            Some(error) => Err(error),
            None => {
                log.playing = true;
                Ok(())
            }
        }
    }

    fn pause(&mut self) {
        self.log().playing = false;
    }

    fn set_position(&mut self, seconds: f64) {
        self.log().position = seconds;
    }

    fn set_volume(&mut self, volume: f32) {
        self.log().volume = volume;
    }

    fn set_muted(&mut self, muted: bool) {
        self.log().muted = muted;
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let token = self.token;
        let mut log = self.log();
        log.active -= 1;
        log.released.push(token);
    }
}
