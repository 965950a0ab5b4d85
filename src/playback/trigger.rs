// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::PlaybackError;
use crate::feed::Episode;

use super::engine::AudioBackend;
use super::session::{PlaybackSession, TransportState};

/// What a play control needs to render itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerView {
    /// This control's episode is the session's current one
    pub is_current: bool,
    pub is_playing: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Link to listen outside the player, when playback failed
    pub external_url: Option<String>,
}

/// A play control bound to one episode
///
/// Any number of triggers may reference the same episode; they all go
/// through the session, so they agree on what is playing.
#[derive(Debug, Clone)]
pub struct PlayTrigger {
    episode: Episode,
}

impl PlayTrigger {
    pub fn new(episode: Episode) -> Self {
        Self { episode }
    }

    pub fn episode(&self) -> &Episode {
        &self.episode
    }

    /// Handle a press: select this episode if needed, then toggle playback
    pub async fn activate<B: AudioBackend>(
        &self,
        session: &mut PlaybackSession<B>,
    ) -> Result<(), PlaybackError> {
        if !session.is_current(&self.episode.id) {
            session.select_episode(self.episode.clone());
        }
        session.toggle().await
    }

    pub fn view<B>(&self, session: &PlaybackSession<B>) -> TriggerView {
        if !session.is_current(&self.episode.id) {
            return TriggerView {
                is_current: false,
                is_playing: false,
                is_loading: false,
                error: None,
                external_url: None,
            };
        }

        TriggerView {
            is_current: true,
            is_playing: session.is_playing(),
            is_loading: session.transport_state() == TransportState::Loading,
            error: session.error().map(String::from),
            external_url: session.external_url().map(String::from),
        }
    }
}
