// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when fetching or parsing the upstream feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Redirect {status} from {url} carried no Location header")]
    MissingRedirectTarget { url: String, status: u16 },

    #[error("Invalid redirect target '{location}' from {url}: {source}")]
    InvalidRedirect {
        url: String,
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Feed at {url} redirected more than once")]
    TooManyRedirects { url: String },

    #[error("Timed out after {after:?} fetching {url}")]
    Timeout { url: String, after: Duration },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),
}

impl FeedError {
    /// Upstream HTTP status behind this error, if the failure was a status failure
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            FeedError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors surfaced by the playback engine and session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Episode '{title}' has no audio enclosure")]
    NoAudio { title: String },

    #[error("No audio resource is bound")]
    NoResource,

    #[error("Audio at {url} cannot be played inline: {reason}")]
    Unsupported { url: String, reason: String },

    #[error("Playback failed: {reason}")]
    Failed { reason: String },
}

impl PlaybackError {
    /// Message suitable for showing next to the player controls
    pub fn user_message(&self) -> &'static str {
        match self {
            PlaybackError::NoAudio { .. } => {
                "This episode has no audio available for inline playback."
            }
            PlaybackError::NoResource => "Select an episode to start listening.",
            PlaybackError::Unsupported { .. } => {
                "Failed to load audio. This episode may not be available for direct playback."
            }
            PlaybackError::Failed { .. } => {
                "Unable to play audio. Try opening the episode in your podcast app instead."
            }
        }
    }

    /// Whether the UI should offer opening the episode outside the player
    pub fn offers_external_open(&self) -> bool {
        !matches!(self, PlaybackError::NoResource)
    }
}
