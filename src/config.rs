// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::SocketAddr;
use std::time::Duration;

use crate::http::DEFAULT_USER_AGENT;

pub const DEFAULT_FEED_URL: &str = "https://feeds.buzzsprout.com/2499350.rss";
pub const DEFAULT_PLACEHOLDER_IMAGE: &str = "/podcast-cover.png";

/// Revalidation window for the upstream feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// How long a fetched body is served without contacting the upstream
    pub max_age: Duration,
    /// How long past `max_age` a body may still be served if a refetch fails
    pub stale_while_revalidate: Duration,
}

impl CachePolicy {
    /// A policy that never serves cached bodies
    pub fn disabled() -> Self {
        Self {
            max_age: Duration::ZERO,
            stale_while_revalidate: Duration::ZERO,
        }
    }

    /// Value for the `Cache-Control` header on proxied feed responses
    pub fn cache_control_header(&self) -> String {
        format!(
            "public, s-maxage={}, stale-while-revalidate={}",
            self.max_age.as_secs(),
            self.stale_while_revalidate.as_secs()
        )
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3600),
            stale_while_revalidate: Duration::from_secs(7200),
        }
    }
}

/// Options for feed ingestion
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Upstream RSS feed URL
    pub feed_url: String,
    /// Upper bound on one feed fetch, redirect hop included
    pub timeout: Duration,
    pub user_agent: String,
    /// Let the HTTP client resolve redirects itself before the manual retry
    pub follow_redirects: bool,
    /// Artwork used when neither the item nor the channel provides one
    pub placeholder_image: String,
    pub cache: CachePolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            follow_redirects: true,
            placeholder_image: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
            cache: CachePolicy::default(),
        }
    }
}

/// Options for the HTTP surface
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}
