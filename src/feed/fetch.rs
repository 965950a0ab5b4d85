// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use url::{ParseError, Url};

use crate::config::{CachePolicy, FeedConfig};
use crate::error::FeedError;
use crate::http::{HttpClient, HttpResponse};

struct CachedFeed {
    body: Bytes,
    fetched_at: Instant,
}

/// Fetches the raw upstream feed, resolving one redirect and caching the
/// body for a single revalidation window
pub struct FeedFetcher<C> {
    client: C,
    url: String,
    timeout: Duration,
    policy: CachePolicy,
    cache: Mutex<Option<CachedFeed>>,
    // Held across a refetch so concurrent misses share one upstream request
    refresh: tokio::sync::Mutex<()>,
}

impl<C: HttpClient> FeedFetcher<C> {
    pub fn new(client: C, config: &FeedConfig) -> Self {
        Self {
            client,
            url: config.feed_url.clone(),
            timeout: config.timeout,
            policy: config.cache,
            cache: Mutex::new(None),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cache_policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Return the feed body, from cache while it is fresh
    ///
    /// When the upstream fails and a cached body is still inside the stale
    /// window, that body is served instead of the error.
    pub async fn fetch(&self) -> Result<Bytes, FeedError> {
        if let Some(body) = self.cached(self.policy.max_age) {
            tracing::debug!(url = %self.url, "serving cached feed");
            return Ok(body);
        }

        let _refresh = self.refresh.lock().await;
        if let Some(body) = self.cached(self.policy.max_age) {
            tracing::debug!(url = %self.url, "feed refreshed by a concurrent request");
            return Ok(body);
        }

        match fetch_feed_bytes(&self.client, &self.url, self.timeout).await {
            Ok(body) => {
                self.store(body.clone());
                Ok(body)
            }
            Err(e) => {
                let stale_limit = self.policy.max_age + self.policy.stale_while_revalidate;
                match self.cached(stale_limit) {
                    Some(body) => {
                        tracing::warn!(url = %self.url, error = %e, "upstream feed failed, serving stale copy");
                        Ok(body)
                    }
                    None => Err(e),
                }
            }
        }
    }

    fn cached(&self, max_age: Duration) -> Option<Bytes> {
        let cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cache
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < max_age)
            .map(|entry| entry.body.clone())
    }

    fn store(&self, body: Bytes) {
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *cache = Some(CachedFeed {
            body,
            fetched_at: Instant::now(),
        });
    }
}

/// Fetch raw feed bytes from a URL (without parsing)
///
/// A redirect status is resolved against its `Location` and retried once.
/// `timeout` bounds the whole exchange, redirect hop included.
pub async fn fetch_feed_bytes<C: HttpClient>(
    client: &C,
    url: &str,
    timeout: Duration,
) -> Result<Bytes, FeedError> {
    tokio::time::timeout(timeout, fetch_following_redirect(client, url))
        .await
        .map_err(|_| FeedError::Timeout {
            url: url.to_string(),
            after: timeout,
        })?
}

async fn fetch_following_redirect<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FeedError> {
    let response = get(client, url).await?;
    if !response.is_redirect() {
        return accept(url, response);
    }

    let target = redirect_target(url, &response)?;
    tracing::debug!(from = %url, to = %target, status = response.status, "following feed redirect");

    let retried = get(client, target.as_str()).await?;
    if retried.is_redirect() {
        return Err(FeedError::TooManyRedirects {
            url: url.to_string(),
        });
    }
    accept(target.as_str(), retried)
}

async fn get<C: HttpClient>(client: &C, url: &str) -> Result<HttpResponse, FeedError> {
    client.get(url).await.map_err(|e| FeedError::Transport {
        url: url.to_string(),
        source: e,
    })
}

fn accept(url: &str, response: HttpResponse) -> Result<Bytes, FeedError> {
    if response.is_success() {
        Ok(response.body)
    } else {
        Err(FeedError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        })
    }
}

fn redirect_target(url: &str, response: &HttpResponse) -> Result<Url, FeedError> {
    let location = response
        .location
        .as_deref()
        .ok_or_else(|| FeedError::MissingRedirectTarget {
            url: url.to_string(),
            status: response.status,
        })?;

    let invalid = |source: ParseError| FeedError::InvalidRedirect {
        url: url.to_string(),
        location: location.to_string(),
        source,
    };

    // Relative locations resolve against the request URL
    Url::parse(url)
        .and_then(|base| base.join(location))
        .map_err(invalid)
}
