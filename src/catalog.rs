// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::feed::{Episode, FeedFetcher, parse_episodes};
use crate::http::HttpClient;

/// Ordered episode catalog backed by the upstream feed
pub struct EpisodeCatalog<C> {
    fetcher: Arc<FeedFetcher<C>>,
    placeholder_image: String,
}

impl<C: HttpClient> EpisodeCatalog<C> {
    pub fn new(fetcher: Arc<FeedFetcher<C>>, placeholder_image: impl Into<String>) -> Self {
        Self {
            fetcher,
            placeholder_image: placeholder_image.into(),
        }
    }

    /// Build a catalog with its own fetcher
    pub fn from_config(client: C, config: &FeedConfig) -> Self {
        Self::new(
            Arc::new(FeedFetcher::new(client, config)),
            config.placeholder_image.clone(),
        )
    }

    pub fn fetcher(&self) -> &FeedFetcher<C> {
        &self.fetcher
    }

    /// Fetch and normalize the feed, surfacing failures
    pub async fn try_fetch_episodes(&self) -> Result<Vec<Episode>, FeedError> {
        let body = self.fetcher.fetch().await?;
        parse_episodes(&body, &self.placeholder_image)
    }

    /// Fetch the catalog, newest first
    ///
    /// Never fails: any fetch or parse error is logged and replaced by the
    /// single-entry fallback catalog. A feed with no items is an empty list.
    pub async fn fetch_episodes(&self) -> Vec<Episode> {
        match self.try_fetch_episodes().await {
            Ok(episodes) => {
                tracing::info!(url = %self.fetcher.url(), count = episodes.len(), "loaded episode catalog");
                episodes
            }
            Err(e) => {
                tracing::warn!(url = %self.fetcher.url(), error = %e, "feed ingestion failed, serving fallback catalog");
                fallback_catalog(&self.placeholder_image)
            }
        }
    }
}

/// Placeholder catalog shown when the feed cannot be loaded
pub fn fallback_catalog(placeholder_image: &str) -> Vec<Episode> {
    vec![Episode {
        id: "fallback-1".to_string(),
        title: "Latest Episode".to_string(),
        description: "Check out our latest episode on your favorite podcast platform.".to_string(),
        duration: "45:00".to_string(),
        published_date: "Recent".to_string(),
        audio_url: String::new(),
        image_url: placeholder_image.to_string(),
        featured: true,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::config::CachePolicy;
    use crate::http::ReqwestClient;
    use crate::http::testing::StaticClient;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Test Podcast</title>
    <description>A test podcast</description>
    <item>
      <title>Episode 3</title>
      <guid>ep3</guid>
      <pubDate>Mon, 05 Feb 2024 10:00:00 +0000</pubDate>
      <enclosure url="https://example.com/ep3.mp3" type="audio/mpeg"/>
      <itunes:duration>59</itunes:duration>
    </item>
    <item>
      <title>Episode 2</title>
      <guid>ep2</guid>
      <enclosure url="https://example.com/ep2.mp3" type="audio/mpeg"/>
      <itunes:duration>125</itunes:duration>
    </item>
    <item>
      <title>Episode 1</title>
      <enclosure url="https://example.com/ep1.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    fn catalog(client: StaticClient) -> EpisodeCatalog<StaticClient> {
        let config = FeedConfig {
            feed_url: "https://feeds.example.com/show.rss".to_string(),
            cache: CachePolicy::disabled(),
            ..FeedConfig::default()
        };
        EpisodeCatalog::from_config(client, &config)
    }

    #[tokio::test]
    async fn returns_full_catalog_in_feed_order() {
        let episodes = catalog(StaticClient::new(200, SAMPLE_FEED))
            .fetch_episodes()
            .await;

        let ids: Vec<_> = episodes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["ep3", "ep2", "episode-2"]);
        assert_eq!(episodes[0].duration, "0:59");
        assert_eq!(episodes[1].duration, "2:05");
        assert_eq!(episodes.iter().filter(|e| e.featured).count(), 1);
        assert!(episodes[0].featured);
    }

    #[tokio::test]
    async fn every_entry_has_required_fields() {
        let episodes = catalog(StaticClient::new(200, SAMPLE_FEED))
            .fetch_episodes()
            .await;

        for episode in &episodes {
            assert!(!episode.id.is_empty());
            assert!(!episode.title.is_empty());
            assert!(!episode.duration.is_empty());
            assert!(!episode.published_date.is_empty());
        }
        assert_eq!(episodes[1].published_date, "Unknown Date");
    }

    #[tokio::test]
    async fn empty_successful_feed_is_empty_catalog() {
        let episodes = catalog(StaticClient::new(200, "")).fetch_episodes().await;
        assert!(episodes.is_empty());

        let no_items = r#"<rss version="2.0"><channel><title>T</title><description>D</description></channel></rss>"#;
        let episodes = catalog(StaticClient::new(200, no_items))
            .fetch_episodes()
            .await;
        assert!(episodes.is_empty());
    }

    #[tokio::test]
    async fn status_failure_yields_fallback() {
        let episodes = catalog(StaticClient::new(503, "")).fetch_episodes().await;

        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].id, "fallback-1");
        assert!(episodes[0].featured);
        assert!(episodes[0].audio_url.is_empty());
        assert_eq!(episodes[0].image_url, "/podcast-cover.png");
    }

    #[tokio::test]
    async fn unparsable_feed_yields_fallback() {
        let episodes = catalog(StaticClient::new(200, "<html>maintenance</html>"))
            .fetch_episodes()
            .await;

        assert_eq!(episodes, fallback_catalog("/podcast-cover.png"));
    }

    #[tokio::test]
    async fn timed_out_fetch_yields_fallback() {
        let client = StaticClient::new(200, SAMPLE_FEED).delayed(Duration::from_secs(5));
        let config = FeedConfig {
            feed_url: "https://feeds.example.com/show.rss".to_string(),
            timeout: Duration::from_millis(50),
            cache: CachePolicy::disabled(),
            ..FeedConfig::default()
        };
        let catalog = EpisodeCatalog::from_config(client, &config);

        assert!(matches!(
            catalog.try_fetch_episodes().await,
            Err(FeedError::Timeout { .. })
        ));
        assert_eq!(
            catalog.fetch_episodes().await,
            fallback_catalog("/podcast-cover.png")
        );
    }

    #[tokio::test]
    async fn transport_failure_yields_fallback() {
        let client = ReqwestClient::for_feeds("podstage-test", Duration::from_secs(2), true).unwrap();
        let config = FeedConfig {
            // Port 9 (discard) is closed on test machines
            feed_url: "http://127.0.0.1:9/feed.rss".to_string(),
            cache: CachePolicy::disabled(),
            ..FeedConfig::default()
        };
        let catalog = EpisodeCatalog::from_config(client, &config);

        assert!(matches!(
            catalog.try_fetch_episodes().await,
            Err(FeedError::Transport { .. })
        ));
        let episodes = catalog.fetch_episodes().await;
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].id, "fallback-1");
    }

    #[tokio::test]
    async fn try_fetch_surfaces_the_error() {
        let result = catalog(StaticClient::new(404, "")).try_fetch_episodes().await;
        assert!(matches!(result, Err(FeedError::HttpStatus { status: 404, .. })));
    }
}
