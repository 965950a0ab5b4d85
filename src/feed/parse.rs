// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::FeedError;

use super::text::{
    format_pub_date, normalize_duration, sanitize_text, truncate_description,
};

pub const UNTITLED_EPISODE: &str = "Untitled Episode";

// The five entities XML defines; anything else needs a DTD the feed lacks
const XML_ENTITIES: [&str; 5] = ["amp;", "lt;", "gt;", "quot;", "apos;"];

static AMPERSAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+;|#[xX][0-9a-fA-F]+;|[A-Za-z][A-Za-z0-9]*;)?")
        .expect("ampersand pattern is valid")
});

static ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<item[\s>].*?</item>").expect("item pattern is valid"));

static RSS_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<rss\b[^>]*>").expect("rss root pattern is valid"));

/// A normalized podcast episode, ready for display and playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub title: String,
    pub description: String,
    /// `minutes:seconds`, or the feed's own textual form
    pub duration: String,
    /// `Mon D, YYYY`, or a sentinel when the feed gave no usable date
    pub published_date: String,
    /// Empty when the item has no enclosure
    pub audio_url: String,
    pub image_url: String,
    pub featured: bool,
}

impl Episode {
    /// Whether the episode can be played inline
    pub fn has_audio(&self) -> bool {
        !self.audio_url.is_empty()
    }
}

/// Parse RSS feed XML bytes into episodes, in feed order
///
/// A body with no content yields no episodes rather than an error. Missing
/// item fields fall back to defaults. Stray ampersands and HTML-only
/// entities are escaped before parsing; if the document is still rejected,
/// each `<item>` is parsed on its own and only the items that cannot be
/// read are skipped. The document is an error only when no item survives.
pub fn parse_episodes(xml_bytes: &[u8], placeholder_image: &str) -> Result<Vec<Episode>, FeedError> {
    if xml_bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let repaired = escape_stray_ampersands(xml_bytes);

    let (items, channel_image) = match rss::Channel::read_from(&repaired[..]) {
        Ok(channel) => {
            let image = channel_artwork(&channel, placeholder_image);
            (channel.into_items(), image)
        }
        Err(e) => {
            let items = salvage_items(&repaired);
            if items.is_empty() {
                return Err(e.into());
            }
            tracing::warn!(error = %e, salvaged = items.len(), "feed document rejected, parsed items individually");
            (items, placeholder_image.to_string())
        }
    };

    let mut seen_ids = HashSet::new();
    let episodes = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let mut episode = parse_episode(item, index, &channel_image);
            if !seen_ids.insert(episode.id.clone()) {
                episode.id = format!("{}-{index}", episode.id);
                seen_ids.insert(episode.id.clone());
            }
            episode
        })
        .collect();

    Ok(episodes)
}

fn channel_artwork(channel: &rss::Channel, placeholder_image: &str) -> String {
    channel
        .itunes_ext()
        .and_then(|ext| ext.image())
        .or_else(|| channel.image().map(|img| img.url()))
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(placeholder_image)
        .to_string()
}

/// Escape `&` that does not start an XML reference, outside CDATA sections
///
/// Bodies that are not UTF-8 are returned untouched.
fn escape_stray_ampersands(xml_bytes: &[u8]) -> Cow<'_, [u8]> {
    let Ok(xml) = std::str::from_utf8(xml_bytes) else {
        return Cow::Borrowed(xml_bytes);
    };
    if !xml.contains('&') {
        return Cow::Borrowed(xml_bytes);
    }

    let mut repaired = String::with_capacity(xml.len());
    let mut rest = xml;
    while let Some(start) = rest.find("<![CDATA[") {
        repaired.push_str(&escape_references(&rest[..start]));
        let end = rest[start..]
            .find("]]>")
            .map_or(rest.len(), |end| start + end + "]]>".len());
        repaired.push_str(&rest[start..end]);
        rest = &rest[end..];
    }
    repaired.push_str(&escape_references(rest));

    Cow::Owned(repaired.into_bytes())
}

fn escape_references(text: &str) -> Cow<'_, str> {
    AMPERSAND.replace_all(text, |caps: &Captures| match caps.get(1).map(|m| m.as_str()) {
        Some(reference) if reference.starts_with('#') || XML_ENTITIES.contains(&reference) => {
            caps[0].to_string()
        }
        Some(reference) => format!("&amp;{reference}"),
        None => "&amp;".to_string(),
    })
}

/// Parse every `<item>` block as a feed of its own
fn salvage_items(xml_bytes: &[u8]) -> Vec<rss::Item> {
    let Ok(xml) = std::str::from_utf8(xml_bytes) else {
        return Vec::new();
    };
    let root = RSS_ROOT
        .find(xml)
        .map_or(r#"<rss version="2.0">"#, |m| m.as_str());

    ITEM.find_iter(xml)
        .enumerate()
        .filter_map(|(index, item)| {
            let document = format!("{root}<channel>{}</channel></rss>", item.as_str());
            match rss::Channel::read_from(document.as_bytes()) {
                Ok(channel) => channel.into_items().into_iter().next(),
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping unreadable feed item");
                    None
                }
            }
        })
        .collect()
}

fn parse_episode(item: &rss::Item, index: usize, fallback_image: &str) -> Episode {
    let itunes = item.itunes_ext();

    let title = item
        .title()
        .map(sanitize_text)
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| UNTITLED_EPISODE.to_string());

    let description = item
        .description()
        .or_else(|| itunes.and_then(|ext| ext.summary()))
        .map(sanitize_text)
        .map(|text| truncate_description(&text))
        .unwrap_or_default();

    let id = item
        .guid()
        .map(|guid| guid.value().trim())
        .filter(|guid| !guid.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("episode-{index}"));

    let audio_url = item
        .enclosure()
        .map(|enclosure| enclosure.url().trim().to_string())
        .unwrap_or_default();

    let image_url = itunes
        .and_then(|ext| ext.image())
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(fallback_image)
        .to_string();

    Episode {
        id,
        title,
        description,
        duration: normalize_duration(itunes.and_then(|ext| ext.duration())),
        published_date: format_pub_date(item.pub_date()),
        audio_url,
        image_url,
        featured: index == 0,
    }
}
