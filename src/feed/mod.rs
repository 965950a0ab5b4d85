mod fetch;
mod parse;
pub mod text;

pub use fetch::{FeedFetcher, fetch_feed_bytes};
pub use parse::{Episode, UNTITLED_EPISODE, parse_episodes};
