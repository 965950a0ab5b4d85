// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use podstage::{
    CachePolicy, Episode, EpisodeCatalog, FeedConfig, ReqwestClient, ServerConfig,
    config::{DEFAULT_FEED_URL, DEFAULT_PLACEHOLDER_IMAGE},
    http::DEFAULT_USER_AGENT,
    server,
};

/// Serve a podcast's episode catalog
#[derive(Parser, Debug)]
#[command(name = "podstage")]
#[command(about = "Serve and inspect a podcast's episode catalog")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    feed: FeedArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct FeedArgs {
    /// Upstream RSS feed URL
    #[arg(long, global = true, default_value = DEFAULT_FEED_URL)]
    feed_url: String,

    /// Upstream request timeout in seconds
    #[arg(long, global = true, default_value = "10")]
    timeout: u64,

    /// Seconds a fetched feed is served without revalidation
    #[arg(long, global = true, default_value = "3600")]
    max_age: u64,

    /// Seconds past max-age a cached feed may cover upstream failures
    #[arg(long, global = true, default_value = "7200")]
    stale_while_revalidate: u64,

    /// Artwork used when the feed has none
    #[arg(long, global = true, default_value = DEFAULT_PLACEHOLDER_IMAGE)]
    placeholder_image: String,

    /// Hand redirects back to podstage instead of letting the client follow them
    #[arg(long, global = true)]
    manual_redirects: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
    },

    /// Print the episode catalog
    Episodes {
        /// Maximum number of episodes to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Play one episode through the default audio device
    #[cfg(feature = "audio")]
    Play {
        /// Episode id; the featured episode when omitted
        episode: Option<String>,

        /// Link offered when the episode cannot be played here (defaults to the feed)
        #[arg(long)]
        listen_url: Option<String>,
    },
}

impl FeedArgs {
    fn to_config(&self) -> FeedConfig {
        FeedConfig {
            feed_url: self.feed_url.clone(),
            timeout: Duration::from_secs(self.timeout),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            follow_redirects: !self.manual_redirects,
            placeholder_image: self.placeholder_image.clone(),
            cache: CachePolicy {
                max_age: Duration::from_secs(self.max_age),
                stale_while_revalidate: Duration::from_secs(self.stale_while_revalidate),
            },
        }
    }
}

fn print_episode(episode: &Episode) {
    let badge = if episode.featured {
        format!(" {}", "[featured]".red().bold())
    } else {
        String::new()
    };

    println!("{}{}", episode.title.bold(), badge);
    println!(
        "  {} • {}",
        episode.published_date.dimmed(),
        episode.duration.cyan()
    );
    if !episode.description.is_empty() {
        println!("  {}", episode.description);
    }
    if episode.has_audio() {
        println!("  {}", episode.audio_url.blue());
    } else {
        println!("  {}", "no audio available".yellow());
    }
    println!();
}

#[cfg(feature = "audio")]
async fn play_episode(
    episode: Episode,
    config: &FeedConfig,
    listen_url: Option<String>,
) -> Result<()> {
    use std::io::Write;

    use podstage::{DeviceBackend, PlayTrigger, PlaybackSession, SessionOptions, TransportState};

    let mut options = SessionOptions::for_feed(config);
    if listen_url.is_some() {
        options.listen_elsewhere_url = listen_url;
    }
    let backend = DeviceBackend::default_device(ReqwestClient::new());
    let mut session = PlaybackSession::new(backend, options);
    let trigger = PlayTrigger::new(episode);

    println!("{} {}", "Loading".dimmed(), trigger.episode().title.bold());
    let started = trigger.activate(&mut session).await;

    let mut shown_second = None;
    while started.is_ok() {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else { break };
                session.handle_event(event);
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }

        match session.transport_state() {
            TransportState::Ended => {
                println!("\n{}", "Finished".green());
                break;
            }
            TransportState::Errored => break,
            _ => {}
        }

        let second = session.position_seconds() as u64;
        if shown_second != Some(second) {
            shown_second = Some(second);
            print!(
                "\r  {} / {}",
                session.position_label(),
                session.duration_label()
            );
            std::io::stdout().flush().context("Failed to write progress")?;
        }
    }

    if let Some(message) = session.error() {
        println!("{} {}", "Playback failed:".red().bold(), message);
        if let Some(url) = session.external_url() {
            println!("  Listen elsewhere: {}", url.blue());
        }
    }
    session.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.feed.to_config();

    let client =
        ReqwestClient::for_feeds(&config.user_agent, config.timeout, config.follow_redirects)
            .context("Failed to build HTTP client")?;
    let catalog = Arc::new(EpisodeCatalog::from_config(client, &config));

    match cli.command {
        Command::Serve { bind } => {
            let server_config = ServerConfig {
                bind_address: bind,
            };
            server::serve(catalog, &server_config)
                .await
                .with_context(|| format!("Failed to serve on {bind}"))?;
        }

        Command::Episodes { limit, json } => {
            let mut episodes = catalog.fetch_episodes().await;
            if let Some(limit) = limit {
                episodes.truncate(limit);
            }

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&episodes).context("Failed to encode catalog")?
                );
            } else if episodes.is_empty() {
                println!("{}", "No episodes published yet.".dimmed());
            } else {
                for episode in &episodes {
                    print_episode(episode);
                }
            }
        }

        #[cfg(feature = "audio")]
        Command::Play {
            episode,
            listen_url,
        } => {
            let episodes = catalog.fetch_episodes().await;
            let chosen = match episode.as_deref() {
                Some(id) => episodes.into_iter().find(|candidate| candidate.id == id),
                None => episodes.into_iter().find(|candidate| candidate.featured),
            }
            .with_context(|| match episode.as_deref() {
                Some(id) => format!("No episode with id {id}"),
                None => "The catalog is empty".to_string(),
            })?;

            play_episode(chosen, &config, listen_url).await?;
        }
    }

    Ok(())
}
