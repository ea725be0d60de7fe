//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;

use encore_service::config::Config;
use encore_service::fetcher::{FetchOptions, Resource};
use encore_service::metrics;
use encore_service::resources::{ArtistProfiles, DEFAULT_LIMIT, PopularArtists, ProfileUpdate};
use encore_service::services::Services;

use crate::logging;
use crate::output::{self, OutputFormat, Report};

/// Encore commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Probe the backend until it is ready, or until the warmup gives up.
    Warmup,

    /// Read an artist profile.
    Artist {
        /// The artist's id.
        id: String,

        /// Ignore cached values.
        #[arg(long)]
        refresh: bool,

        /// Issue this many reads at once, as a page with several widgets would.
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },

    /// Read the popular artists chart.
    Popular {
        /// The number of chart entries.
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Ignore cached values.
        #[arg(long)]
        refresh: bool,
    },

    /// Save changes to an artist profile.
    UpdateProfile {
        /// The artist's id.
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        bio: Option<String>,

        /// A genre of the artist. Replaces all existing genres, may be repeated.
        #[arg(long = "genre")]
        genres: Vec<String>,

        #[arg(long)]
        avatar_url: Option<String>,
    },
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The output format.
    #[arg(long, value_enum, global = true, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime has not been started yet, so this is still single-threaded.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd,
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure metrics")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("encore")
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(run(cli.command, cli.format, &config))
}

async fn run(command: Command, format: OutputFormat, config: &Config) -> Result<()> {
    let services = Services::from_config(config)?;

    match command {
        Command::Warmup => {
            let outcome = services.warmup().wait_for_ready().await;
            output::print_json(&outcome)
        }
        Command::Artist {
            id,
            refresh,
            concurrency,
        } => {
            let options = FetchOptions {
                force_refresh: refresh,
            };
            let reads = (0..concurrency.max(1)).map(|_| services.artists.fetch(&id, options));
            let key = services.artists.resource().cache_key(&id);
            let reports: Vec<_> = join_all(reads)
                .await
                .into_iter()
                .map(|outcome| Report::new(ArtistProfiles::NAME, key.clone(), outcome))
                .collect();
            output::print_reports(&reports, format)
        }
        Command::Popular { limit, refresh } => {
            let options = FetchOptions {
                force_refresh: refresh,
            };
            let outcome = services.popular.fetch(&limit, options).await;
            let key = services.popular.resource().cache_key(&limit);
            let report = Report::new(PopularArtists::NAME, key, outcome);
            output::print_reports(&[report], format)
        }
        Command::UpdateProfile {
            id,
            name,
            bio,
            genres,
            avatar_url,
        } => {
            let update = ProfileUpdate {
                name,
                bio,
                genres: (!genres.is_empty()).then_some(genres),
                avatar_url,
            };
            let profile = services
                .artists
                .update_profile(&id, &update)
                .await
                .context("failed to update profile")?;
            output::print_json(&profile)
        }
    }
}
