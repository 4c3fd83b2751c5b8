//! iptv_grid - command line host for the playlist/guide engine

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iptv_grid::categories::{CategorySelection, ChannelFilter};
use iptv_grid::config::AppConfig;
use iptv_grid::epg::{epg_channel_listing, format_time};
use iptv_grid::sources::{is_remote, read_guide_file, read_text, HttpFetcher};
use iptv_grid::store::JsonStore;
use iptv_grid::{Channel, Error, Result, Session};

#[derive(Parser)]
#[command(name = "iptv_grid")]
#[command(version)]
#[command(about = "Browse IPTV playlists with live programme information")]
struct Cli {
    /// Directory holding the saved session (defaults to the config directory)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a playlist and/or a guide from a URL or file
    Load {
        #[arg(long, value_name = "SRC")]
        playlist: Option<String>,
        #[arg(long, value_name = "SRC")]
        guide: Option<String>,
        /// Display name for the playlist
        #[arg(long)]
        name: Option<String>,
    },
    /// Channel counts per category
    Categories,
    /// List channels
    List {
        #[arg(long, conflicts_with = "favorites")]
        category: Option<String>,
        #[arg(long)]
        favorites: bool,
        #[arg(long)]
        search: Option<String>,
        /// Show what is airing on each channel
        #[arg(long)]
        now: bool,
    },
    /// Show what is airing on a channel
    Now {
        /// Channel id or name
        channel: String,
        /// Keep refreshing until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Toggle a channel as favorite
    Favorite {
        /// Channel id or name
        channel: String,
    },
    /// Replace a channel's stream URL
    SetUrl {
        /// Channel id or name
        channel: String,
        url: String,
    },
    /// Write channels as an M3U playlist
    Export {
        #[arg(long, conflicts_with = "category")]
        favorites: bool,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Create placeholder channels for every guide channel
    FromGuide {
        /// Add to the current channels instead of replacing them
        #[arg(long)]
        append: bool,
    },
    /// Plain-text listing of the guide's channels
    GuideList {
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Remove saved data
    Clear {
        #[arg(value_enum)]
        what: ClearTarget,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ClearTarget {
    Channels,
    Guide,
    All,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("iptv_grid={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Single-threaded host: chunked parsing yields back to this loop
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Could not start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_empty_result() => {
            eprintln!("Nothing found: {}", e);
            ExitCode::from(2)
        }
        Err(e) if e.is_fetch_failure() => {
            eprintln!("Could not fetch: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load();
    let store = cli.data_dir.map(JsonStore::new).unwrap_or_default();
    let mut session = Session::new(config.parse.clone());
    session.restore_from(&store);
    debug!("Session store at {}", store.dir().display());

    match cli.command {
        Command::Load { playlist, guide, name } => {
            let loaded = load(&mut session, &mut config, &store, playlist, guide, name).await;
            config.save()?;
            loaded?;
            session.save_to(&store)?;
        }
        Command::Categories => {
            let token = tokio_util::sync::CancellationToken::new();
            let tally = session
                .tally_chunked(&token, |p| debug!("Counting categories {:.0}%", p * 100.0))
                .await?;
            println!("{:<30} {:>6}", "all", tally.all());
            println!("{:<30} {:>6}", "favorites", tally.favorites());
            for (group, count) in tally.groups() {
                println!("{:<30} {:>6}", group, count);
            }
        }
        Command::List { category, favorites, search, now } => {
            let selection = match (favorites, category) {
                (true, _) => CategorySelection::Favorites,
                (false, Some(name)) => CategorySelection::from_name(&name),
                (false, None) => CategorySelection::All,
            };
            let filter = ChannelFilter::new(selection).with_search(search.unwrap_or_default());
            let at = Utc::now();
            for channel in session.filtered(&filter) {
                let star = if session.is_favorite(&channel.id) { "*" } else { " " };
                let mut line = format!("{} {}  {}  [{}]", star, channel.id, channel.name, channel.group);
                if now {
                    if let Some(prog) = session.now_playing(&channel.id, at)? {
                        line.push_str(&format!("  > {}", prog.title));
                    }
                }
                println!("{}", line);
            }
        }
        Command::Now { channel, watch } => {
            let channel = resolve(&session, &channel)?;
            print_now(&session, &channel)?;
            if watch {
                watch_now(&session, &channel, config.refresh_interval_secs).await?;
            }
        }
        Command::Favorite { channel } => {
            let channel = resolve(&session, &channel)?;
            let added = session.toggle_favorite(&channel.id);
            println!("{} {} favorites", channel.name, if added { "added to" } else { "removed from" });
            session.save_to(&store)?;
        }
        Command::SetUrl { channel, url } => {
            let channel = resolve(&session, &channel)?;
            session.update_stream_url(&channel.id, &url)?;
            println!("Updated {}", channel.name);
            session.save_to(&store)?;
        }
        Command::Export { favorites, category, out } => {
            let selection = match (favorites, category) {
                (true, _) => CategorySelection::Favorites,
                (false, Some(name)) => CategorySelection::Group(name),
                (false, None) => CategorySelection::All,
            };
            write_output(out.as_deref(), &session.export_m3u(&selection))?;
        }
        Command::FromGuide { append } => {
            let count = session.channels_from_guide(append)?;
            println!("Generated {} channels; set their stream URLs with `set-url`", count);
            session.save_to(&store)?;
        }
        Command::GuideList { out } => {
            let table = session.epg().ok_or(Error::NoProgrammes)?;
            write_output(out.as_deref(), &epg_channel_listing(table, Utc::now()))?;
        }
        Command::Clear { what } => {
            match what {
                ClearTarget::Channels => session.clear_channels(),
                ClearTarget::Guide => session.clear_guide(),
                ClearTarget::All => session.clear_all(),
            }
            session.save_to(&store)?;
        }
    }

    Ok(())
}

async fn load(
    session: &mut Session,
    config: &mut AppConfig,
    store: &JsonStore,
    playlist: Option<String>,
    guide: Option<String>,
    name: Option<String>,
) -> Result<()> {
    let fetcher = HttpFetcher::new(config.fetch.clone());
    let explicit_guide = guide.is_some();
    let (playlist, mut guide) = match (playlist, guide) {
        (None, None) => (config.last_playlist.clone(), config.last_guide.clone()),
        sources => sources,
    };

    if playlist.is_none() && guide.is_none() {
        println!("Nothing to load: pass --playlist and/or --guide");
        return Ok(());
    }

    if let Some(source) = playlist {
        let text = fetch_playlist(&fetcher, &source).await?;
        let name = name.unwrap_or_else(|| source_name(&source));
        let info = session
            .load_playlist(&text, &name, &source, |p| debug!("Parsing playlist {:.0}%", p * 100.0))
            .await?;
        println!("Loaded {} channels from {}", info.channel_count, info.name);
        config.last_playlist = Some(source);
        // Keep the playlist even if the guide below fails
        session.save_to(store)?;

        if guide.is_none() {
            guide = info.guide_url;
        }
    }

    if let Some(source) = guide {
        match load_guide(session, &fetcher, &source).await {
            Ok(()) => config.last_guide = Some(source),
            // A guide announced by the playlist header is optional
            Err(e) if !explicit_guide => warn!("Skipping guide {}: {}", source, e),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn load_guide(session: &mut Session, fetcher: &HttpFetcher, source: &str) -> Result<()> {
    let xml = if is_remote(source) {
        let fetcher = fetcher.clone();
        let url = source.to_string();
        blocking(source, move || fetcher.fetch_guide(&url)).await?
    } else {
        read_guide_file(source)?
    };

    let info = session
        .load_guide(&xml, source, |p| debug!("Parsing guide {:.0}%", p * 100.0))
        .await?;
    let table = session.epg().ok_or(Error::NoProgrammes)?;
    println!(
        "Loaded guide from {}: {} channels, {} programmes",
        info.source,
        table.channel_count(),
        table.program_count()
    );
    Ok(())
}

async fn fetch_playlist(fetcher: &HttpFetcher, source: &str) -> Result<String> {
    if !is_remote(source) {
        return read_text(source);
    }
    let fetcher = fetcher.clone();
    let url = source.to_string();
    blocking(source, move || fetcher.fetch_text(&url)).await
}

/// Run blocking I/O off the event loop
async fn blocking<T, F>(source: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| Error::Fetch {
        url: source.to_string(),
        message: e.to_string(),
    })?
}

/// Last path segment of a URL or file path
fn source_name(source: &str) -> String {
    source
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(source)
        .to_string()
}

fn resolve(session: &Session, query: &str) -> Result<Channel> {
    session
        .find_channel(query)
        .cloned()
        .ok_or_else(|| Error::ChannelNotFound(query.to_string()))
}

fn print_now(session: &Session, channel: &Channel) -> Result<()> {
    match session.now_playing(&channel.id, Utc::now())? {
        Some(prog) => {
            let window = match (prog.start, prog.stop) {
                (Some(start), Some(stop)) => format!(" ({} - {})", format_time(start), format_time(stop)),
                _ => String::new(),
            };
            println!("{}: {}{}", channel.name, prog.title, window);
            if !prog.description.is_empty() {
                println!("  {}", prog.description);
            }
        }
        None if session.epg().is_none() => println!("{}: no guide loaded", channel.name),
        None => println!("{}: no programme information", channel.name),
    }
    Ok(())
}

async fn watch_now(session: &Session, channel: &Channel, every_secs: u64) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(every_secs.max(1)));
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => print_now(session, channel)?,
            _ = tokio::signal::ctrl_c() => {
                info!("Stopped watching {}", channel.name);
                return Ok(());
            }
        }
    }
}

fn write_output(out: Option<&Path>, text: &str) -> Result<()> {
    match out {
        Some(path) => {
            fs::write(path, text)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}
