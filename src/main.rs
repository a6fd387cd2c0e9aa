use anyhow::{bail, Context, Result};
use clap::Parser;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{info, warn};

use artist_graph::crawl::{CrawlConfig, CrawlSession, DEFAULT_AUDIO_FEATURES, DEFAULT_MAX_TRACKS};
use artist_graph::graph::Graph;
use artist_graph::persistence::{configure, load_graph, save_graph};
use artist_graph::progress::{create_spinner, format_duration, set_log_only};
use artist_graph::safety::validate_graph_db;
use artist_graph::spotify::SpotifyClient;

#[derive(Parser)]
#[command(name = "artist-graph")]
#[command(about = "Crawl a track/artist graph from the Spotify catalog into SQLite")]
struct Args {
    /// SQLite database holding the graph (created if missing, resumed if present)
    db: PathBuf,

    /// Seed artist names (comma-separated, exact match)
    #[arg(long)]
    artists: Option<String>,

    /// Seed playlists: IDs, spotify: URIs or open.spotify.com URLs (comma-separated)
    #[arg(long)]
    playlists: Option<String>,

    /// Maximum search results requested per artist name
    #[arg(long, default_value_t = DEFAULT_MAX_TRACKS)]
    max_tracks: u32,

    /// Stop after expanding this many artists
    #[arg(long, default_value = "100")]
    max_artists: usize,

    /// Audio features merged into tracks (comma-separated)
    #[arg(long)]
    audio_features: Option<String>,

    /// Market used for top-track lookups
    #[arg(long, default_value = "US")]
    market: String,

    /// Start from an empty graph even if the database already holds one
    #[arg(long)]
    fresh: bool,

    /// Hide progress bars and log periodic progress lines instead
    #[arg(long)]
    log_only: bool,

    /// Write crawl stats as JSON to this path
    #[arg(long)]
    stats_json: Option<PathBuf>,

    #[arg(long, env = "SPOTIFY_CLIENT_ID", hide_env_values = true)]
    client_id: String,

    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|s| {
            s.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = Instant::now();

    let seeds = split_list(args.artists.as_deref());
    let playlists = split_list(args.playlists.as_deref());

    info!("Opening graph database: {:?}", args.db);
    let mut conn = Connection::open(&args.db).context("Failed to open graph database")?;
    validate_graph_db(&args.db, &conn)?;
    configure(&conn)?;

    let graph = if args.fresh {
        Graph::new()
    } else {
        let spinner = create_spinner("Loading graph");
        let loaded = load_graph(&conn).context("Failed to load graph")?;
        spinner.finish_and_clear();
        match loaded {
            Some((graph, report)) => {
                info!(
                    "Resuming graph with {} nodes, {} edges ({} rows skipped)",
                    graph.node_count(),
                    graph.edge_count(),
                    report.vertices_skipped + report.edges_skipped
                );
                graph
            }
            None => Graph::new(),
        }
    };

    if seeds.is_empty() && playlists.is_empty() && graph.is_empty() {
        bail!("Nothing to crawl: pass --artists or --playlists, or point at an existing graph");
    }

    let audio_features = match args.audio_features.as_deref() {
        Some(list) => split_list(Some(list)),
        None => DEFAULT_AUDIO_FEATURES.iter().map(|s| s.to_string()).collect(),
    };
    let config = CrawlConfig {
        max_tracks: args.max_tracks,
        audio_features,
    };

    let client = SpotifyClient::new(&args.client_id, &args.client_secret, &args.market)
        .context("Failed to create Spotify client")?;
    let mut session = CrawlSession::with_graph(client, graph, config);

    let stop = session.stop_handle();
    ctrlc::set_handler(move || {
        if stop.swap(true, Ordering::Relaxed) {
            warn!("Second interrupt; exiting without saving");
            std::process::exit(130);
        }
        warn!("Interrupt received; finishing current step and saving");
    })
    .context("Failed to install interrupt handler")?;

    let mut frontier = session.pending_artists();
    if !frontier.is_empty() {
        info!("{} artists pending from a previous crawl", frontier.len());
    }

    for playlist in &playlists {
        frontier.extend(session.crawl_playlist(playlist));
    }
    frontier.extend(session.resolve_seeds(&seeds));

    session.crawl(frontier, args.max_artists);

    let mut stats = session.stats().clone();
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    for reason in session.skipped() {
        info!("Skipped: {}", reason);
    }

    let graph = session.into_graph();
    save_graph(&mut conn, &graph).context("Failed to save graph")?;

    stats.log_phase("crawl");
    if let Some(path) = &args.stats_json {
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats to {:?}", path))?;
        info!("Stats written to {:?}", path);
    }

    info!("{:=<60}", "");
    info!("Crawl complete!");
    info!("  Tracks:  {}", graph.tracks().count());
    info!("  Artists: {} ({} expanded)", graph.artists().count(), graph.seen_ids().len());
    info!("  Edges:   {}", graph.edge_count());
    info!("  Skipped: {} units of work", stats.total_skipped());
    info!("  Elapsed: {}", format_duration(start.elapsed()));
    info!("{:=<60}", "");

    Ok(())
}
