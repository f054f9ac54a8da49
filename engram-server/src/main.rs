mod config;
mod dto;
mod errors;
mod handlers;
mod routes;
mod state;

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use engram_core::analyst::tmdb::TmdbClassifier;
use engram_core::broadcaster::EventBroadcaster;
use engram_core::drive_monitor::{DriveMonitor, NullDriveSource};
use engram_core::job_manager::{JobManager, JobManagerDeps};
use engram_core::matcher::fingerprint::{ChunkExtractor, ProcessTranscriber};
use engram_core::matcher::subtitle::{HttpSubtitleProvider, RemoteSubtitleProvider, SubtitleCorpusBuilder};
use engram_core::matcher::Matcher;
use engram_core::ripping::RippingCoordinator;
use engram_core::store::Store;

use crate::config::ServerConfig;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "engram-server", about = "Local disc-ripping and media-automation service")]
struct Args {
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engram_server=info,engram_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let config = Arc::new(config);

    info!(host = %config.host, port = config.port, "starting engram-server");

    let store = Arc::new(Store::open(&config.database_path).await?);
    let settings = store.get_settings().await?;
    let snapshot = settings.snapshot();

    let broadcaster = Arc::new(EventBroadcaster::new());

    let drive_monitor = Arc::new(DriveMonitor::new(
        Arc::new(NullDriveSource),
        Arc::clone(&broadcaster),
        snapshot.sentinel_poll_interval,
    ));

    let ripping = Arc::new(RippingCoordinator::new(
        config.rip_tool_path.clone(),
        snapshot.ripping.clone(),
    ));

    let tmdb = match &config.tmdb_api_key {
        Some(key) => {
            info!("TMDB classifier enabled");
            Some(Arc::new(TmdbClassifier::new(key.clone())))
        }
        None => {
            warn!("TMDB_API_KEY not set; disc classification runs on heuristics alone");
            None
        }
    };

    let providers: Vec<Box<dyn RemoteSubtitleProvider>> = vec![
        Box::new(HttpSubtitleProvider::new(
            "opensubtitles",
            "https://rest.opensubtitles.org/search",
            std::env::var("OPENSUBTITLES_API_KEY").ok(),
        )),
        Box::new(HttpSubtitleProvider::new(
            "subscene",
            "https://subscene.com/subtitles/searchbytitle",
            std::env::var("SUBSCENE_API_KEY").ok(),
        )),
    ];
    let corpus = SubtitleCorpusBuilder::new(config.staging_path.join("subtitle-cache"), providers);
    let extractor = ChunkExtractor::new(config.ffmpeg_path.clone());
    let transcriber = Arc::new(ProcessTranscriber::new(
        std::env::var("WHISPER_BINARY_PATH").unwrap_or_else(|_| "whisper".to_string()),
        Vec::new(),
    ));
    let matcher = Arc::new(Matcher::new(
        snapshot.matcher.clone(),
        corpus,
        extractor,
        transcriber,
        config.staging_path.join("match-scratch"),
    ));

    let job_manager = JobManager::new(
        JobManagerDeps {
            store: Arc::clone(&store),
            broadcaster: Arc::clone(&broadcaster),
            drive_monitor: Arc::clone(&drive_monitor),
            ripping,
            tmdb,
            matcher,
        },
        snapshot,
    );

    tokio::spawn(Arc::clone(&job_manager).run());
    drive_monitor.start();

    let state = AppState {
        store,
        broadcaster,
        drive_monitor,
        job_manager,
        config: Arc::clone(&config),
    };

    let app = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %config.bind_addr(), "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
