use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::RosterService;

const BUS_NAME: &str = "io.roster.Attendance1";
const OBJECT_PATH: &str = "/io/roster/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rosterd starting");

    let config = Config::load()?;
    tracing::info!(
        db = %config.db_path.display(),
        faces = %config.face_db_path.display(),
        locator = ?config.locator,
        threshold = config.confidence_threshold,
        "configuration loaded"
    );

    for path in [&config.db_path, &config.face_db_path] {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
        }
    }

    let db = RosterService::open_db(&config.db_path)
        .await
        .context("opening attendance database")?;

    let store = engine::load_face_store(&config).context("loading face model")?;
    let engine = engine::spawn_engine(store)?;

    let service = RosterService::new(engine, db);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "rosterd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rosterd shutting down");

    Ok(())
}
