// Module declarations for the application's core components
pub mod acquisition;    // One connect/read/normalize/persist cycle
pub mod channel_map;    // Register address to channel mapping
pub mod clock;          // Injectable time source
pub mod config;         // Configuration management
pub mod database;       // Measurement storage
pub mod datalog_writer; // Raw register logging
pub mod error;          // Failure taxonomy
pub mod modbus;         // Modbus RTU transport
pub mod normalizer;     // Raw to calibrated values
pub mod options;        // Command line options parsing
pub mod prelude;        // Common imports and types
pub mod reader;         // Register block reads
pub mod scheduler;      // Interval scheduling
pub mod transport;      // Scoped transport sessions

// Get the package version from Cargo.toml
pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::acquisition::Acquisition;
use crate::database::Database;
use crate::datalog_writer::DatalogWriter;
use crate::modbus::ModbusRtuTransport;
use crate::scheduler::Scheduler;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Sets up env_logger. `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        error!("Failed to initialise logger: {}", e);
    }
}

/// Main application body
///
/// Wires the components together from `config` and drives the scheduler
/// until `shutdown_rx` fires.
pub async fn app(config: Config, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let channel_map = Arc::new(config.channel_map().clone());

    info!("  Opening database at {}...", config.storage_location());
    let database = Database::new(config.storage_location(), channel_map.clone(), clock.clone());
    match database.ensure_schema().await {
        Ok(()) => match database.count().await {
            Ok(rows) => info!("    Database ready, {} rows stored", rows),
            Err(e) => warn!("    Database ready, row count unavailable: {}", e),
        },
        // not fatal: the schema is ensured again before the next append
        Err(e) => error!("    Failed to prepare database: {}", e),
    }

    info!("  Creating Modbus transport...");
    let transport = Arc::new(ModbusRtuTransport::new(&config));

    let mut acquisition = Acquisition::new(
        channel_map,
        transport,
        config.timeout(),
        database.clone(),
        clock.clone(),
    );
    if let Some(path) = config.datalog_file() {
        acquisition = acquisition.with_datalog(DatalogWriter::new(path, config.station_id())?);
    }

    let scheduler = Scheduler::new(&config, clock);
    scheduler.start(&acquisition, shutdown_rx).await?;

    acquisition.stats().print_summary();
    database.close().await;

    info!("Application shutdown complete");
    Ok(())
}

/// Application entry point
///
/// Installs the shutdown triggers (SIGINT, SIGTERM, and the optional runtime
/// limit) and runs the application until one of them fires.
pub async fn run(config: Config, runtime: Option<u64>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = signal_tx.send(());
            }
            Err(e) => error!("Failed to listen for shutdown signals: {}", e),
        }
    });

    if let Some(secs) = runtime {
        let limit_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!("Runtime limit of {}s reached", secs);
            let _ = limit_tx.send(());
        });
    }

    app(config, shutdown_rx).await
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
