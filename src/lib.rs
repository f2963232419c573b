pub mod channels;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod mi;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod radio;
pub mod scheduler;
pub mod utils;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

fn init_logger(loglevel: &str) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(loglevel),
    )
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
}

pub async fn app(
    mut shutdown_rx: broadcast::Receiver<()>,
    config: ConfigWrapper,
) -> Result<()> {
    init_logger(&config.loglevel());
    info!("mi-bridge {} starting", CARGO_PKG_VERSION);

    let channels = Channels::new();

    let coordinator = Coordinator::new(config.clone(), channels.clone())?;
    let coordinator_clone = coordinator.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator_clone.start().await {
            error!("coordinator task failed: {}", e);
        }
    });

    let scheduler = Scheduler::new(config.clone(), channels.clone());
    let scheduler_clone = scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler_clone.start().await {
            error!("scheduler task failed: {}", e);
        }
    });

    let mqtt = Mqtt::new(
        config.clone(),
        channels.clone(),
        coordinator.shared_stats.clone(),
    );
    let mqtt_clone = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start().await {
            error!("mqtt task failed: {}", e);
        }
    });

    let radio = Radio::new(config.clone(), channels.clone());
    let radio_clone = radio.clone();
    let radio_handle = tokio::spawn(async move {
        if let Err(e) = radio_clone.start().await {
            error!("radio task failed: {}", e);
        }
    });

    info!("startup complete, waiting for shutdown signal");
    let _ = shutdown_rx.recv().await;

    info!("shutdown signal received, stopping components");
    coordinator.stop();
    radio.stop();
    let _ = mqtt.stop().await;

    for (name, handle) in [
        ("coordinator", coordinator_handle),
        ("scheduler", scheduler_handle),
        ("mqtt", mqtt_handle),
        ("radio", radio_handle),
    ] {
        if let Err(e) = handle.await {
            error!("error waiting for {} task: {}", name, e);
        }
    }

    if let Ok(stats) = coordinator.shared_stats.lock() {
        stats.print_summary();
    }

    info!("shutdown complete");
    Ok(())
}

pub async fn run() -> Result<()> {
    let options = Options::new();

    // a default logger so config loading is visible; app() re-applies the
    // configured level
    init_logger("info");

    let config = ConfigWrapper::new(options.config_file)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl+c: {}", e);
        }
        let _ = shutdown_tx_clone.send(());
    });

    if let Some(runtime) = options.runtime {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(runtime)).await;
            info!("runtime limit reached");
            let _ = shutdown_tx_clone.send(());
        });
    }

    app(shutdown_rx, config).await
}
