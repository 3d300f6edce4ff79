use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_live::tools::schema;
use loqa_live::{
    create_router, AppState, BatterySensor, Config, ConnectionState, DeviceStateStore, LiveSession,
    SysfsBattery, ToolDispatcher, WebSocketConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "loqa-live")]
#[command(about = "Voice-driven device control over a live speech session")]
struct Cli {
    /// Config file path (extension optional)
    #[arg(short, long, default_value = "config/loqa-live")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Connect immediately and print the conversation until Ctrl-C
    Talk,
    /// Print the tool declarations sent at setup
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve => serve(&cfg).await,
        Command::Talk => talk(&cfg).await,
        Command::Tools => {
            println!("{}", serde_json::to_string_pretty(&schema::tool_sets())?);
            Ok(())
        }
    }
}

fn build_session(cfg: &Config) -> Result<LiveSession> {
    let api_key = cfg.api_key();
    if api_key.is_none() {
        warn!("{} is not set; the service will likely reject the connection", cfg.live.api_key_env);
    }

    let sensor = SysfsBattery::detect().map(|s| Arc::new(s) as Arc<dyn BatterySensor>);
    if sensor.is_none() {
        info!("No battery sensor found, checkBattery reports the cached level");
    }

    let dispatcher = Arc::new(ToolDispatcher::new(DeviceStateStore::default(), sensor));
    let refresh = Duration::from_secs(cfg.service.battery_refresh_secs);
    if dispatcher.spawn_battery_refresh(refresh).is_some() {
        info!("Polling battery level every {:?}", refresh);
    }
    let connector = Arc::new(WebSocketConnector::new(&cfg.live.endpoint, api_key.as_deref()));
    let devices = Arc::new(cfg.devices()?);

    Ok(LiveSession::new(cfg.session_config(), devices, connector, dispatcher))
}

async fn serve(cfg: &Config) -> Result<()> {
    let session = build_session(cfg)?;
    let app = create_router(AppState::new(session.clone()));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("{} listening on {}", cfg.service.name, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    session.disconnect().await;
    Ok(())
}

async fn talk(cfg: &Config) -> Result<()> {
    let session = build_session(cfg)?;
    let mut entries = session.log().subscribe();
    let mut status = session.subscribe_status();

    if let Err(e) = session.connect().await {
        eprintln!("{e}");
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            entry = entries.recv() => match entry {
                Ok(entry) => println!("[{}] {}", entry.role, entry.text),
                Err(RecvError::Lagged(n)) => warn!("Skipped {} log entries", n),
                Err(RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = status.borrow().state;
                if !matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
                    // Drain what the session logged on its way out
                    while let Ok(entry) = entries.try_recv() {
                        println!("[{}] {}", entry.role, entry.text);
                    }
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}
