use clap::Parser;
use std::time::Duration;

use livecall_app::CallRuntime;
use livecall_foundation::{AppConfig, CallState};

#[derive(Parser, Debug)]
#[command(
    name = "livecall",
    about = "Live voice (and video) calls with a conversational agent"
)]
struct Cli {
    /// Start the call with the camera enabled
    #[arg(long)]
    video: bool,

    /// Input device name (host default when omitted)
    #[arg(long)]
    device: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<String>,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.audio.device = Some(device);
    }

    let mut runtime = CallRuntime::new(config);
    let observables = runtime.observables();

    runtime.connect(cli.video).await?;
    tracing::info!("Call active; press Ctrl+C to hang up");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Hanging up");
                break;
            }
            _ = ticker.tick() => {
                match observables.state() {
                    CallState::Ended => {
                        tracing::info!("Call ended by the remote side");
                        break;
                    }
                    CallState::Error => {
                        tracing::error!("{}", observables.error_message());
                        break;
                    }
                    _ => tracing::debug!("volume={:.2}", observables.volume()),
                }
            }
        }
    }

    runtime.disconnect().await;
    Ok(())
}
