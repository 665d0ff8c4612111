use clap::Parser;
use client::motion::MotionSettings;
use client::network::{Client, ClientSettings};
use log::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:2567")]
    server: String,

    /// Name attached to the spawned avatar
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// How far behind server time remote entities are rendered, in ms
    #[arg(long, default_value_t = shared::DEFAULT_INTERPOLATION_BACK_MS)]
    interpolation_back: f64,

    /// How long remote entities keep moving without new data, in ms
    #[arg(long, default_value_t = shared::DEFAULT_EXTRAPOLATION_LIMIT_MS)]
    extrapolation_limit: f64,

    /// Interval between owned transform updates, in ms
    #[arg(long, default_value_t = shared::DEFAULT_SYNC_INTERVAL_MS)]
    sync_interval: u64,

    /// Client frames per second
    #[arg(short = 'f', long, default_value_t = 60)]
    frame_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let settings = ClientSettings {
        server: args.server,
        name: args.name,
        motion: MotionSettings {
            interpolation_back_ms: args.interpolation_back,
            extrapolation_limit_ms: args.extrapolation_limit,
            ..MotionSettings::default()
        },
        sync_interval_ms: args.sync_interval,
        frame_rate: args.frame_rate,
    };

    let (stop, shutdown) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, leaving the room...");
            let _ = stop.send(true);
        }
    });

    let mut client = Client::new(settings);
    if let Err(e) = client.run(shutdown).await {
        error!("Client stopped with error: {}", e);
        return Err(e);
    }

    Ok(())
}
