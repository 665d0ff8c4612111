use clap::Parser;
use log::{error, info};
use server::config::Args;
use server::network::{LoopTiming, RoomEvent, Server};
use server::room::Room;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: Set RUST_LOG=info to see room activity, RUST_LOG=debug for message details");
    }

    let args = Args::parse();

    let timing = LoopTiming {
        tick: args.tick_duration(),
        patch: args.patch_duration(),
        idle_timeout: Duration::from_secs(shared::PING_TIMEOUT_SECS),
    };
    let room = Room::new(args.room_options());
    let mut server = Server::new(&args.bind_address(), room, timing).await?;

    info!(
        "Starting room server at {}Hz tick, {}Hz patch rate",
        args.tick_rate, args.patch_rate
    );

    let events = server.event_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = events.send(RoomEvent::Shutdown);
        }
    });

    if let Err(e) = server.run().await {
        error!("Server stopped with error: {}", e);
        return Err(e);
    }

    Ok(())
}
