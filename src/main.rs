use map_api::config::Config;
use map_api::core::MapCore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} --bind <addr:port> [options]", args[0]);
        eprintln!("Options:");
        eprintln!("  --seed <addr:port>        peer to announce to (repeatable)");
        eprintln!("  --discovery-file <path>   line-delimited peer file");
        eprintln!("  --chord-fingers <n>       fingers per ring (default 16)");
        eprintln!("  --heartbeat-ms <n>        raft heartbeat period (default 25)");
        eprintln!("  --election-timeout-ms <low>..<high>");
        eprintln!("  --cru-linked              link revision chains");
        eprintln!("  --raft                    run the experimental raft cluster");
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000",
            args[0]
        );
        std::process::exit(1);
    }

    let config = Config::from_args(&args)?;
    tracing::info!("Starting peer on {}", config.bind);
    if config.seeds.is_empty() && config.discovery_file.is_none() {
        tracing::info!("Starting as founding peer");
    }

    let core = MapCore::init(config).await?;
    tracing::info!("Peer id: {}", core.own_id());

    if let Some(raft) = &core.raft {
        raft.clone().start();
    }

    // Periodic cluster stats.
    let stats_hub = core.hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            let peers = stats_hub.peers();
            tracing::info!("Cluster stats: {} known peers", peers.len());
            for peer in peers {
                tracing::info!("  - {}", peer);
            }
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    core.shutdown().await;

    Ok(())
}
