use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use rtpstorage::cli::{parse_args, print_help};
use rtpstorage::config::Config;
use rtpstorage::rtp::{ReceiverSettings, RecoveryRequest, StorageReceiver};

/// Queue depth between the receiver and the FEC decoder side
const RECOVERY_QUEUE_DEPTH: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtpstorage=info".parse()?),
        )
        .init();

    info!("rtpstorage v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.rtp_port = port;
    }
    info!("Configuration loaded");
    info!("  RTP port: {}", config.rtp_port);
    info!("  Retention window: {}ms", config.size_time.as_millis());
    info!("  FEC payload type: {}", config.fec_payload_type);

    // Handle --validate mode
    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let (recovery_tx, recovery_rx) = mpsc::channel(RECOVERY_QUEUE_DEPTH);
    let mut receiver =
        StorageReceiver::bind(config.rtp_port, ReceiverSettings::from(&config), recovery_tx).await?;
    info!("Listening for RTP on port {}", receiver.local_port()?);

    let cancel_token = CancellationToken::new();
    {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            cancel_token.cancel();
        });
    }

    let decoder = tokio::spawn(log_recovery_requests(recovery_rx));

    let stats = receiver.run(cancel_token).await?;
    // Closes the recovery channel so the consumer finishes
    drop(receiver);
    let requests = decoder.await?;

    info!(
        "Done: {} packets, {} losses, {} recovery requests ({} consumed), {} redundant, {} evicted",
        stats.packets_received,
        stats.losses_detected,
        stats.recoveries_requested,
        requests,
        stats.packets_redundant,
        stats.storage.evicted
    );

    Ok(())
}

/// Stand-in for the FEC decoder: log every recovery group handed over
async fn log_recovery_requests(mut rx: mpsc::Receiver<RecoveryRequest>) -> u64 {
    let mut count = 0;
    while let Some(request) = rx.recv().await {
        count += 1;
        let seqs: Vec<u16> = request.packets.iter().map(|p| p.sequence).collect();
        debug!("Recovery group for seq={}: {:?}", request.lost_seq, seqs);
        info!(
            "Recovery request for seq={} with {} packets",
            request.lost_seq,
            request.packets.len()
        );
    }
    count
}
