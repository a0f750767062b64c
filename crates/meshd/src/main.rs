//! meshd - peer-to-peer eventually-consistent message and file sync daemon.

use clap::Parser;
use meshd::config::Config;
use meshd::{ChunkCodec, Engine, EventLog, KeyStore, PeerKnowledge, ScanQueue, Storage};
use meshnet::simulated::{SimulatedNetwork, SimulatedNetworkConfig};
use meshnet::{DatagramTransport, KeyPair, PacketCrypto, Transport};
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(&config);

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "meshd exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config) {
    let default_level = if config.verbose { "meshd=debug,meshnet=debug" } else { "meshd=info,meshnet=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if config.log_format == "json" {
        tracing_subscriber::registry().with(fmt::layer().json()).with(filter).init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(device_id = %config.device_id, "starting meshd v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.data_dir)?;
    let storage = Arc::new(Storage::open(&config.data_dir)?);

    let seed = match storage.load_device_seed()? {
        Some(seed) => seed,
        None => {
            let fresh = KeyPair::generate().seed();
            storage.save_device_seed(&fresh)?;
            fresh
        }
    };
    let identity = KeyPair::from_seed(&seed);
    let keystore = Arc::new(KeyStore::with_keypair(KeyPair::from_seed(&seed)));

    for (device_id, public_key) in storage.load_peer_publics()? {
        keystore.add_peer(device_id, public_key);
    }
    for (device_id, public_key) in config.parsed_trusted_peers()? {
        keystore.add_peer(device_id.clone(), public_key);
        storage.save_peer_public(&device_id, &public_key)?;
    }

    let psk = config.resolve_psk();
    let event_log = Arc::new(EventLog::new(storage.clone()));
    let chunk_codec = Arc::new(ChunkCodec::new(psk, config.chunk_size, config.parity_multiplier));
    let scan_queue = Arc::new(ScanQueue::new());
    let peer_knowledge = Arc::new(PeerKnowledge::new());
    let packet_crypto = Arc::new(PacketCrypto::new(
        Arc::new(identity),
        config.device_id.clone(),
        &psk,
        keystore.clone(),
        config.max_clock_skew_ms,
        config.replay_window_ms,
    ));

    let (transport, inbound): (Arc<dyn Transport>, tokio::sync::mpsc::Receiver<_>) = if config.simulated {
        warn!("running with the simulated network; no real UDP traffic will be sent");
        let sim_config = SimulatedNetworkConfig {
            packet_loss: config.simulated_network.packet_loss,
            min_latency_ms: config.simulated_network.min_latency_ms,
            max_latency_ms: config.simulated_network.max_latency_ms,
            jitter_ms: config.simulated_network.jitter_ms,
        };
        let network = SimulatedNetwork::new(sim_config);
        let (sim_transport, rx) = network.register(config.device_id.clone());
        (Arc::new(sim_transport), rx)
    } else {
        let peers: HashMap<String, _> = config.parsed_peer_endpoints()?.into_iter().collect();
        let (datagram_transport, rx) = DatagramTransport::bind(config.listen, peers).await?;
        (datagram_transport, rx)
    };

    let eviction_crypto = packet_crypto.clone();

    let engine = Arc::new(Engine::new(
        config.device_id.clone(),
        event_log,
        chunk_codec,
        scan_queue,
        peer_knowledge,
        packet_crypto,
        transport,
        config.summary_cooldown_ms,
        config.recent_batch,
        config.older_batch,
        config.max_events_per_round,
    )?);

    let mut messages = engine.subscribe_messages();
    tokio::spawn(async move {
        while let Ok(payload) = messages.recv().await {
            info!(?payload, "message event");
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system clock is after the unix epoch")
                .as_millis() as u64;
            eviction_crypto.evict_replay_cache(now_ms);
        }
    });

    let run_engine = engine.clone();
    let tick_interval = Duration::from_millis(config.sync_tick_ms);
    tokio::spawn(async move {
        run_engine.run(inbound, tick_interval).await;
    });

    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal");
    storage.flush()?;
    Ok(())
}
