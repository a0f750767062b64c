//! Configuration for meshd (§6 environment/configuration options, §10.2).

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// meshd - peer-to-peer encrypted message and file sync daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "meshd")]
#[command(about = "Peer-to-peer eventually-consistent message and file sync daemon")]
pub struct Config {
    /// This device's identifier, used as `author_id` and as the sender name
    /// signed into every packet.
    #[arg(long, env = "MESH_DEVICE_ID")]
    pub device_id: String,

    /// Listen address for the UDP transport.
    #[arg(long, default_value = "0.0.0.0:9100")]
    pub listen: SocketAddr,

    /// Data directory for persistent storage.
    #[arg(long, default_value = "./data/meshd")]
    pub data_dir: PathBuf,

    /// Community pre-shared secret: either a `0x`-prefixed 64-hex-digit
    /// literal (raw 32 bytes) or an arbitrary string (SHA-256-derived).
    #[arg(long, env = "MESH_PSK")]
    pub psk: String,

    /// Known peer endpoints as `device_id@host:port`, repeatable.
    #[arg(long = "peer", value_delimiter = ',')]
    pub peer_endpoints: Vec<String>,

    /// Trusted peer public keys as `device_id@base64key`, repeatable. Trust
    /// is manual (§10): there is no discovery or certificate chain, just
    /// this list.
    #[arg(long = "trust", value_delimiter = ',')]
    pub trusted_peers: Vec<String>,

    /// Sync engine tick interval, milliseconds.
    #[arg(long, default_value = "2000")]
    pub sync_tick_ms: u64,

    /// Minimum time between SUMMARY packets to the same peer, milliseconds.
    #[arg(long, default_value = "10000")]
    pub summary_cooldown_ms: u64,

    /// Maximum accepted clock skew for inbound packets, milliseconds.
    #[arg(long, default_value = "60000")]
    pub max_clock_skew_ms: u64,

    /// Replay-cache retention window, milliseconds.
    #[arg(long, default_value = "300000")]
    pub replay_window_ms: u64,

    /// Max "recent" event ids offered to a peer per tick.
    #[arg(long, default_value = "10")]
    pub recent_batch: usize,

    /// Max "older" event ids offered to a peer per tick.
    #[arg(long, default_value = "5")]
    pub older_batch: usize,

    /// Hard cap on events emitted to one peer per tick.
    #[arg(long, default_value = "10")]
    pub max_events_per_round: usize,

    /// Plaintext chunk size in bytes.
    #[arg(long, default_value = "500")]
    pub chunk_size: usize,

    /// Data chunks per XOR parity group; 0 disables parity.
    #[arg(long, default_value = "2")]
    pub parity_multiplier: usize,

    /// Use the simulated network instead of a real UDP socket.
    #[arg(long)]
    pub simulated: bool,

    #[command(flatten)]
    pub simulated_network: SimulatedNetworkOptions,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty).
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SimulatedNetworkOptions {
    #[arg(long = "sim-packet-loss", default_value = "0.0")]
    pub packet_loss: f64,
    #[arg(long = "sim-min-latency-ms", default_value = "0")]
    pub min_latency_ms: u64,
    #[arg(long = "sim-max-latency-ms", default_value = "0")]
    pub max_latency_ms: u64,
    #[arg(long = "sim-jitter-ms", default_value = "0")]
    pub jitter_ms: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.device_id.trim().is_empty() {
            anyhow::bail!("device_id cannot be empty");
        }
        if self.psk.is_empty() {
            anyhow::bail!("psk cannot be empty");
        }
        if self.parity_multiplier == 1 {
            anyhow::bail!("parity_multiplier of 1 produces degenerate single-chunk groups; use 0 to disable or >= 2");
        }
        for endpoint in &self.peer_endpoints {
            parse_peer_endpoint(endpoint)?;
        }
        Ok(())
    }

    /// Resolve the PSK to raw 32 bytes per §4.B: hex literal, else SHA-256 of the UTF-8 string.
    pub fn resolve_psk(&self) -> [u8; 32] {
        if let Some(hex_digits) = self.psk.strip_prefix("0x") {
            if let Ok(bytes) = hex::decode(hex_digits) {
                if bytes.len() == 32 {
                    let mut out = [0u8; 32];
                    out.copy_from_slice(&bytes);
                    return out;
                }
            }
        }
        use sha2::Digest;
        sha2::Sha256::digest(self.psk.as_bytes()).into()
    }

    pub fn parsed_peer_endpoints(&self) -> anyhow::Result<Vec<(String, SocketAddr)>> {
        self.peer_endpoints.iter().map(|s| parse_peer_endpoint(s)).collect()
    }

    /// Parses `device_id@base64key` entries into `(device_id, public_key_bytes)`.
    pub fn parsed_trusted_peers(&self) -> anyhow::Result<Vec<(String, [u8; 32])>> {
        self.trusted_peers.iter().map(|s| parse_trusted_peer(s)).collect()
    }
}

fn parse_trusted_peer(raw: &str) -> anyhow::Result<(String, [u8; 32])> {
    let (device_id, encoded) = raw
        .split_once('@')
        .ok_or_else(|| anyhow::anyhow!("trusted peer '{raw}' must be device_id@base64key"))?;
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| anyhow::anyhow!("trusted peer '{raw}' has invalid base64: {e}"))?;
    if bytes.len() != 32 {
        anyhow::bail!("trusted peer '{raw}' key must decode to 32 bytes, got {}", bytes.len());
    }
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&bytes);
    Ok((device_id.to_string(), public_key))
}

fn parse_peer_endpoint(raw: &str) -> anyhow::Result<(String, SocketAddr)> {
    let (device_id, addr) = raw
        .split_once('@')
        .ok_or_else(|| anyhow::anyhow!("peer endpoint '{raw}' must be device_id@host:port"))?;
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("peer endpoint '{raw}' has invalid address: {e}"))?;
    Ok((device_id.to_string(), addr))
}
