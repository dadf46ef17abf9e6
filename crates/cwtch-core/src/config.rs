use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Directory for the encrypted store (salt, identity, saved state)
    pub data_dir: PathBuf,

    /// Local port the inbound listener binds on (0 picks an ephemeral port)
    pub listen_port: u16,

    /// Virtual port the hidden service exposes and outbound dials target
    pub virtual_port: u16,

    /// Local SOCKS5 proxy of the anonymizing daemon
    pub socks_addr: String,

    /// Local control endpoint that provisions the hidden service
    pub control_addr: String,

    /// Outbound dial deadline in seconds
    pub connect_timeout_secs: u64,

    /// End-to-end handshake deadline in seconds
    pub handshake_timeout_secs: u64,

    /// Pad outgoing messages to 256-byte buckets
    pub padding_enabled: bool,

    /// Randomize send timing
    pub traffic_scramble: bool,

    /// Ghost mode forces padding and scrambling on regardless of the
    /// individual flags
    pub ghost_mode: bool,

    /// Sign the handshake transcript with the identity key and require the
    /// peer to do the same. Off by default: the base protocol sends the
    /// identity key unsigned and relies on out-of-band fingerprint checks.
    pub sign_transcript: bool,

    /// Skip overlay bootstrap entirely; dials go over loopback TCP
    pub offline: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".cwtch"),
            listen_port: 9878,
            virtual_port: 9878,
            socks_addr: "127.0.0.1:9050".to_string(),
            control_addr: "127.0.0.1:9051".to_string(),
            connect_timeout_secs: 60,
            handshake_timeout_secs: 30,
            padding_enabled: true,
            traffic_scramble: true,
            ghost_mode: false,
            sign_transcript: false,
            offline: false,
        }
    }
}

impl CoreConfig {
    pub fn padding_on(&self) -> bool {
        self.padding_enabled || self.ghost_mode
    }

    pub fn scramble_on(&self) -> bool {
        self.traffic_scramble || self.ghost_mode
    }

    pub fn ensure_data_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
