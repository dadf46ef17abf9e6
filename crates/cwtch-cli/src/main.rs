use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use cwtch_core::{CoreConfig, Dialer, Identity, PeerEvent, PeerManager};
use overlay::OverlayService;
use privacy::{hex_fingerprint, word_fingerprint, EncryptedStore};

const IDENTITY_FILE: &str = "identity.dat";

#[derive(Parser, Debug)]
#[command(name = "cwtch", version, about = "Anonymous P2P messenger over an onion overlay")]
struct Cli {
    /// Set log level: error,warn,info,debug,trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Data directory (defaults to ~/.cwtch)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Store passphrase; prompted on stdin when omitted
    #[arg(long, global = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a fresh identity inside the encrypted store
    Init,

    /// Show identity fingerprints and configuration
    Info,

    /// Publish the hidden service and print events as they arrive
    Listen {
        /// Skip overlay bootstrap; listener binds on loopback only
        #[arg(long)]
        offline: bool,

        /// Local listener port
        #[arg(long)]
        port: Option<u16>,

        /// Suppress presence and force traffic shaping on
        #[arg(long)]
        ghost: bool,
    },

    /// Connect to a peer and deliver one message
    Send {
        /// Peer overlay address
        #[arg(long)]
        peer: String,

        /// Message text
        #[arg(long)]
        message: String,

        /// Dial over loopback instead of the overlay
        #[arg(long)]
        offline: bool,

        /// Target port for loopback dials
        #[arg(long)]
        port: Option<u16>,
    },

    /// Destroy all local state and wipe the storage key
    Panic,

    /// Write innocuous decoy files into a directory
    Decoy {
        #[arg(long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    let data_dir = cli.data_dir.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cwtch")
    });

    match cli.cmd {
        Commands::Init => {
            let store = unlock_store(&data_dir, cli.passphrase).await?;
            if store.load(IDENTITY_FILE).await?.is_some() {
                anyhow::bail!("identity already exists in {}", data_dir.display());
            }

            let identity = Identity::generate();
            let mut secret = identity.to_bytes().to_vec();
            store.save(IDENTITY_FILE, &secret).await?;
            privacy::wipe::wipe_bytes(&mut secret);

            let mut cfg = CoreConfig::default();
            cfg.data_dir = data_dir.clone();
            save_config(&cfg)?;

            println!("✓ Identity created");
            print_fingerprints(&identity);
            println!("  Data directory: {}", data_dir.display());
        }

        Commands::Info => {
            let store = unlock_store(&data_dir, cli.passphrase).await?;
            let identity = load_identity(&store).await?;
            let cfg = load_config(&data_dir)?;

            println!("Identity:");
            print_fingerprints(&identity);
            println!("  Public key: {}", identity.public_b64());
            println!("Configuration:");
            println!("  Data directory: {}", cfg.data_dir.display());
            println!("  Listen port: {}", cfg.listen_port);
            println!("  SOCKS proxy: {}", cfg.socks_addr);
            println!("  Padding: {}", cfg.padding_on());
            println!("  Traffic scrambling: {}", cfg.scramble_on());
        }

        Commands::Listen { offline, port, ghost } => {
            let store = unlock_store(&data_dir, cli.passphrase).await?;
            let identity = load_identity(&store).await?;

            let mut cfg = load_config(&data_dir)?;
            cfg.offline = offline;
            cfg.ghost_mode = ghost || cfg.ghost_mode;
            if let Some(port) = port {
                cfg.listen_port = port;
            }

            print_fingerprints(&identity);
            listen(identity, cfg).await?;
        }

        Commands::Send {
            peer,
            message,
            offline,
            port,
        } => {
            let store = unlock_store(&data_dir, cli.passphrase).await?;
            let identity = load_identity(&store).await?;

            let mut cfg = load_config(&data_dir)?;
            cfg.offline = offline;
            if let Some(port) = port {
                cfg.virtual_port = port;
            }

            send_one(identity, cfg, &peer, &message).await?;
        }

        Commands::Panic => {
            let store = EncryptedStore::new(data_dir.clone());
            store.panic().await;
            println!("✓ Local state destroyed");
        }

        Commands::Decoy { path } => {
            privacy::decoy::create_decoy(&path)?;
            println!("✓ Decoy files written to {}", path.display());
        }
    }

    Ok(())
}

fn print_fingerprints(identity: &Identity) {
    let pubkey = identity.public_bytes();
    println!("  Fingerprint: {}", hex_fingerprint(&pubkey));
    println!("  Words: {}", word_fingerprint(&pubkey));
}

fn read_passphrase(arg: Option<String>) -> Result<Vec<char>> {
    if let Some(pass) = arg {
        return Ok(pass.chars().collect());
    }
    eprint!("Passphrase: ");
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("reading passphrase")?;
    Ok(line.trim_end_matches(['\r', '\n']).chars().collect())
}

async fn unlock_store(data_dir: &Path, passphrase: Option<String>) -> Result<EncryptedStore> {
    let store = EncryptedStore::new(data_dir.to_path_buf());
    let mut pass = read_passphrase(passphrase)?;
    store
        .unlock(&mut pass)
        .await
        .context("unlocking encrypted store")?;
    Ok(store)
}

async fn load_identity(store: &EncryptedStore) -> Result<Identity> {
    let mut secret = store
        .load(IDENTITY_FILE)
        .await
        .context("loading identity (wrong passphrase?)")?
        .context("no identity found; run 'cwtch init' first")?;
    let identity = Identity::from_bytes(&secret)?;
    privacy::wipe::wipe_bytes(&mut secret);
    Ok(identity)
}

fn load_config(data_dir: &Path) -> Result<CoreConfig> {
    let cfg_path = data_dir.join("config.json");
    if !cfg_path.exists() {
        let mut cfg = CoreConfig::default();
        cfg.data_dir = data_dir.to_path_buf();
        return Ok(cfg);
    }
    let cfg_json = std::fs::read_to_string(cfg_path)?;
    let cfg: CoreConfig = serde_json::from_str(&cfg_json)?;
    Ok(cfg)
}

fn save_config(cfg: &CoreConfig) -> Result<()> {
    std::fs::create_dir_all(&cfg.data_dir)?;
    let cfg_json = serde_json::to_string_pretty(cfg)?;
    std::fs::write(cfg.data_dir.join("config.json"), cfg_json)?;
    Ok(())
}

async fn listen(identity: Identity, cfg: CoreConfig) -> Result<()> {
    let service = OverlayService::new(cfg.clone());
    service.start().await?;

    if let Some(address) = service.onion_address() {
        println!("✓ Reachable at {}", address);
    }
    println!("  Press Ctrl+C to stop");

    let (manager, mut events) =
        PeerManager::new(identity, service.clone() as Arc<dyn Dialer>, cfg);
    manager.attach_incoming(
        service
            .take_incoming()
            .context("incoming queue already taken")?,
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down");
                break;
            }
            event = events.recv() => match event {
                Some(PeerEvent::Message { address, text }) => {
                    println!("{} → {}", address, text);
                }
                Some(PeerEvent::ConnectionStatus { address, connected }) => {
                    println!("{} {}", address, if connected { "connected" } else { "disconnected" });
                }
                None => break,
            }
        }
    }

    manager.shutdown().await;
    service.stop().await;
    Ok(())
}

async fn send_one(identity: Identity, cfg: CoreConfig, peer: &str, message: &str) -> Result<()> {
    let service = OverlayService::new(cfg.clone());
    let (manager, mut events) =
        PeerManager::new(identity, service.clone() as Arc<dyn Dialer>, cfg);

    let address = manager.add(peer, None).await;
    println!("Connecting to {}...", address);
    manager.connect(&address).await?;

    if manager.send(&address, message).await {
        println!("✓ Message sent");
    } else {
        anyhow::bail!("peer is not connected");
    }

    // Give the receiver a moment in case the peer answers immediately.
    let deadline = tokio::time::sleep(Duration::from_millis(500));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(PeerEvent::Message { address, text }) => println!("{} → {}", address, text),
                Some(_) => {}
                None => break,
            }
        }
    }

    manager.disconnect(&address).await;
    Ok(())
}
