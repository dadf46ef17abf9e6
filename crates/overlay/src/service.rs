//! Overlay service lifecycle: listener, hidden-service publication, dialing,
//! and observable status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use cwtch_core::peer::encode_base32;
use cwtch_core::{CoreConfig, Dialer, DynStream, Error};

use crate::control::ControlClient;
use crate::dialer::socks5_connect;

const INCOMING_QUEUE_DEPTH: usize = 16;

/// Observable state, delivered through a `watch` channel so the host can
/// render progress without polling.
#[derive(Debug, Clone)]
pub struct OverlayStatus {
    pub onion_address: Option<String>,
    pub status_message: String,
    pub connected: bool,
    /// Bootstrap progress in `[0, 1]`.
    pub progress: f32,
}

impl Default for OverlayStatus {
    fn default() -> Self {
        Self {
            onion_address: None,
            status_message: "idle".to_string(),
            connected: false,
            progress: 0.0,
        }
    }
}

struct RunState {
    running: bool,
    local_port: u16,
    accept_task: Option<JoinHandle<()>>,
    control: Option<ControlClient>,
    service_id: Option<String>,
}

pub struct OverlayService {
    config: CoreConfig,
    status: watch::Sender<OverlayStatus>,
    incoming_tx: mpsc::Sender<DynStream>,
    incoming_rx: std::sync::Mutex<Option<mpsc::Receiver<DynStream>>>,
    state: Mutex<RunState>,
}

impl OverlayService {
    pub fn new(config: CoreConfig) -> Arc<Self> {
        let (status, _) = watch::channel(OverlayStatus::default());
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_QUEUE_DEPTH);
        Arc::new(Self {
            config,
            status,
            incoming_tx,
            incoming_rx: std::sync::Mutex::new(Some(incoming_rx)),
            state: Mutex::new(RunState {
                running: false,
                local_port: 0,
                accept_task: None,
                control: None,
                service_id: None,
            }),
        })
    }

    /// Subscribe to status updates.
    pub fn status(&self) -> watch::Receiver<OverlayStatus> {
        self.status.subscribe()
    }

    pub fn onion_address(&self) -> Option<String> {
        self.status.borrow().onion_address.clone()
    }

    /// The queue of accepted inbound sockets. Can be taken exactly once;
    /// the peer manager drains it.
    pub fn take_incoming(&self) -> Option<mpsc::Receiver<DynStream>> {
        self.incoming_rx.lock().unwrap().take()
    }

    pub async fn local_port(&self) -> u16 {
        self.state.lock().await.local_port
    }

    /// Bind the local listener and, unless in offline simulation, publish
    /// the hidden service through the control port.
    pub async fn start(&self) -> Result<()> {
        let local_port = {
            let mut state = self.state.lock().await;
            if state.running {
                return Ok(());
            }

            let listener = TcpListener::bind(("127.0.0.1", self.config.listen_port))
                .await
                .with_context(|| {
                    format!("binding local listener on port {}", self.config.listen_port)
                })?;
            let local_port = listener.local_addr()?.port();
            self.set_status(|s| {
                s.progress = 0.2;
                s.status_message = format!("listening on 127.0.0.1:{}", local_port);
            });

            let incoming = self.incoming_tx.clone();
            let accept_task = tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((socket, addr)) => {
                            tracing::debug!("accepted inbound connection from {}", addr);
                            if incoming.send(Box::pin(socket) as DynStream).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("accept failed: {}", e);
                        }
                    }
                }
            });

            state.running = true;
            state.local_port = local_port;
            state.accept_task = Some(accept_task);
            local_port
        };

        if self.config.offline {
            let address = fabricate_onion_address();
            tracing::info!("offline simulation, fabricated address {}", address);
            self.set_status(|s| {
                s.onion_address = Some(address);
                s.status_message = "offline simulation".to_string();
                s.connected = true;
                s.progress = 1.0;
            });
            return Ok(());
        }

        self.set_status(|s| {
            s.progress = 0.4;
            s.status_message = "connecting to control port".to_string();
        });
        let bootstrap: Result<(ControlClient, String)> = async {
            let mut control = ControlClient::connect(&self.config.control_addr).await?;
            self.set_status(|s| {
                s.progress = 0.6;
                s.status_message = "authenticating".to_string();
            });
            control.authenticate().await?;

            self.set_status(|s| {
                s.progress = 0.8;
                s.status_message = "publishing hidden service".to_string();
            });
            let service_id = control
                .add_onion(self.config.virtual_port, local_port)
                .await?;
            Ok((control, service_id))
        }
        .await;

        let (control, service_id) = match bootstrap {
            Ok(parts) => parts,
            Err(e) => {
                self.set_status(|s| {
                    s.status_message = format!("overlay bootstrap failed: {e:#}");
                });
                return Err(e);
            }
        };

        let address = format!("{}.onion", service_id);
        tracing::info!("hidden service published at {}", address);
        self.set_status(|s| {
            s.onion_address = Some(address);
            s.status_message = "hidden service published".to_string();
            s.connected = true;
            s.progress = 1.0;
        });

        let mut state = self.state.lock().await;
        if !state.running {
            // Cancelled while the bootstrap was in flight.
            let mut control = control;
            let _ = control.del_onion(&service_id).await;
            self.set_status(|s| {
                s.onion_address = None;
                s.connected = false;
                s.progress = 0.0;
            });
            return Ok(());
        }
        state.control = Some(control);
        state.service_id = Some(service_id);
        Ok(())
    }

    /// Abort a bootstrap in progress or tear a running service down.
    pub async fn cancel(&self) {
        self.stop().await;
    }

    /// Close the listener, withdraw the hidden service, stop accepting.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !state.running {
            return;
        }
        state.running = false;

        if let Some(task) = state.accept_task.take() {
            task.abort();
        }
        if let (Some(mut control), Some(id)) = (state.control.take(), state.service_id.take()) {
            if let Err(e) = control.del_onion(&id).await {
                tracing::warn!("withdrawing hidden service failed: {}", e);
            }
        }

        self.set_status(|s| {
            s.onion_address = None;
            s.status_message = "stopped".to_string();
            s.connected = false;
            s.progress = 0.0;
        });
        tracing::info!("overlay service stopped");
    }

    fn set_status<F: FnOnce(&mut OverlayStatus)>(&self, update: F) {
        self.status.send_modify(update);
    }
}

#[async_trait]
impl Dialer for OverlayService {
    async fn dial(&self, address: &str) -> cwtch_core::Result<DynStream> {
        let deadline = Duration::from_secs(self.config.connect_timeout_secs);

        if self.config.offline {
            // Offline simulation routes every dial to the loopback virtual
            // port so local instances can talk without the overlay.
            let stream = tokio::time::timeout(
                deadline,
                TcpStream::connect(("127.0.0.1", self.config.virtual_port)),
            )
            .await
            .map_err(|_| Error::Timeout)??;
            return Ok(Box::pin(stream));
        }

        tracing::debug!("dialing {} via socks proxy {}", address, self.config.socks_addr);
        let stream = tokio::time::timeout(
            deadline,
            socks5_connect(&self.config.socks_addr, address, self.config.virtual_port),
        )
        .await
        .map_err(|_| Error::Timeout)??;
        Ok(Box::pin(stream))
    }
}

/// A plausible 56-character onion address for display in offline mode.
fn fabricate_onion_address() -> String {
    let mut raw = [0u8; 35];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    format!("{}.onion", encode_base32(&raw))
}
