//! The site's HTTP front end: a small blocking server with one thread per
//! connection, routing into the detection pipeline and session store.

use anyhow::{anyhow, Result};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::auth::Credentials;
use crate::config::AppConfig;
use crate::detect::ModelHandle;
use crate::session::SessionStore;
use crate::storage::StoragePaths;

pub mod http;
pub mod pages;
mod routes;

#[derive(Clone, Debug)]
pub struct WebConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl WebConfig {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            addr: cfg.addr.clone(),
            max_upload_bytes: cfg.max_upload_bytes,
        }
    }
}

/// Everything a request handler can touch. Loaded once at startup.
pub struct AppState {
    pub storage: StoragePaths,
    pub model: ModelHandle,
    pub sessions: SessionStore,
    pub credentials: Credentials,
}

impl AppState {
    pub fn new(
        storage: StoragePaths,
        model: ModelHandle,
        sessions: SessionStore,
        credentials: Credentials,
    ) -> Self {
        Self {
            storage,
            model,
            sessions,
            credentials,
        }
    }

    pub fn from_config(cfg: &AppConfig, model: ModelHandle) -> Self {
        Self::new(
            StoragePaths::from_settings(&cfg.storage),
            model,
            SessionStore::new(&cfg.secret_key),
            Credentials::from_config(cfg),
        )
    }
}

#[derive(Debug)]
pub struct WebHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WebHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("web server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct WebServer {
    cfg: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(cfg: WebConfig, state: AppState) -> Self {
        Self {
            cfg,
            state: Arc::new(state),
        }
    }

    /// Bind the listener and start accepting on a background thread.
    pub fn spawn(self) -> Result<WebHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = Arc::new(self.cfg);
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, cfg, state, shutdown_thread) {
                log::error!("web server stopped: {}", err);
            }
        });
        log::info!("listening on http://{}", addr);

        Ok(WebHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    cfg: Arc<WebConfig>,
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                let cfg = cfg.clone();
                let state = state.clone();
                std::thread::spawn(move || {
                    if let Err(err) = routes::handle_connection(stream, &state, &cfg) {
                        log::warn!("request from {} rejected: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
