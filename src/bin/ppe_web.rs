//! ppe_web - PPE detection web service
//!
//! This daemon:
//! 1. Loads configuration from `PPE_CONFIG` and the environment
//! 2. Prepares the upload and output directories
//! 3. Loads the detector model once (the site keeps running without it)
//! 4. Serves the site until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use ppe_vision::{
    config::AppConfig, AppState, ModelHandle, StoragePaths, StubBackend, WebConfig, WebServer,
};

#[derive(Parser, Debug)]
#[command(name = "ppe_web", about = "Serve the PPE detection site")]
struct Args {
    /// Listen address; overrides PORT and the config file.
    #[arg(long, env = "PPE_ADDR")]
    addr: Option<String>,

    /// ONNX detector weights; overrides the config file.
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Use the built-in stub detector (reports no objects).
    #[arg(long, conflicts_with = "model")]
    stub_model: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = AppConfig::load()?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(path) = args.model {
        config.model.path = path;
    }
    config.validate()?;

    if config.uses_default_secret() {
        log::warn!("SECRET_KEY is not set; session cookies use the built-in default key");
    }
    if !config.has_credentials() {
        log::warn!("APP_EMAIL/APP_PASSWORD not set; every login attempt will fail");
    }

    let storage = StoragePaths::from_settings(&config.storage);
    storage.ensure()?;
    log::info!(
        "uploads in {}, detector output in {}",
        storage.upload_dir.display(),
        storage.output_dir.join(&storage.run_name).display()
    );

    let model = if args.stub_model {
        log::info!("using stub detector");
        ModelHandle::from_backend(StubBackend::new())
    } else {
        ModelHandle::load(&config.model.path, config.model.confidence_threshold)
    };
    match model.backend_name() {
        Some(name) => log::info!("detector ready ({})", name),
        None => log::warn!("detector unavailable; uploads will report Model Not Loaded"),
    }

    let state = AppState::from_config(&config, model);
    let handle = WebServer::new(WebConfig::from_config(&config), state).spawn()?;
    log::info!("ppe_web serving {}", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("ppe_web waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping web server...");
    handle.stop()?;

    Ok(())
}
