use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

const DEFAULT_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_SECRET_KEY: &str = "change_this_in_render";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_OUTPUT_DIR: &str = "yolo_output";
const DEFAULT_CONTACT_LOG: &str = "contact_messages.txt";
const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    addr: Option<String>,
    secret_key: Option<String>,
    email: Option<String>,
    password: Option<String>,
    max_upload_bytes: Option<usize>,
    storage: Option<StorageConfigFile>,
    model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    upload_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    contact_log: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: String,
    pub secret_key: Zeroizing<String>,
    pub email: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub max_upload_bytes: usize,
    pub storage: StorageSettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub contact_log: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub confidence_threshold: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(AppConfigFile::default())
    }
}

impl AppConfig {
    /// Load from the JSON file named by `PPE_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PPE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let storage = file.storage.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        Self {
            addr: file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            secret_key: Zeroizing::new(
                file.secret_key
                    .unwrap_or_else(|| DEFAULT_SECRET_KEY.to_string()),
            ),
            email: file.email,
            password: file.password.map(Zeroizing::new),
            max_upload_bytes: file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            storage: StorageSettings {
                upload_dir: storage
                    .upload_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
                output_dir: storage
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                contact_log: storage
                    .contact_log
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTACT_LOG)),
            },
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                confidence_threshold: model
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            if !port.trim().is_empty() {
                let port: u16 = port
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("PORT must be an integer in 0..=65535"))?;
                self.addr = format!("0.0.0.0:{port}");
            }
        }
        if let Ok(key) = std::env::var("SECRET_KEY") {
            if !key.is_empty() {
                self.secret_key = Zeroizing::new(key);
            }
        }
        if let Ok(email) = std::env::var("APP_EMAIL") {
            self.email = Some(email);
        }
        if let Ok(password) = std::env::var("APP_PASSWORD") {
            self.password = Some(Zeroizing::new(password));
        }
        if let Ok(dir) = std::env::var("PPE_UPLOAD_DIR") {
            if !dir.trim().is_empty() {
                self.storage.upload_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("PPE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.storage.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("PPE_CONTACT_LOG") {
            if !path.trim().is_empty() {
                self.storage.contact_log = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("PPE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| anyhow!("listen address '{}' is not host:port", self.addr))?;
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        let t = self.model.confidence_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(anyhow!("confidence_threshold must be in (0, 1]"));
        }
        if self.storage.upload_dir == self.storage.output_dir {
            return Err(anyhow!("upload_dir and output_dir must differ"));
        }
        Ok(())
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret_key.as_str() == DEFAULT_SECRET_KEY
    }

    pub fn has_credentials(&self) -> bool {
        self.email.is_some() && self.password.is_some()
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
