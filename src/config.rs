//! Configuration loaded from the environment (and an optional `.env` file).

use std::env;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} env var required")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// S3-compatible object storage (Cloudflare R2 by default).
    S3(S3Settings),
    /// A local directory standing in for a bucket.
    Fs { bucket_dir: PathBuf },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Settings {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// `https://{ACCOUNT_ID}.r2.cloudflarestorage.com` unless overridden.
    pub endpoint_url: String,
    pub region: String,
}

/// Knobs that shape how a single job runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    pub local_root: PathBuf,
    pub output_root: PathBuf,
    /// `None` disables the per-stage limit.
    pub stage_timeout: Option<Duration>,
    /// Attempts per transfer, including the first.
    pub transfer_attempts: u32,
    pub transfer_backoff: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("./data/chunks"),
            output_root: PathBuf::from("./data/output"),
            stage_timeout: Some(Duration::from_secs(7200)),
            transfer_attempts: 3,
            transfer_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: u16,
    pub storage: StorageBackend,
    pub pipeline: PipelineSettings,
    pub whisper_model_dir: PathBuf,
    pub ffmpeg_bin: String,
    pub workers_count: usize,
    pub queue_capacity: usize,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let or = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let storage = match or("STORAGE_BACKEND", "s3").as_str() {
            "s3" => StorageBackend::S3(s3_settings(&var)?),
            "fs" => StorageBackend::Fs {
                bucket_dir: PathBuf::from(or("FS_BUCKET_DIR", "./data/bucket")),
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let defaults = PipelineSettings::default();
        let timeout_secs: u64 = parse_or(&var, "STAGE_TIMEOUT_SECS", 7200)?;
        let pipeline = PipelineSettings {
            local_root: var("LOCAL_ROOT").map(PathBuf::from).unwrap_or(defaults.local_root),
            output_root: var("OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            stage_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            transfer_attempts: parse_or(&var, "TRANSFER_RETRIES", defaults.transfer_attempts)?
                .max(1),
            transfer_backoff: Duration::from_millis(parse_or(
                &var,
                "TRANSFER_BACKOFF_MS",
                defaults.transfer_backoff.as_millis() as u64,
            )?),
        };

        if roots_overlap(&pipeline.local_root, &pipeline.output_root) {
            return Err(ConfigError::Invalid {
                name: "OUTPUT_ROOT",
                value: format!(
                    "{} (overlaps LOCAL_ROOT {})",
                    pipeline.output_root.display(),
                    pipeline.local_root.display()
                ),
            });
        }

        Ok(Self {
            addr: or("ADDR", "0.0.0.0"),
            port: parse_or(&var, "PORT", 5000)?,
            storage,
            pipeline,
            whisper_model_dir: PathBuf::from(or("WHISPER_MODEL_DIR", "./models")),
            ffmpeg_bin: or("FFMPEG_BIN", "ffmpeg"),
            workers_count: parse_or::<_, usize>(&var, "WORKERS_COUNT", 2)?.max(1),
            queue_capacity: parse_or::<_, usize>(&var, "QUEUE_CAPACITY", 64)?.max(1),
        })
    }
}

/// Job directories are `<root>/<meeting>/<take>/<user>` under both roots, so
/// one root inside the other lets a job wipe another job's files.
fn roots_overlap(a: &Path, b: &Path) -> bool {
    let clean = |p: &Path| -> PathBuf {
        p.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    };
    let (a, b) = (clean(a), clean(b));
    a.starts_with(&b) || b.starts_with(&a)
}

fn s3_settings<F>(var: &F) -> Result<S3Settings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

    let endpoint_url = match var("S3_ENDPOINT_URL") {
        Some(url) => url,
        None => format!(
            "https://{}.r2.cloudflarestorage.com",
            required("ACCOUNT_ID")?
        ),
    };

    Ok(S3Settings {
        access_key_id: required("S3_ACCESS_KEY_ID")?,
        secret_access_key: required("S3_SECRET_ACCESS_KEY")?,
        bucket: required("S3_BUCKET_NAME")?,
        endpoint_url,
        region: var("S3_REGION").unwrap_or_else(|| "auto".to_string()),
    })
}

fn parse_or<F, T>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match var(name) {
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(_) => Err(ConfigError::Invalid { name, value }),
        },
        None => Ok(default),
    }
}
