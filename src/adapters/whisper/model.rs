use crate::domain::jobs::WhisperModel;
use crate::ports::transcription::TranscriptionError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

const HUGGINGFACE_BASE: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Anything smaller is an error page, not a model.
const MIN_MODEL_BYTES: u64 = 1_000_000;

/// One download at a time per model size, indexed by `WhisperModel::index`.
static DOWNLOADS: [Mutex<()>; 5] = [
    Mutex::const_new(()),
    Mutex::const_new(()),
    Mutex::const_new(()),
    Mutex::const_new(()),
    Mutex::const_new(()),
];

/// Ensure the model file is present in `dir`, downloading it if necessary.
pub async fn ensure_model(model: WhisperModel, dir: &Path) -> Result<PathBuf, TranscriptionError> {
    ensure_model_from(model, dir, HUGGINGFACE_BASE).await
}

async fn ensure_model_from(
    model: WhisperModel,
    dir: &Path,
    base_url: &str,
) -> Result<PathBuf, TranscriptionError> {
    let path = dir.join(model.filename());
    // Held until the file is in place, so a waiter finds it on its own check.
    let _download = DOWNLOADS[model.index()].lock().await;
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(path);
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| model_error(model, format!("failed to create {}: {e}", dir.display())))?;

    let url = format!("{base_url}/{}", model.filename());
    info!(%url, "downloading whisper model");
    download_model(model, &url, &path).await?;
    Ok(path)
}

async fn download_model(
    model: WhisperModel,
    url: &str,
    dest: &Path,
) -> Result<(), TranscriptionError> {
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| model_error(model, format!("download failed: {e}")))?;
    let expected = response.content_length();

    // Unique temp file next to the destination; removed on drop unless persisted.
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let (file, part) = NamedTempFile::new_in(dir)
        .map_err(|e| model_error(model, format!("failed to create temp file: {e}")))?
        .into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| model_error(model, format!("download interrupted: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| model_error(model, e.to_string()))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| model_error(model, e.to_string()))?;
    drop(file);

    if written < MIN_MODEL_BYTES {
        return Err(model_error(
            model,
            format!("downloaded file too small ({written} bytes)"),
        ));
    }
    if let Some(expected) = expected.filter(|e| *e != written) {
        warn!(expected, actual = written, "model size mismatch");
    }

    part.persist(dest)
        .map_err(|e| model_error(model, e.error.to_string()))?;
    info!(path = %dest.display(), size = written, "model saved");
    Ok(())
}

fn model_error(model: WhisperModel, reason: String) -> TranscriptionError {
    TranscriptionError::Model { model, reason }
}
