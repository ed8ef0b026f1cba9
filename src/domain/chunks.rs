//! Classifies downloaded chunk files and orders them by sequence index.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// `{kind}[-{producer}]_{index}.{ext}`, e.g. `video_3.webm` or `audio-mic_0.webm`.
static CHUNK_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(video|audio)(?:-([A-Za-z0-9]+))?_(\d+)\.([A-Za-z0-9]+)$")
        .expect("chunk name pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub kind: MediaKind,
    pub producer: Option<String>,
    pub index: u32,
    pub path: PathBuf,
}

impl Chunk {
    /// Parse a chunk from its file name. Returns `None` for names that do not
    /// follow the recorder's naming scheme.
    pub fn parse(path: &Path) -> Option<Chunk> {
        let name = path.file_name()?.to_str()?;
        let caps = CHUNK_NAME.captures(name)?;
        let kind = match &caps[1] {
            "video" => MediaKind::Video,
            _ => MediaKind::Audio,
        };
        let index = caps[3].parse().ok()?;

        Some(Chunk {
            kind,
            producer: caps.get(2).map(|m| m.as_str().to_string()),
            index,
            path: path.to_path_buf(),
        })
    }
}

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("no {0} chunks found")]
    Missing(MediaKind),

    #[error("{kind} chunks have a gap: expected index {expected}, found {found}")]
    Gap {
        kind: MediaKind,
        expected: u32,
        found: u32,
    },

    #[error("{kind} chunk index {index} appears more than once")]
    Duplicate { kind: MediaKind, index: u32 },

    #[error("{kind} chunks come from more than one producer: {producers:?}")]
    MixedProducers {
        kind: MediaKind,
        producers: Vec<String>,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Video and audio chunks, each ordered by index starting at 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizedChunks {
    pub video: Vec<Chunk>,
    pub audio: Vec<Chunk>,
}

impl OrganizedChunks {
    pub fn paths(chunks: &[Chunk]) -> Vec<PathBuf> {
        chunks.iter().map(|c| c.path.clone()).collect()
    }
}

/// Organize every chunk file directly inside `dir`.
pub fn organize(dir: &Path) -> Result<OrganizedChunks, OrganizeError> {
    let io_err = |source| OrganizeError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_type().map_err(io_err)?.is_file() {
            paths.push(entry.path());
        }
    }

    organize_paths(paths)
}

/// Classify and order an arbitrary listing of chunk paths.
pub fn organize_paths<I>(paths: I) -> Result<OrganizedChunks, OrganizeError>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut organized = OrganizedChunks::default();

    for path in paths {
        match Chunk::parse(&path) {
            Some(chunk) => match chunk.kind {
                MediaKind::Video => organized.video.push(chunk),
                MediaKind::Audio => organized.audio.push(chunk),
            },
            None => warn!(path = %path.display(), "ignoring file with unrecognised chunk name"),
        }
    }

    order(MediaKind::Video, &mut organized.video)?;
    order(MediaKind::Audio, &mut organized.audio)?;

    debug!(
        video = organized.video.len(),
        audio = organized.audio.len(),
        "organized chunks"
    );
    Ok(organized)
}

fn order(kind: MediaKind, chunks: &mut [Chunk]) -> Result<(), OrganizeError> {
    if chunks.is_empty() {
        return Err(OrganizeError::Missing(kind));
    }

    let mut producers: Vec<String> = chunks
        .iter()
        .map(|c| c.producer.clone().unwrap_or_default())
        .collect();
    producers.sort();
    producers.dedup();
    if producers.len() > 1 {
        return Err(OrganizeError::MixedProducers { kind, producers });
    }

    chunks.sort_by_key(|c| c.index);

    for (expected, chunk) in chunks.iter().enumerate() {
        let expected = expected as u32;
        if chunk.index < expected {
            return Err(OrganizeError::Duplicate {
                kind,
                index: chunk.index,
            });
        }
        if chunk.index > expected {
            return Err(OrganizeError::Gap {
                kind,
                expected,
                found: chunk.index,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn listing(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("chunks").join(n)).collect()
    }

    fn indices(chunks: &[Chunk]) -> Vec<u32> {
        chunks.iter().map(|c| c.index).collect()
    }

    #[test]
    fn test_parse_chunk_names() {
        let chunk = Chunk::parse(Path::new("dir/video_12.webm")).unwrap();
        assert_eq!(chunk.kind, MediaKind::Video);
        assert_eq!(chunk.index, 12);
        assert_eq!(chunk.producer, None);

        let chunk = Chunk::parse(Path::new("audio-mic2_0.webm")).unwrap();
        assert_eq!(chunk.kind, MediaKind::Audio);
        assert_eq!(chunk.producer.as_deref(), Some("mic2"));

        assert!(Chunk::parse(Path::new("screen_1.webm")).is_none());
        assert!(Chunk::parse(Path::new("video_one.webm")).is_none());
        assert!(Chunk::parse(Path::new("video_1")).is_none());
    }

    #[test]
    fn test_sorts_by_index_not_listing_order() {
        let organized = organize_paths(listing(&[
            "video_2.webm",
            "audio_1.webm",
            "video_10.webm",
            "video_0.webm",
            "audio_0.webm",
            "video_1.webm",
            "video_3.webm",
            "video_4.webm",
            "video_5.webm",
            "video_6.webm",
            "video_7.webm",
            "video_8.webm",
            "video_9.webm",
        ]))
        .unwrap();

        assert_eq!(indices(&organized.video), (0..=10).collect::<Vec<_>>());
        assert_eq!(indices(&organized.audio), vec![0, 1]);
    }

    #[test]
    fn test_gap_is_an_error() {
        let err = organize_paths(listing(&[
            "video_0.webm",
            "video_1.webm",
            "video_3.webm",
            "audio_0.webm",
        ]))
        .unwrap_err();

        assert!(matches!(
            err,
            OrganizeError::Gap {
                kind: MediaKind::Video,
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn test_missing_first_chunk_is_a_gap() {
        let err = organize_paths(listing(&["video_1.webm", "audio_0.webm"])).unwrap_err();
        assert!(matches!(err, OrganizeError::Gap { expected: 0, .. }));
    }

    #[test]
    fn test_missing_media_kind() {
        let err = organize_paths(listing(&["video_0.webm"])).unwrap_err();
        assert!(matches!(err, OrganizeError::Missing(MediaKind::Audio)));

        let err = organize_paths(listing(&["audio_0.webm"])).unwrap_err();
        assert!(matches!(err, OrganizeError::Missing(MediaKind::Video)));
    }

    #[test]
    fn test_duplicate_index() {
        let err = organize_paths(listing(&[
            "video_0.webm",
            "video_0.mkv",
            "audio_0.webm",
        ]))
        .unwrap_err();
        assert!(matches!(err, OrganizeError::Duplicate { index: 0, .. }));
    }

    #[test]
    fn test_mixed_producers() {
        let err = organize_paths(listing(&[
            "video-cam_0.webm",
            "video-screen_1.webm",
            "audio_0.webm",
        ]))
        .unwrap_err();
        assert!(matches!(err, OrganizeError::MixedProducers { kind: MediaKind::Video, .. }));
    }

    #[test]
    fn test_unparseable_names_ignored() {
        let organized = organize_paths(listing(&[
            "video_0.webm",
            "audio_0.webm",
            "notes.txt",
            ".DS_Store",
        ]))
        .unwrap();
        assert_eq!(organized.video.len(), 1);
        assert_eq!(organized.audio.len(), 1);
    }

    #[test]
    fn test_organize_reads_directory() {
        let dir = tempdir().unwrap();
        for name in ["video_1.webm", "video_0.webm", "audio_0.webm", "readme.md"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("video_2.webm")).unwrap();

        let organized = organize(dir.path()).unwrap();
        assert_eq!(indices(&organized.video), vec![0, 1]);
        assert_eq!(organized.video[0].path, dir.path().join("video_0.webm"));
    }
}
