//! Raw PCM input: 16-bit little-endian interleaved samples, no header.

use std::path::{Path, PathBuf};
use std::time::Duration;

const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum PcmError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is empty")]
    Empty { path: PathBuf },
    #[error("{path} holds {len} bytes, not a whole number of {frame}-byte frames")]
    Misaligned {
        path: PathBuf,
        len: usize,
        frame: usize,
    },
}

/// Audio layout used to size and pace outgoing chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn frame_bytes(&self) -> usize {
        BYTES_PER_SAMPLE * self.channels as usize
    }

    /// Bytes covering `chunk_ms` of audio, rounded down to whole frames (at least one).
    pub fn chunk_bytes(&self, chunk_ms: u32) -> usize {
        let frame = self.frame_bytes();
        let frames = self.sample_rate as u64 * chunk_ms as u64 / 1000;
        (frames as usize).max(1) * frame
    }

    /// Playback duration of `bytes` of audio.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = (bytes / self.frame_bytes()) as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

pub async fn load_pcm(path: &Path, format: PcmFormat) -> Result<Vec<u8>, PcmError> {
    let data = tokio::fs::read(path).await.map_err(|source| PcmError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if data.is_empty() {
        return Err(PcmError::Empty {
            path: path.to_path_buf(),
        });
    }
    let frame = format.frame_bytes();
    if data.len() % frame != 0 {
        return Err(PcmError::Misaligned {
            path: path.to_path_buf(),
            len: data.len(),
            frame,
        });
    }
    Ok(data)
}
