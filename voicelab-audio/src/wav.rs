//! Canonical 44-byte RIFF/WAVE container for raw PCM.
//!
//! Layout (all integers little-endian):
//!
//! | offset | field                               |
//! |--------|-------------------------------------|
//! | 0      | `RIFF`                              |
//! | 4      | 36 + data length                    |
//! | 8      | `WAVE`                              |
//! | 12     | `fmt `, size 16, format 1 (PCM)     |
//! | 22     | channels, sample rate, byte rate    |
//! | 32     | block align, bits per sample        |
//! | 36     | `data`, data length                 |

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tokio::task;
use tracing::{debug, error};
use voicelab_core::{Result, VoiceLabError};

use crate::utils::gen_id;

pub const WAVE_HEADER_LEN: usize = 44;
/// Largest data chunk whose RIFF size still fits in 32 bits.
pub const MAX_DATA_LEN: usize = (u32::MAX - 36) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    /// 16-bit mono, the worker's streaming format.
    pub fn mono_pcm16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }

    fn validate(&self) -> io::Result<()> {
        if self.channels == 0 || self.sample_rate == 0 {
            return Err(invalid("channels and sample rate must be non-zero"));
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 {
            return Err(invalid("bits per sample must be a positive multiple of 8"));
        }
        let align = self
            .channels
            .checked_mul(self.bits_per_sample / 8)
            .ok_or_else(|| invalid("block align overflows 16 bits"))?;
        self.sample_rate
            .checked_mul(u32::from(align))
            .map(|_| ())
            .ok_or_else(|| invalid("byte rate overflows 32 bits"))
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

/// Header for `data_len` bytes of PCM in `format`.
///
/// Fails with `InvalidInput` for an unusable format or a data length that
/// does not fit the 32-bit size fields.
pub fn build_wave_header(data_len: usize, format: WaveFormat) -> io::Result<[u8; WAVE_HEADER_LEN]> {
    format.validate()?;
    if data_len > MAX_DATA_LEN {
        return Err(invalid("PCM data too large for a WAV container"));
    }
    let data_len = data_len as u32;

    let mut header = [0u8; WAVE_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    Ok(header)
}

/// Writes PCM buffers as uniquely named `.wav` files in one directory.
#[derive(Debug, Clone)]
pub struct WaveContainerWriter {
    output_dir: PathBuf,
}

impl WaveContainerWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `pcm` with a 44-byte header to `stream_<id>.wav` and return the
    /// path. Nothing is created when the input is rejected.
    pub fn write(&self, pcm: &[u8], format: WaveFormat) -> Result<PathBuf> {
        let header = build_wave_header(pcm.len(), format)?;
        let path = self.output_dir.join(format!("stream_{}.wav", gen_id()));

        let written = fs::create_dir_all(&self.output_dir)
            .and_then(|_| File::create(&path))
            .and_then(|mut file| {
                file.write_all(&header)?;
                file.write_all(pcm)?;
                file.flush()
            });
        if let Err(e) = written {
            error!(target: "wav_writer", path = %path.display(), error = %e, "Failed to write WAV file");
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }

        debug!(
            target: "wav_writer",
            path = %path.display(),
            data_len = pcm.len(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Wrote WAV file"
        );
        Ok(path)
    }

    /// [`Self::write`] on the blocking pool.
    pub async fn write_async(&self, pcm: Vec<u8>, format: WaveFormat) -> Result<PathBuf> {
        let writer = self.clone();
        task::spawn_blocking(move || writer.write(&pcm, format))
            .await
            .map_err(|e| VoiceLabError::InvalidState(format!("WAV writer task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unusable_formats() {
        let bad = [
            WaveFormat { sample_rate: 0, channels: 1, bits_per_sample: 16 },
            WaveFormat { sample_rate: 24_000, channels: 0, bits_per_sample: 16 },
            WaveFormat { sample_rate: 24_000, channels: 1, bits_per_sample: 12 },
            WaveFormat { sample_rate: 24_000, channels: 1, bits_per_sample: 0 },
        ];
        for format in bad {
            let err = build_wave_header(0, format).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{:?}", format);
        }
    }

    #[test]
    fn stereo_24bit_fields() {
        let format = WaveFormat { sample_rate: 48_000, channels: 2, bits_per_sample: 24 };
        let header = build_wave_header(600, format).unwrap();
        assert_eq!(u16::from_le_bytes([header[32], header[33]]), 6);
        assert_eq!(
            u32::from_le_bytes([header[28], header[29], header[30], header[31]]),
            288_000
        );
    }
}
