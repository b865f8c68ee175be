// Audio output helpers for synthesized speech

// Shared audio utilities
pub(crate) mod utils;

pub mod wav;

pub use wav::{build_wave_header, WaveContainerWriter, WaveFormat, WAVE_HEADER_LEN};
