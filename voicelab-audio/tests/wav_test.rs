//! WAV container output: header fields and files on disk.

use std::io::ErrorKind;

use voicelab_audio::{build_wave_header, WaveContainerWriter, WaveFormat, WAVE_HEADER_LEN};
use voicelab_core::VoiceLabError;

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[test]
fn empty_mono_16bit_header() {
    let header = build_wave_header(0, WaveFormat::mono_pcm16(24_000)).unwrap();

    assert_eq!(header.len(), WAVE_HEADER_LEN);
    assert_eq!(&header[0..4], b"RIFF");
    assert_eq!(u32_at(&header, 4), 36);
    assert_eq!(&header[8..12], b"WAVE");
    assert_eq!(&header[12..16], b"fmt ");
    assert_eq!(u32_at(&header, 16), 16);
    assert_eq!(u16_at(&header, 20), 1);
    assert_eq!(u16_at(&header, 22), 1);
    assert_eq!(u32_at(&header, 24), 24_000);
    assert_eq!(u32_at(&header, 28), 48_000);
    assert_eq!(u16_at(&header, 32), 2);
    assert_eq!(u16_at(&header, 34), 16);
    assert_eq!(&header[36..40], b"data");
    assert_eq!(u32_at(&header, 40), 0);
}

#[test]
fn written_file_is_header_plus_data() {
    let dir = tempfile::tempdir().unwrap();
    let writer = WaveContainerWriter::new(dir.path().join("outputs"));
    let pcm: Vec<u8> = (0..4_800u32).map(|i| (i % 251) as u8).collect();

    let path = writer.write(&pcm, WaveFormat::mono_pcm16(24_000)).unwrap();

    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("stream_") && name.ends_with(".wav"), "{}", name);
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), WAVE_HEADER_LEN + pcm.len());
    assert_eq!(u32_at(&bytes, 4), 36 + pcm.len() as u32);
    assert_eq!(u32_at(&bytes, 40), pcm.len() as u32);
    assert_eq!(&bytes[WAVE_HEADER_LEN..], pcm.as_slice());
}

#[test]
fn each_write_gets_its_own_file() {
    let dir = tempfile::tempdir().unwrap();
    let writer = WaveContainerWriter::new(dir.path());
    let a = writer.write(&[0, 0], WaveFormat::mono_pcm16(16_000)).unwrap();
    let b = writer.write(&[0, 0], WaveFormat::mono_pcm16(16_000)).unwrap();
    assert_ne!(a, b);
}

#[test]
fn invalid_format_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("outputs");
    let writer = WaveContainerWriter::new(&out);
    let format = WaveFormat {
        sample_rate: 24_000,
        channels: 0,
        bits_per_sample: 16,
    };

    match writer.write(&[1, 2, 3, 4], format) {
        Err(VoiceLabError::IoFailure(e)) => assert_eq!(e.kind(), ErrorKind::InvalidInput),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!out.exists());
}

#[tokio::test]
async fn write_async_runs_off_the_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let writer = WaveContainerWriter::new(dir.path());
    let path = writer
        .write_async(vec![0u8; 960], WaveFormat::mono_pcm16(48_000))
        .await
        .unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 44 + 960);
}
