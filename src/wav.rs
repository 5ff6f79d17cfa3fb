use std::io::Cursor;

use base64::Engine;
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::voice::Audio;

pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

pub fn mono_16bit_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    }
}

fn f32_to_i16(x: f32) -> i16 {
    let x = x.clamp(-1.0, 1.0);
    (x * i16::MAX as f32) as i16
}

/// Encodes the whole utterance as one in-memory WAV container.
pub fn encode(audio: &Audio) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut buffer, mono_16bit_spec(audio.sample_rate))?;
        for &s in &audio.samples {
            writer.write_sample(f32_to_i16(s))?;
        }
        writer.finalize()?;
    }
    Ok(buffer.into_inner())
}

/// Base64 text form of an encoded buffer, for channels that cannot carry bytes.
pub fn to_base64(wav: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(wav)
}
