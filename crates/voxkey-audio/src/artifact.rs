//! The finished audio artifact handed to transcription.

use std::io::Cursor;
use std::time::Duration;

use anyhow::Context;

/// Finalized capture: a contiguous mono PCM blob plus its format.
///
/// Ownership of the artifact moves from the capture layer to the
/// transcription layer; it is never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArtifact {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Build an artifact from normalized f32 samples.
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        let samples = samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Encode the artifact as a WAV file in memory.
    pub fn to_wav_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
            for &sample in &self.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write WAV sample")?;
            }
            writer.finalize().context("Failed to finalize WAV data")?;
        }
        Ok(cursor.into_inner())
    }
}

/// Average interleaved multi-channel samples down to mono.
pub(crate) fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Simple linear interpolation resampling.
pub(crate) fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;
    let mut result = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let src_idx_floor = src_idx.floor() as usize;
        let frac = src_idx - src_idx_floor as f64;

        let sample = if src_idx_floor + 1 < samples.len() {
            let s0 = samples[src_idx_floor] as f64;
            let s1 = samples[src_idx_floor + 1] as f64;
            (s0 * (1.0 - frac) + s1 * frac) as f32
        } else if src_idx_floor < samples.len() {
            samples[src_idx_floor]
        } else {
            0.0
        };

        result.push(sample);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample() {
        // Simple test: downsampling should produce fewer samples
        let samples: Vec<f32> = (0..48000).map(|i| (i as f32 / 48000.0).sin()).collect();
        let resampled = resample(&samples, 48000, 16000);
        assert_eq!(resampled.len(), 16000);
    }

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_downmix_stereo() {
        let interleaved = vec![0.5, -0.5, 1.0, 0.0];
        assert_eq!(downmix(&interleaved, 2), vec![0.0, 0.5]);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let samples = vec![0.25, -0.25];
        assert_eq!(downmix(&samples, 1), samples);
    }

    #[test]
    fn test_artifact_duration() {
        let artifact = AudioArtifact::new(vec![0; 16_000], 16_000);
        assert_eq!(artifact.duration(), Duration::from_secs(1));
        assert_eq!(artifact.channels(), 1);
    }

    #[test]
    fn test_from_f32_clamps() {
        let artifact = AudioArtifact::from_f32(&[2.0, -2.0, 0.0], 16_000);
        assert_eq!(artifact.samples()[0], i16::MAX);
        assert_eq!(artifact.samples()[1], -i16::MAX);
        assert_eq!(artifact.samples()[2], 0);
    }

    #[test]
    fn test_wav_bytes_have_riff_header() {
        let artifact = AudioArtifact::new(vec![0, 1, -1, 2], 16_000);
        let bytes = artifact.to_wav_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }
}
