//! Acoustic features of a recorded utterance: loudness, pitch proxy, and
//! signal-to-noise ratio, computed over fixed-size analysis frames.

use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use tokio::fs;
use tokio::process::Command;
use tracing::warn;

use crate::store::types::AudioFeatures;

const FRAME_SIZE: usize = 1024;

/// Decode whatever container the browser recorded into 16-bit PCM WAV by
/// shelling out to ffmpeg.
pub async fn transcode_to_wav(input: &[u8]) -> Result<Vec<u8>> {
    let stamp = uuid::Uuid::new_v4();
    let in_path: PathBuf = std::env::temp_dir().join(format!("chatlab-{stamp}.in"));
    let out_path: PathBuf = std::env::temp_dir().join(format!("chatlab-{stamp}.wav"));

    fs::write(&in_path, input).await?;
    let result = run_ffmpeg(&in_path, &out_path).await;
    let _ = fs::remove_file(&in_path).await;
    let wav = match result {
        Ok(()) => fs::read(&out_path).await.context("read transcoded wav"),
        Err(e) => Err(e),
    };
    let _ = fs::remove_file(&out_path).await;
    wav
}

async fn run_ffmpeg(in_path: &PathBuf, out_path: &PathBuf) -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(in_path)
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-f")
        .arg("wav")
        .arg(out_path)
        .output()
        .await
        .context("spawn ffmpeg")?;
    if !output.status.success() {
        return Err(anyhow!(
            "ffmpeg failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

/// Frame-averaged features over the first channel of a WAV payload.
pub fn extract_features(wav: &[u8]) -> Result<AudioFeatures> {
    let mut reader = hound::WavReader::new(Cursor::new(wav)).context("parse wav")?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| v as f64 / scale))
                .collect::<Result<_, _>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .map(|s| s.map(|v| v as f64))
            .collect::<Result<_, _>>()?,
    };
    if samples.is_empty() {
        return Ok(AudioFeatures::default());
    }

    let frames: Vec<&[f64]> = samples.chunks(FRAME_SIZE).collect();
    let rms_per_frame: Vec<f64> = frames.iter().map(|f| rms(f)).collect();

    let loudness = mean(&rms_per_frame);
    let pitch = mean(
        &frames
            .iter()
            .map(|f| spectral_centroid(f, spec.sample_rate as f64))
            .collect::<Vec<_>>(),
    );
    let snr = snr_db(&rms_per_frame);

    Ok(AudioFeatures {
        pitch,
        loudness,
        snr,
    })
}

/// Transcode then extract, degrading to zeroed features when either step
/// fails. A turn must never be lost to a broken recording.
pub async fn process_audio(raw: &[u8]) -> (Vec<u8>, AudioFeatures) {
    let wav = match transcode_to_wav(raw).await {
        Ok(wav) => wav,
        Err(e) => {
            warn!("audio transcode failed, keeping raw payload: {e:#}");
            return (raw.to_vec(), AudioFeatures::default());
        }
    };
    let features = match extract_features(&wav) {
        Ok(features) => features,
        Err(e) => {
            warn!("feature extraction failed: {e:#}");
            AudioFeatures::default()
        }
    };
    (wav, features)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn rms(frame: &[f64]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f64>() / frame.len() as f64).sqrt()
}

/// Magnitude-weighted mean frequency of a Hann-windowed frame, a cheap pitch
/// proxy that tracks where the spectral mass sits.
fn spectral_centroid(frame: &[f64], sample_rate: f64) -> f64 {
    let n = frame.len();
    if n < 2 {
        return 0.0;
    }
    let mut buffer: Vec<Complex<f64>> = frame
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let w = 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos());
            Complex::new(s * w, 0.0)
        })
        .collect();
    FftPlanner::new().plan_fft_forward(n).process(&mut buffer);

    let bin_hz = sample_rate / n as f64;
    let mut weighted = 0.0;
    let mut mag_sum = 0.0;
    for (i, c) in buffer.iter().take(n / 2).enumerate() {
        let mag = c.norm();
        weighted += mag * i as f64 * bin_hz;
        mag_sum += mag;
    }
    if mag_sum > 0.0 {
        weighted / mag_sum
    } else {
        0.0
    }
}

/// Signal power against a noise floor estimated from the opening tenth of
/// the frames, in dB. Recordings start before the speaker does, so the
/// leading frames approximate ambient noise; the remaining frames are the
/// signal.
fn snr_db(rms_per_frame: &[f64]) -> f64 {
    if rms_per_frame.is_empty() {
        return 0.0;
    }
    let floor_frames = (rms_per_frame.len() / 10).max(1);
    let noise = mean(&rms_per_frame[..floor_frames]).max(1e-8);
    let signal = mean(&rms_per_frame[floor_frames..]).max(1e-8);
    let db = 20.0 * (signal / noise).log10();
    if db.is_finite() { db } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in samples {
                writer.write_sample(*s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn silence_yields_zeroed_features() {
        let wav = wav_bytes(&vec![0i16; 4096], 16_000);
        let features = extract_features(&wav).unwrap();
        assert_eq!(features.loudness, 0.0);
        assert_eq!(features.pitch, 0.0);
        assert_eq!(features.snr, 0.0);
    }

    #[test]
    fn sine_tone_has_energy_and_pitch() {
        let sample_rate = 16_000u32;
        let samples: Vec<i16> = (0..8192)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                ((2.0 * std::f64::consts::PI * 440.0 * t).sin() * 12_000.0) as i16
            })
            .collect();
        let wav = wav_bytes(&samples, sample_rate);
        let features = extract_features(&wav).unwrap();

        assert!(features.loudness > 0.1);
        // Centroid of a pure tone sits near the tone itself.
        assert!(features.pitch > 200.0 && features.pitch < 900.0);
    }

    #[test]
    fn snr_averages_signal_past_the_noise_frames() {
        // One leading ambient frame, nine voiced frames: 20*log10(1.0/0.01).
        let mut frames = vec![0.01];
        frames.extend(std::iter::repeat(1.0).take(9));
        let db = snr_db(&frames);
        assert!((db - 40.0).abs() < 1e-9, "snr = {db}");
    }

    #[test]
    fn truncated_payload_is_an_error() {
        assert!(extract_features(&[0x52, 0x49, 0x46, 0x46]).is_err());
    }
}
