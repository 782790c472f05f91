use std::path::Path;

use log::info;

use crate::arrangement::Arrangement;
use crate::config::EngineConfig;
use crate::error::SynthError;
use crate::scheduler::Scheduler;

// Up-front reservation cap in frames (one minute at 48 kHz); longer renders
// grow the buffer as they go.
const MAX_RESERVED_FRAMES: u64 = 48_000 * 60;

/// Runs `arrangement` through a scheduler with no device attached until it
/// goes idle, or until `max_seconds` of audio if given. Returns interleaved
/// frames at `config.sample_rate` with `config.channels` channels.
pub fn render_samples(arrangement: Arrangement, config: &EngineConfig, max_seconds: Option<f64>) -> Vec<f32> {
    let channels = config.channels.max(1) as usize;
    let mut scheduler = Scheduler::from_config(config, config.sample_rate);
    // float to int casts saturate, so absurd durations clamp to u64::MAX
    let expected = (arrangement.duration() * config.sample_rate as f64).ceil() as u64;
    let limit = max_seconds.map(|s| (s.max(0.0) * config.sample_rate as f64).ceil() as u64);
    scheduler.extend(arrangement);

    let reserved = expected.min(limit.unwrap_or(u64::MAX)).min(MAX_RESERVED_FRAMES) as usize;
    let mut samples = Vec::with_capacity(reserved.saturating_mul(channels));
    let mut frame = vec![0.0f32; channels];

    while !scheduler.is_idle() {
        if limit.is_some_and(|limit| scheduler.samples_rendered() >= limit) {
            break;
        }
        scheduler.produce_sample(&mut frame);
        samples.extend_from_slice(&frame);
    }

    samples
}

/// Renders `arrangement` and writes it as a 32-bit float WAV file.
pub fn render_to_wav(arrangement: Arrangement, config: &EngineConfig, path: impl AsRef<Path>) -> Result<u64, SynthError> {
    let path = path.as_ref();
    let samples = render_samples(arrangement, config, None);

    let spec = hound::WavSpec {
        channels: config.channels.max(1),
        sample_rate: config.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let wav_error = |e: hound::Error| SynthError::FileError(format!("{}: {}", path.display(), e));

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
    for sample in &samples {
        writer.write_sample(*sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;

    let frames = (samples.len() / spec.channels as usize) as u64;
    info!(
        "Wrote {} ({} frames, {:.2}s)",
        path.display(),
        frames,
        frames as f64 / config.sample_rate as f64
    );
    Ok(frames)
}
