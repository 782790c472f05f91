use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, FromSample, SampleFormat, SizedSample, StreamConfig, SupportedStreamConfig};
use crossbeam_channel::Sender;
use log::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::SynthError;
use crate::pump::Pump;

/// Keeps output running while alive. Dropping it releases the device and
/// the render context; the pump is dropped with it.
pub trait OutputStream {}

impl OutputStream for cpal::Stream {}

/// Something that can pull audio from a [`Pump`].
pub trait AudioBackend {
    /// Rate the pump must render at. Known before the stream is opened.
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Moves the pump into the render context and starts pulling. Failures
    /// after this returns are sent to `errors`.
    fn open(self, pump: Pump, errors: Sender<SynthError>) -> Result<Box<dyn OutputStream>, SynthError>;
}

fn audio_error(e: impl std::fmt::Display) -> SynthError {
    SynthError::AudioError(e.to_string())
}

/// Sound card output through cpal.
pub struct CpalBackend {
    device: cpal::Device,
    supported: SupportedStreamConfig,
    buffer_size: Option<u32>,
}

impl CpalBackend {
    /// Default host; the named device if `config.device` is set, else the
    /// default output device.
    pub fn new(config: &EngineConfig) -> Result<Self, SynthError> {
        let host = cpal::default_host();
        let device = match &config.device {
            Some(name) => host
                .output_devices()
                .map_err(audio_error)?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| SynthError::AudioError(format!("No output device named '{}'", name)))?,
            None => host
                .default_output_device()
                .ok_or_else(|| SynthError::AudioError("No output device found".to_string()))?,
        };
        let supported = device.default_output_config().map_err(audio_error)?;

        info!(
            "Output device '{}': {} Hz, {} channels, {:?}",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            supported.sample_rate().0,
            supported.channels(),
            supported.sample_format()
        );

        Ok(CpalBackend {
            device,
            supported,
            buffer_size: config.buffer_size,
        })
    }

    fn build<T>(
        &self,
        config: &StreamConfig,
        mut pump: Pump,
        errors: Sender<SynthError>,
    ) -> Result<cpal::Stream, SynthError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = config.channels as usize;
        let err_fn = move |err: cpal::StreamError| {
            error!("Audio stream error: {}", err);
            let _ = errors.send(SynthError::AudioError(err.to_string()));
        };

        self.device
            .build_output_stream(
                config,
                move |output: &mut [T], _: &cpal::OutputCallbackInfo| pump.fill(output, channels),
                err_fn,
                None,
            )
            .map_err(audio_error)
    }
}

impl AudioBackend for CpalBackend {
    fn sample_rate(&self) -> u32 {
        self.supported.sample_rate().0
    }

    fn channels(&self) -> u16 {
        self.supported.channels()
    }

    fn open(self, pump: Pump, errors: Sender<SynthError>) -> Result<Box<dyn OutputStream>, SynthError> {
        let mut config: StreamConfig = self.supported.config();
        if let Some(frames) = self.buffer_size {
            config.buffer_size = BufferSize::Fixed(frames);
        }

        let stream = match self.supported.sample_format() {
            SampleFormat::F32 => self.build::<f32>(&config, pump, errors)?,
            SampleFormat::F64 => self.build::<f64>(&config, pump, errors)?,
            SampleFormat::I16 => self.build::<i16>(&config, pump, errors)?,
            SampleFormat::U16 => self.build::<u16>(&config, pump, errors)?,
            SampleFormat::I32 => self.build::<i32>(&config, pump, errors)?,
            other => {
                return Err(SynthError::AudioError(format!("Unsupported sample format {:?}", other)));
            }
        };

        stream.play().map_err(audio_error)?;
        Ok(Box::new(stream))
    }
}

/// Rendered samples collected by a [`HeadlessBackend`], interleaved.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    samples: Arc<Mutex<Vec<f32>>>,
}

impl Capture {
    pub fn samples(&self) -> Vec<f32> {
        match self.samples.lock() {
            Ok(samples) => samples.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.samples.lock() {
            Ok(samples) => samples.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, block: &[f32]) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.extend_from_slice(block);
        }
    }
}

/// Renders on a plain thread with no device attached. Used for tests and
/// for machines without a sound card.
pub struct HeadlessBackend {
    sample_rate: u32,
    channels: u16,
    block_size: usize,
    realtime: bool,
    capture: Option<Capture>,
}

impl HeadlessBackend {
    pub fn new(config: &EngineConfig) -> Self {
        HeadlessBackend {
            sample_rate: config.sample_rate.max(1),
            channels: config.channels.max(1),
            block_size: config.block_size.max(1),
            realtime: false,
            capture: None,
        }
    }

    /// Sleep between blocks so output advances at the speed of a device.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_capture(mut self) -> (Self, Capture) {
        let capture = Capture::default();
        self.capture = Some(capture.clone());
        (self, capture)
    }
}

impl AudioBackend for HeadlessBackend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn open(self, mut pump: Pump, _errors: Sender<SynthError>) -> Result<Box<dyn OutputStream>, SynthError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let channels = self.channels as usize;
        let frames = self.block_size;
        let sample_rate = self.sample_rate as f64;
        let realtime = self.realtime;
        let capture = self.capture;

        let handle = thread::Builder::new()
            .name("tuner-headless".to_string())
            .spawn(move || {
                let mut block = vec![0.0f32; frames * channels];
                let started = Instant::now();
                let mut rendered = 0u64;

                while !flag.load(Ordering::Acquire) && !pump.is_stopped() {
                    pump.fill(&mut block, channels);
                    rendered += frames as u64;
                    if let Some(capture) = &capture {
                        capture.append(&block);
                    }

                    if realtime {
                        let due = started + Duration::from_secs_f64(rendered as f64 / sample_rate);
                        let now = Instant::now();
                        if due > now {
                            thread::sleep(due - now);
                        }
                    } else {
                        thread::yield_now();
                    }
                }
                debug!("Headless render thread exiting after {} frames", rendered);
            })
            .map_err(audio_error)?;

        Ok(Box::new(HeadlessStream {
            shutdown,
            handle: Some(handle),
        }))
    }
}

struct HeadlessStream {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OutputStream for HeadlessStream {}

impl Drop for HeadlessStream {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Headless render thread panicked");
            }
        }
    }
}
