//! Audio output using cpal.
//!
//! cpal is pull-based, so the client emulates a shared-mode event-driven
//! device: released buffers are pushed into an `rtrb` queue that the cpal
//! callback drains, padding is the queue fill, and the callback raises
//! readiness after every period it plays. The queue holds two device periods
//! so a full period is waiting whenever the callback runs.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::device::{AudioClient, AudioHost, DeviceBuffer, ReleaseFlags, RenderApi};
use super::format::{FormatTag, MixFormat, SampleFormat};
use super::signal::ReadySignal;
use cadenza_core::{Error, OutputConfig, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, SampleRate, SizedSample, Stream, StreamConfig, SupportedBufferSize,
    SupportedStreamConfig,
};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Periods the device queue holds.
const QUEUED_PERIODS: u32 = 2;

/// Period assumed when the host cannot report its buffer size range.
const UNKNOWN_PERIOD_FRAMES: u32 = 4096;

/// Host backed by the platform's default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    pub const fn new() -> Self {
        Self
    }
}

impl AudioHost for CpalHost {
    fn default_output(&mut self, config: &OutputConfig) -> Result<Box<dyn AudioClient>> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("No output device found".to_string()))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {name}");

        let default_config = device
            .default_output_config()
            .map_err(|e| Error::Device(format!("Failed to get output config: {e}")))?;

        debug!("Default output config: {:?}", default_config);

        Ok(Box::new(CpalClient {
            device,
            name,
            default_config,
            config: config.clone(),
            stream: None,
            render: None,
            buffer_frames: 0,
            flush: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Stream buffer size and device queue length for a requested period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamLayout {
    buffer_size: BufferSize,
    /// Frames the device queue holds; reported as the device buffer size.
    queue_frames: u32,
}

impl StreamLayout {
    fn new(requested: u32, supported: &SupportedBufferSize) -> Self {
        let (buffer_size, period) = match *supported {
            SupportedBufferSize::Range { min, max } => {
                let period = requested.clamp(min, max.max(min));
                (BufferSize::Fixed(period), period)
            }
            // The callback period is the host's choice; cover a generous one.
            SupportedBufferSize::Unknown => {
                (BufferSize::Default, requested.max(UNKNOWN_PERIOD_FRAMES))
            }
        };
        Self {
            buffer_size,
            queue_frames: period.max(1) * QUEUED_PERIODS,
        }
    }
}

/// Map a cpal sample format onto a mix format descriptor.
pub fn mix_format_from_cpal(
    format: cpal::SampleFormat,
    sample_rate: u32,
    channels: u16,
) -> MixFormat {
    let tag = if format.is_float() {
        FormatTag::IeeeFloat
    } else if format.is_int() {
        FormatTag::Pcm
    } else {
        // Unsigned integer layouts have no shared-mode equivalent.
        FormatTag::Other(0)
    };
    MixFormat {
        tag,
        channels,
        sample_rate,
        bits_per_sample: (format.sample_size() * 8) as u16,
    }
}

struct CpalClient {
    device: Device,
    name: String,
    default_config: SupportedStreamConfig,
    config: OutputConfig,
    stream: Option<Stream>,
    render: Option<Box<dyn RenderApi>>,
    buffer_frames: u32,
    /// Raised by `reset`; the callback drops everything queued.
    flush: Arc<AtomicBool>,
}

impl CpalClient {
    fn build<T: DeviceSample>(
        &mut self,
        stream_config: &StreamConfig,
        ready: ReadySignal,
    ) -> Result<()> {
        let channels = usize::from(stream_config.channels);
        let capacity = self.buffer_frames as usize * channels;
        let (producer, consumer) = RingBuffer::<T>::new(capacity);

        let stream = self
            .device
            .build_output_stream(
                stream_config,
                playback_callback(consumer, Arc::clone(&self.flush), ready),
                |err| error!("Audio stream error: {err}"),
                None,
            )
            .map_err(|e| Error::Initialization(format!("Failed to build stream: {e}")))?;

        // Some backends start streams on creation; hold it until `start`.
        if let Err(e) = stream.pause() {
            debug!("Stream pause after build failed: {e}");
        }

        self.render = Some(Box::new(CpalRender {
            producer,
            staged: vec![T::EQUILIBRIUM; capacity],
            channels,
            capacity,
        }));
        self.stream = Some(stream);
        Ok(())
    }
}

impl AudioClient for CpalClient {
    fn mix_format(&mut self) -> Result<MixFormat> {
        Ok(mix_format_from_cpal(
            self.default_config.sample_format(),
            self.default_config.sample_rate().0,
            self.default_config.channels(),
        ))
    }

    fn is_format_supported(&mut self, format: &MixFormat) -> bool {
        let wanted = match format.sample_format() {
            SampleFormat::Float32 => cpal::SampleFormat::F32,
            SampleFormat::Pcm16 => cpal::SampleFormat::I16,
            SampleFormat::Unsupported => return false,
        };
        self.device
            .supported_output_configs()
            .map(|mut configs| {
                configs.any(|range| {
                    range.channels() == format.channels
                        && range.sample_format() == wanted
                        && range.min_sample_rate().0 <= format.sample_rate
                        && format.sample_rate <= range.max_sample_rate().0
                })
            })
            .unwrap_or(false)
    }

    fn initialize(&mut self, format: &MixFormat, ready: ReadySignal) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::InvalidState("stream already initialized".into()));
        }
        let layout = StreamLayout::new(
            self.config.buffer_frames(format.sample_rate),
            self.default_config.buffer_size(),
        );
        debug!("Stream layout: {layout:?}");
        self.buffer_frames = layout.queue_frames;
        let stream_config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: layout.buffer_size,
        };

        match format.sample_format() {
            SampleFormat::Float32 => self.build::<f32>(&stream_config, ready),
            SampleFormat::Pcm16 => self.build::<i16>(&stream_config, ready),
            SampleFormat::Unsupported => Err(Error::UnsupportedFormat(format!(
                "{:?} with {} bits",
                self.default_config.sample_format(),
                format.bits_per_sample
            ))),
        }
    }

    fn buffer_frames(&mut self) -> Result<u32> {
        Ok(self.buffer_frames)
    }

    fn render_api(&mut self) -> Result<Box<dyn RenderApi>> {
        self.render
            .take()
            .ok_or_else(|| Error::InvalidState("render service unavailable".into()))
    }

    fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::InvalidState("stream not initialized".into()))?;
        stream
            .play()
            .map_err(|e| Error::Device(format!("Failed to start stream: {e}")))
    }

    fn stop(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::InvalidState("stream not initialized".into()))?;
        stream
            .pause()
            .map_err(|e| Error::Device(format!("Failed to pause stream: {e}")))
    }

    fn reset(&mut self) -> Result<()> {
        self.flush.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Sample types the cpal queue can carry.
trait DeviceSample: SizedSample + Send + 'static {
    fn device_buffer(samples: &mut [Self]) -> DeviceBuffer<'_>;
}

impl DeviceSample for f32 {
    fn device_buffer(samples: &mut [Self]) -> DeviceBuffer<'_> {
        DeviceBuffer::F32(samples)
    }
}

impl DeviceSample for i16 {
    fn device_buffer(samples: &mut [Self]) -> DeviceBuffer<'_> {
        DeviceBuffer::I16(samples)
    }
}

fn playback_callback<T: DeviceSample>(
    mut consumer: Consumer<T>,
    flush: Arc<AtomicBool>,
    ready: ReadySignal,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        play_period(&mut consumer, &flush, data);
        ready.notify();
    }
}

/// Fill one device period from the queue, padding with silence.
fn play_period<T: DeviceSample>(consumer: &mut Consumer<T>, flush: &AtomicBool, data: &mut [T]) {
    if flush.swap(false, Ordering::AcqRel) {
        if let Ok(chunk) = consumer.read_chunk(consumer.slots()) {
            chunk.commit_all();
        }
    }
    for sample in data.iter_mut() {
        *sample = consumer.pop().unwrap_or(T::EQUILIBRIUM);
    }
}

/// Render side of the cpal client: stages one period and queues it on release.
struct CpalRender<T: DeviceSample> {
    producer: Producer<T>,
    staged: Vec<T>,
    channels: usize,
    /// Queue capacity in samples.
    capacity: usize,
}

impl<T: DeviceSample> RenderApi for CpalRender<T> {
    fn current_padding(&mut self) -> Result<u32> {
        let queued = self.capacity - self.producer.slots();
        Ok((queued / self.channels) as u32)
    }

    fn get_buffer(&mut self, frames: u32) -> Result<Option<DeviceBuffer<'_>>> {
        let samples = frames as usize * self.channels;
        if samples > self.staged.len() {
            return Err(Error::Device(format!(
                "requested {frames} frames from a {} frame buffer",
                self.staged.len() / self.channels
            )));
        }
        Ok(Some(T::device_buffer(&mut self.staged[..samples])))
    }

    fn release_buffer(&mut self, frames: u32, flags: ReleaseFlags) -> Result<()> {
        let samples = frames as usize * self.channels;
        let chunk = self
            .producer
            .write_chunk_uninit(samples)
            .map_err(|_| Error::Device("released more frames than the device can queue".into()))?;
        match flags {
            ReleaseFlags::None => chunk.fill_from_iter(self.staged[..samples].iter().copied()),
            ReleaseFlags::Silent => chunk.fill_from_iter(std::iter::repeat(T::EQUILIBRIUM)),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render<T: DeviceSample>(frames: usize, channels: usize) -> (CpalRender<T>, Consumer<T>) {
        let capacity = frames * channels;
        let (producer, consumer) = RingBuffer::<T>::new(capacity);
        (
            CpalRender {
                producer,
                staged: vec![T::EQUILIBRIUM; capacity],
                channels,
                capacity,
            },
            consumer,
        )
    }

    #[test]
    fn test_layout_pins_period_within_supported_range() {
        let range = SupportedBufferSize::Range { min: 256, max: 4096 };

        let layout = StreamLayout::new(960, &range);
        assert_eq!(layout.buffer_size, BufferSize::Fixed(960));
        assert_eq!(layout.queue_frames, 1920);

        assert_eq!(
            StreamLayout::new(100, &range).buffer_size,
            BufferSize::Fixed(256)
        );
        let long = StreamLayout::new(8192, &range);
        assert_eq!(long.buffer_size, BufferSize::Fixed(4096));
        assert_eq!(long.queue_frames, 8192);
    }

    #[test]
    fn test_layout_covers_unknown_period() {
        let layout = StreamLayout::new(960, &SupportedBufferSize::Unknown);
        assert_eq!(layout.buffer_size, BufferSize::Default);
        assert_eq!(layout.queue_frames, 8192);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_period_after_full_refill_is_all_audio() {
        // One period of 1024 frames against a two-period queue.
        let range = SupportedBufferSize::Range { min: 64, max: 2048 };
        let layout = StreamLayout::new(1024, &range);
        let (mut api, mut consumer) = render::<f32>(layout.queue_frames as usize, 2);
        let flush = AtomicBool::new(false);
        let mut period = vec![0.0f32; 1024 * 2];

        for _ in 0..3 {
            let free = layout.queue_frames - api.current_padding().unwrap();
            if let Some(DeviceBuffer::F32(out)) = api.get_buffer(free).unwrap() {
                out.fill(0.5);
            }
            api.release_buffer(free, ReleaseFlags::None).unwrap();
            play_period(&mut consumer, &flush, &mut period);
            assert!(period.iter().all(|&s| s == 0.5));
        }
    }

    #[test]
    fn test_mix_format_mapping() {
        assert_eq!(
            mix_format_from_cpal(cpal::SampleFormat::F32, 48_000, 2).sample_format(),
            SampleFormat::Float32
        );
        assert_eq!(
            mix_format_from_cpal(cpal::SampleFormat::I16, 44_100, 2).sample_format(),
            SampleFormat::Pcm16
        );
        let wide = mix_format_from_cpal(cpal::SampleFormat::I32, 48_000, 2);
        assert_eq!(wide.bits_per_sample, 32);
        assert_eq!(wide.sample_format(), SampleFormat::Unsupported);
        let double = mix_format_from_cpal(cpal::SampleFormat::F64, 48_000, 2);
        assert_eq!(double.sample_format(), SampleFormat::Unsupported);
        let unsigned = mix_format_from_cpal(cpal::SampleFormat::U16, 48_000, 2);
        assert_eq!(unsigned.bits_per_sample, 16);
        assert_eq!(unsigned.sample_format(), SampleFormat::Unsupported);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_release_queues_staged_samples() {
        let (mut api, mut consumer) = render::<f32>(4, 2);
        assert_eq!(api.current_padding().unwrap(), 0);

        if let Some(DeviceBuffer::F32(out)) = api.get_buffer(3).unwrap() {
            out.copy_from_slice(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        }
        api.release_buffer(3, ReleaseFlags::None).unwrap();
        assert_eq!(api.current_padding().unwrap(), 3);

        let played: Vec<f32> = std::iter::from_fn(|| consumer.pop().ok()).collect();
        assert_eq!(played, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(api.current_padding().unwrap(), 0);
    }

    #[test]
    fn test_silent_release_queues_equilibrium() {
        let (mut api, mut consumer) = render::<i16>(4, 2);
        if let Some(DeviceBuffer::I16(out)) = api.get_buffer(2).unwrap() {
            out.fill(1234);
        }
        api.release_buffer(2, ReleaseFlags::Silent).unwrap();
        let played: Vec<i16> = std::iter::from_fn(|| consumer.pop().ok()).collect();
        assert_eq!(played, vec![0; 4]);
    }

    #[test]
    fn test_over_release_is_an_error() {
        let (mut api, _consumer) = render::<f32>(4, 2);
        api.release_buffer(4, ReleaseFlags::Silent).unwrap();
        assert_eq!(api.current_padding().unwrap(), 4);
        assert!(api.release_buffer(1, ReleaseFlags::Silent).is_err());
        assert!(api.get_buffer(5).is_err());
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_period_plays_queue_then_silence_and_flushes() {
        let (mut producer, mut consumer) = RingBuffer::<f32>::new(8);
        let flush = AtomicBool::new(false);

        producer.push(1.0).unwrap();
        producer.push(2.0).unwrap();
        let mut data = [9.0f32; 4];
        play_period(&mut consumer, &flush, &mut data);
        assert_eq!(data, [1.0, 2.0, 0.0, 0.0]);

        producer.push(3.0).unwrap();
        producer.push(4.0).unwrap();
        flush.store(true, Ordering::Release);
        play_period(&mut consumer, &flush, &mut data);
        assert_eq!(data, [0.0; 4]);
        assert!(!flush.load(Ordering::Acquire));
    }
}
