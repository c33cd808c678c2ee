//! In-memory output device used by the adapter and engine tests.

use super::device::{AudioClient, AudioHost, DeviceBuffer, ReleaseFlags, RenderApi};
use super::format::{MixFormat, SampleFormat};
use super::signal::ReadySignal;
use cadenza_core::{Error, OutputConfig, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Shared state of a fake device, observable from the test.
pub struct FakeDevice {
    pub mix: Mutex<MixFormat>,
    pub float_supported: AtomicBool,
    pub fail_activate: AtomicBool,
    pub fail_start: AtomicBool,
    pub buffer_frames: AtomicU32,
    /// Tick readiness from a clock thread while started.
    pub auto_clock: AtomicBool,
    pub activations: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub resets: AtomicUsize,
    pub releases: AtomicUsize,
    pub silent_releases: AtomicUsize,
    pub released_frames: AtomicU64,
    pub thread_enters: AtomicUsize,
    pub thread_leaves: AtomicUsize,
    pub negotiated: Mutex<Option<MixFormat>>,
    ready: Mutex<Option<ReadySignal>>,
    clock_running: Arc<AtomicBool>,
    clock: Mutex<Option<JoinHandle<()>>>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mix: Mutex::new(MixFormat::float32(48_000, 2)),
            float_supported: AtomicBool::new(true),
            fail_activate: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            buffer_frames: AtomicU32::new(480),
            auto_clock: AtomicBool::new(false),
            activations: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            silent_releases: AtomicUsize::new(0),
            released_frames: AtomicU64::new(0),
            thread_enters: AtomicUsize::new(0),
            thread_leaves: AtomicUsize::new(0),
            negotiated: Mutex::new(None),
            ready: Mutex::new(None),
            clock_running: Arc::new(AtomicBool::new(false)),
            clock: Mutex::new(None),
        })
    }

    pub fn host(self: &Arc<Self>) -> Box<dyn AudioHost> {
        Box::new(FakeHost(Arc::clone(self)))
    }

    /// Raise readiness once. Returns false before initialization.
    pub fn tick(&self) -> bool {
        self.ready.lock().as_ref().map(ReadySignal::notify).is_some()
    }

    fn start_clock(&self) {
        if !self.auto_clock.load(Ordering::SeqCst) {
            return;
        }
        let Some(ready) = self.ready.lock().clone() else {
            return;
        };
        let running = Arc::clone(&self.clock_running);
        running.store(true, Ordering::SeqCst);
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                ready.notify();
                std::thread::sleep(Duration::from_millis(2));
            }
        });
        *self.clock.lock() = Some(handle);
    }

    fn stop_clock(&self) {
        self.clock_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.clock.lock().take() {
            let _ = handle.join();
        }
    }
}

struct FakeHost(Arc<FakeDevice>);

impl AudioHost for FakeHost {
    fn default_output(&mut self, _config: &OutputConfig) -> Result<Box<dyn AudioClient>> {
        if self.0.fail_activate.load(Ordering::SeqCst) {
            return Err(Error::Device("no default endpoint".into()));
        }
        self.0.activations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeClient {
            device: Arc::clone(&self.0),
            format: None,
        }))
    }
}

struct FakeClient {
    device: Arc<FakeDevice>,
    format: Option<MixFormat>,
}

impl AudioClient for FakeClient {
    fn mix_format(&mut self) -> Result<MixFormat> {
        Ok(*self.device.mix.lock())
    }

    fn is_format_supported(&mut self, format: &MixFormat) -> bool {
        format.sample_format() != SampleFormat::Float32
            || self.device.float_supported.load(Ordering::SeqCst)
    }

    fn initialize(&mut self, format: &MixFormat, ready: ReadySignal) -> Result<()> {
        self.format = Some(*format);
        *self.device.negotiated.lock() = Some(*format);
        *self.device.ready.lock() = Some(ready);
        Ok(())
    }

    fn buffer_frames(&mut self) -> Result<u32> {
        Ok(self.device.buffer_frames.load(Ordering::SeqCst))
    }

    fn render_api(&mut self) -> Result<Box<dyn RenderApi>> {
        let format = self
            .format
            .ok_or_else(|| Error::InvalidState("not initialized".into()))?;
        let samples =
            self.device.buffer_frames.load(Ordering::SeqCst) as usize * usize::from(format.channels);
        Ok(Box::new(FakeRender {
            device: Arc::clone(&self.device),
            format: format.sample_format(),
            channels: usize::from(format.channels),
            f32_data: vec![0.0; samples],
            i16_data: vec![0; samples],
            raw_data: vec![0; samples * 4],
        }))
    }

    fn start(&mut self) -> Result<()> {
        if self.device.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Device("start rejected".into()));
        }
        self.device.starts.fetch_add(1, Ordering::SeqCst);
        self.device.start_clock();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.device.stop_clock();
        self.device.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.device.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> String {
        "fake".to_string()
    }
}

impl Drop for FakeClient {
    fn drop(&mut self) {
        self.device.stop_clock();
        *self.device.ready.lock() = None;
    }
}

struct FakeRender {
    device: Arc<FakeDevice>,
    format: SampleFormat,
    channels: usize,
    f32_data: Vec<f32>,
    i16_data: Vec<i16>,
    raw_data: Vec<u8>,
}

impl RenderApi for FakeRender {
    fn current_padding(&mut self) -> Result<u32> {
        // Everything released is played before the next tick.
        Ok(0)
    }

    fn get_buffer(&mut self, frames: u32) -> Result<Option<DeviceBuffer<'_>>> {
        let samples = frames as usize * self.channels;
        Ok(Some(match self.format {
            SampleFormat::Float32 => DeviceBuffer::F32(&mut self.f32_data[..samples]),
            SampleFormat::Pcm16 => DeviceBuffer::I16(&mut self.i16_data[..samples]),
            SampleFormat::Unsupported => DeviceBuffer::Raw(&mut self.raw_data[..samples]),
        }))
    }

    fn release_buffer(&mut self, frames: u32, flags: ReleaseFlags) -> Result<()> {
        self.device.releases.fetch_add(1, Ordering::SeqCst);
        if flags == ReleaseFlags::Silent {
            self.device.silent_releases.fetch_add(1, Ordering::SeqCst);
        }
        self.device
            .released_frames
            .fetch_add(u64::from(frames), Ordering::SeqCst);
        Ok(())
    }

    fn enter_render_thread(&mut self) {
        self.device.thread_enters.fetch_add(1, Ordering::SeqCst);
    }

    fn leave_render_thread(&mut self) {
        self.device.thread_leaves.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` for up to two seconds.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
