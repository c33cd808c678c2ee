//! Render adapter: device negotiation and the render thread lifecycle.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::device::{AudioClient, AudioHost};
use super::format::{MixFormat, SampleFormat};
use super::render::{render_loop, FillCallback, FillSource, RenderContext, RenderCounters, RenderLayout};
use super::signal::RenderSignal;
use crate::buffer::SharedRingBuffer;
use cadenza_core::{Error, OutputConfig, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`RenderAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterState {
    #[default]
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// Owns an output client and the thread that feeds it.
///
/// Not `Send`: device clients may be tied to the thread that activated them,
/// so the adapter lives on the thread that created it.
pub struct RenderAdapter {
    host: Box<dyn AudioHost>,
    config: OutputConfig,
    state: AdapterState,
    client: Option<Box<dyn AudioClient>>,
    /// Render-thread state while no thread is running.
    parked: Option<RenderContext>,
    source: FillSource,
    signal: Option<Arc<RenderSignal>>,
    thread: Option<JoinHandle<RenderContext>>,
    format: Option<MixFormat>,
    layout: Option<RenderLayout>,
    device_name: String,
    counters: Arc<RenderCounters>,
}

impl RenderAdapter {
    pub fn new(host: Box<dyn AudioHost>, config: OutputConfig) -> Self {
        Self::with_counters(host, config, Arc::new(RenderCounters::default()))
    }

    /// Like [`Self::new`], publishing render statistics into `counters`.
    pub fn with_counters(
        host: Box<dyn AudioHost>,
        config: OutputConfig,
        counters: Arc<RenderCounters>,
    ) -> Self {
        Self {
            host,
            config,
            state: AdapterState::Uninitialized,
            client: None,
            parked: None,
            source: FillSource::None,
            signal: None,
            thread: None,
            format: None,
            layout: None,
            device_name: String::new(),
            counters,
        }
    }

    /// Activate the default output device and negotiate a format.
    ///
    /// Any failure leaves the adapter uninitialized.
    pub fn init(&mut self) -> Result<()> {
        if self.state != AdapterState::Uninitialized {
            return Err(Error::InvalidState("output already initialized".into()));
        }

        match self.try_init() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.release_resources();
                Err(match e {
                    Error::Initialization(_) => e,
                    other => Error::Initialization(other.to_string()),
                })
            }
        }
    }

    fn try_init(&mut self) -> Result<()> {
        let mut client = self.host.default_output(&self.config)?;
        let device_name = client.name();
        let mix = client.mix_format()?;
        debug!("Device mix format: {:?}", mix);

        let format = if self.config.prefer_float {
            match MixFormat::float32_request(&mix) {
                Some(request) if client.is_format_supported(&request) => request,
                _ => {
                    debug!("Float32 not accepted by {device_name}, using mix format");
                    mix
                }
            }
        } else {
            mix
        };

        let signal = RenderSignal::new();
        client.initialize(&format, signal.ready_handle())?;

        let buffer_frames = client.buffer_frames()?;
        if buffer_frames == 0 {
            return Err(Error::Initialization(
                "device reported an empty buffer".into(),
            ));
        }
        let api = client.render_api()?;

        let sample_format = format.sample_format();
        if sample_format == SampleFormat::Unsupported {
            warn!("Unsupported device format {:?}; output will be silent", format);
        }

        let channels = usize::from(format.channels);
        let scratch = if sample_format == SampleFormat::Pcm16 {
            vec![0.0f32; buffer_frames as usize * channels]
        } else {
            Vec::new()
        };
        let layout = RenderLayout {
            buffer_frames,
            channels,
            format: sample_format,
        };

        info!(
            "Output initialized: {} Hz, {} channels, {:?}, {} frame buffer, device: {}",
            format.sample_rate, format.channels, sample_format, buffer_frames, device_name
        );

        self.parked = Some(RenderContext {
            api,
            source: FillSource::None,
            scratch,
            layout,
        });
        self.client = Some(client);
        self.signal = Some(signal);
        self.format = Some(format);
        self.layout = Some(layout);
        self.device_name = device_name;
        self.state = AdapterState::Initialized;
        Ok(())
    }

    /// Feed the render thread from `ring`. Not allowed while running.
    pub fn set_ring_buffer(&mut self, ring: SharedRingBuffer) -> Result<()> {
        self.set_source(FillSource::Ring(ring))
    }

    /// Feed the render thread from a raw callback. Not allowed while running.
    pub fn set_fill_callback(&mut self, callback: FillCallback) -> Result<()> {
        self.set_source(FillSource::Callback(callback))
    }

    fn set_source(&mut self, source: FillSource) -> Result<()> {
        if self.state == AdapterState::Running {
            return Err(Error::InvalidState(
                "cannot change the fill source while running".into(),
            ));
        }
        self.source = source;
        Ok(())
    }

    /// Spawn the render thread and start the device.
    ///
    /// On failure no render thread is left running and the state is
    /// unchanged.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            AdapterState::Running => {
                return Err(Error::InvalidState("output already running".into()))
            }
            AdapterState::Uninitialized => {
                return Err(Error::InvalidState("output not initialized".into()))
            }
            AdapterState::Initialized | AdapterState::Stopped => {}
        }
        let (Some(signal), Some(layout)) = (self.signal.clone(), self.layout) else {
            return Err(Error::InvalidState("output not initialized".into()));
        };

        match &self.source {
            FillSource::None => {
                return Err(Error::InvalidState("no fill source bound".into()));
            }
            FillSource::Ring(ring) if ring.channels() != layout.channels => {
                return Err(Error::InvalidArgument(format!(
                    "ring has {} channels, device has {}",
                    ring.channels(),
                    layout.channels
                )));
            }
            _ => {}
        }

        let Some(mut ctx) = self.parked.take() else {
            return Err(Error::InvalidState("render context unavailable".into()));
        };
        ctx.source = std::mem::take(&mut self.source);

        signal.clear_stop();
        let thread_signal = Arc::clone(&signal);
        let counters = Arc::clone(&self.counters);
        let wait_timeout = self.config.wait_timeout();
        let spawned = std::thread::Builder::new()
            .name(self.config.render_thread_name.clone())
            .spawn(move || render_loop(ctx, &thread_signal, &counters, wait_timeout));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // The context went down with the closure.
                error!("Failed to spawn render thread: {e}");
                self.release_resources();
                return Err(Error::Start(format!("failed to spawn render thread: {e}")));
            }
        };
        self.thread = Some(handle);

        let started = self
            .client
            .as_mut()
            .map_or_else(|| Err(Error::InvalidState("no client".into())), |c| c.start());

        if let Err(e) = started {
            warn!("Device rejected start: {e}");
            signal.request_stop();
            self.join_render_thread();
            return Err(Error::Start(e.to_string()));
        }

        self.state = AdapterState::Running;
        debug!("Render thread started");
        Ok(())
    }

    /// Stop rendering. Safe to call in any state.
    pub fn stop(&mut self) {
        if self.state != AdapterState::Running {
            return;
        }

        if let Some(signal) = &self.signal {
            signal.request_stop();
        }
        self.join_render_thread();

        if let Some(client) = self.client.as_mut() {
            if let Err(e) = client.stop() {
                warn!("Device stop failed: {e}");
            }
            if let Err(e) = client.reset() {
                warn!("Device reset failed: {e}");
            }
        }

        self.state = AdapterState::Stopped;
        debug!("Render thread stopped");
    }

    /// Stop and release the device. Safe to call in any state.
    pub fn shutdown(&mut self) {
        self.stop();
        if self.state != AdapterState::Uninitialized {
            info!("Output shut down");
        }
        self.release_resources();
    }

    fn join_render_thread(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        match handle.join() {
            Ok(mut ctx) => {
                self.source = std::mem::take(&mut ctx.source);
                self.parked = Some(ctx);
            }
            Err(_) => {
                error!("Render thread panicked; output must be reinitialized");
            }
        }
    }

    fn release_resources(&mut self) {
        self.parked = None;
        self.client = None;
        self.signal = None;
        self.format = None;
        self.layout = None;
        self.device_name.clear();
        self.state = AdapterState::Uninitialized;
    }

    pub const fn state(&self) -> AdapterState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AdapterState::Running
    }

    pub fn is_initialized(&self) -> bool {
        self.state != AdapterState::Uninitialized
    }

    /// Negotiated format, `None` before `init`.
    pub const fn format(&self) -> Option<&MixFormat> {
        self.format.as_ref()
    }

    /// Negotiated sample rate, 0 before `init`.
    pub fn sample_rate(&self) -> u32 {
        self.format.map_or(0, |f| f.sample_rate)
    }

    /// Negotiated channel count, 0 before `init`.
    pub fn channels(&self) -> u16 {
        self.format.map_or(0, |f| f.channels)
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.layout.map_or(SampleFormat::Unsupported, |l| l.format)
    }

    /// Device buffer size in frames, 0 before `init`.
    pub fn buffer_frames(&self) -> u32 {
        self.layout.map_or(0, |l| l.buffer_frames)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub const fn counters(&self) -> &Arc<RenderCounters> {
        &self.counters
    }

    pub fn rendered_frames(&self) -> u64 {
        self.counters.rendered_frames()
    }

    pub fn reset_rendered_frames(&self) {
        self.counters.reset_rendered_frames();
    }

    pub fn underrun_wake_count(&self) -> u64 {
        self.counters.underrun_wakes()
    }

    pub fn underrun_frame_count(&self) -> u64 {
        self.counters.underrun_frames()
    }
}

impl Drop for RenderAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
