use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize,
    SupportedStreamConfigRange,
};
use parking_lot::Mutex;
use ringbuf::{Consumer, HeapRb, Producer};

use super::{Backend, Capability, DeviceInfo, Direction, HwParams, Pcm, CHANNELS};
use crate::error::DeviceError;
use crate::format::PcmSample;

const DEFAULT_PERIOD_FRAMES: u32 = 1024;

/// Callback size assumed when the host keeps its own buffer size and the
/// device reports no upper bound.
const MAX_FALLBACK_PERIOD_FRAMES: u32 = 16384;

/// Ring capacity in periods between the caller and the audio callback.
const RING_PERIODS: usize = 4;

/// A blocking read or write that makes no progress for this long fails.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Hardware backend on the platform's default cpal host (ALSA on Linux).
pub struct CpalBackend {
    host_id: cpal::HostId,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host_id: cpal::default_host().id(),
        }
    }

    fn host(&self) -> Result<cpal::Host, DeviceError> {
        cpal::host_from_id(self.host_id).map_err(|e| DeviceError::Open {
            device: format!("{:?}", self.host_id),
            reason: e.to_string(),
        })
    }

    fn find_device(&self, name: &str, direction: Direction) -> Result<cpal::Device, DeviceError> {
        let host = self.host()?;
        let open_err = |e: &dyn std::fmt::Display| DeviceError::Open {
            device: name.to_string(),
            reason: e.to_string(),
        };

        //
        // "default" follows the host's default device for the direction.
        //
        if name == "default" {
            let device = match direction {
                Direction::Playback => host.default_output_device(),
                Direction::Capture => host.default_input_device(),
            };
            return device.ok_or_else(|| DeviceError::NotFound(name.to_string()));
        }

        let devices: Vec<cpal::Device> = match direction {
            Direction::Playback => host.output_devices().map_err(|e| open_err(&e))?.collect(),
            Direction::Capture => host.input_devices().map_err(|e| open_err(&e))?.collect(),
        };
        devices
            .into_iter()
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }
}

impl Backend for CpalBackend {
    type Handle<T: PcmSample> = CpalPcm<T>;

    fn open<T: PcmSample>(&self, name: &str, direction: Direction) -> Result<CpalPcm<T>, DeviceError> {
        let device = self.find_device(name, direction)?;
        log::debug!(
            "Selected audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".into())
        );

        Ok(CpalPcm {
            name: name.to_string(),
            direction,
            device,
            stream: None,
            producer: None,
            consumer: None,
            state: Arc::new(CallbackState::default()),
            params: None,
        })
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let host = self.host()?;
        let list_err = |e: &dyn std::fmt::Display| DeviceError::Io {
            device: format!("{:?}", self.host_id),
            reason: e.to_string(),
        };

        let outputs: Vec<String> = host
            .output_devices()
            .map_err(|e| list_err(&e))?
            .filter_map(|d| d.name().ok())
            .collect();
        let inputs: Vec<String> = host
            .input_devices()
            .map_err(|e| list_err(&e))?
            .filter_map(|d| d.name().ok())
            .collect();

        let mut devices = Vec::with_capacity(outputs.len() + inputs.len());
        for name in &outputs {
            let capability = if inputs.contains(name) {
                Capability::Both
            } else {
                Capability::Playback
            };
            devices.push(DeviceInfo {
                name: name.clone(),
                capability,
            });
        }
        for name in inputs.iter().filter(|n| !outputs.contains(n)) {
            devices.push(DeviceInfo {
                name: name.clone(),
                capability: Capability::Capture,
            });
        }

        for (i, d) in devices.iter().enumerate() {
            log::debug!("  [{}]: {} ({:?})", i, d.name, d.capability);
        }
        Ok(devices)
    }
}

/// Rate and period picked from a device's supported config ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Negotiation {
    rate: u32,
    /// Requested with `BufferSize::Fixed`.
    period: u32,
    /// Largest callback to plan for if the fixed size is refused.
    fallback_period: u32,
}

/// Picks the stereo range in `format` whose rate lands closest to
/// `desired_rate`, clamping into each range. Ties go to the lower rate.
fn negotiate(
    name: &str,
    ranges: &[SupportedStreamConfigRange],
    format: SampleFormat,
    desired_rate: u32,
) -> Result<Negotiation, DeviceError> {
    let stereo: Vec<&SupportedStreamConfigRange> = ranges
        .iter()
        .filter(|r| usize::from(r.channels()) == CHANNELS)
        .filter(|r| r.min_sample_rate() <= r.max_sample_rate())
        .collect();
    if stereo.is_empty() {
        return Err(DeviceError::Configure {
            device: name.to_string(),
            param: "channels",
            reason: format!("{} channels not supported", CHANNELS),
        });
    }

    let (range, rate) = stereo
        .iter()
        .filter(|r| r.sample_format() == format)
        .map(|r| {
            let rate = desired_rate.clamp(r.min_sample_rate().0, r.max_sample_rate().0);
            (*r, rate)
        })
        .min_by_key(|(_, rate)| (rate.abs_diff(desired_rate), *rate))
        .ok_or_else(|| DeviceError::Configure {
            device: name.to_string(),
            param: "format",
            reason: format!("{} not supported", format),
        })?;

    let (period, fallback_period) = match *range.buffer_size() {
        SupportedBufferSize::Range { min, max } if min <= max => {
            let period = DEFAULT_PERIOD_FRAMES.clamp(min, max);
            (period, max.min(MAX_FALLBACK_PERIOD_FRAMES).max(period))
        }
        _ => (DEFAULT_PERIOD_FRAMES, MAX_FALLBACK_PERIOD_FRAMES),
    };

    Ok(Negotiation {
        rate,
        period,
        fallback_period,
    })
}

/// Flags shared with the audio callback.
#[derive(Default)]
struct CallbackState {
    running: AtomicBool,
    xrun: AtomicBool,
    error: Mutex<Option<String>>,
}

type RingProducer<T> = Producer<T, Arc<HeapRb<T>>>;
type RingConsumer<T> = Consumer<T, Arc<HeapRb<T>>>;

/// One cpal stream behind the blocking PCM interface.
///
/// Samples travel through a ring of [`RING_PERIODS`] periods: playback
/// pushes and the output callback pops, capture the other way around.
pub struct CpalPcm<T: PcmSample> {
    name: String,
    direction: Direction,
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    producer: Option<RingProducer<T>>,
    consumer: Option<RingConsumer<T>>,
    state: Arc<CallbackState>,
    params: Option<HwParams>,
}

impl<T: PcmSample> CpalPcm<T> {
    fn supported_ranges(&self) -> Result<Vec<SupportedStreamConfigRange>, DeviceError> {
        let configure_err = |e: &dyn std::fmt::Display| DeviceError::Configure {
            device: self.name.clone(),
            param: "hw params",
            reason: e.to_string(),
        };
        match self.direction {
            Direction::Playback => Ok(self
                .device
                .supported_output_configs()
                .map_err(|e| configure_err(&e))?
                .collect()),
            Direction::Capture => Ok(self
                .device
                .supported_input_configs()
                .map_err(|e| configure_err(&e))?
                .collect()),
        }
    }

    fn build_stream(
        &self,
        config: &StreamConfig,
        producer: Option<RingProducer<T>>,
        consumer: Option<RingConsumer<T>>,
    ) -> Result<cpal::Stream, cpal::BuildStreamError> {
        let err_state = self.state.clone();
        let err_name = self.name.clone();
        let err_fn = move |err: cpal::StreamError| {
            log::warn!("Audio stream error on {}: {}", err_name, err);
            *err_state.error.lock() = Some(err.to_string());
        };

        match (producer, consumer) {
            (_, Some(mut consumer)) => {
                //
                // Output callback: play queued frames, pad with silence and
                // flag an underrun if the queue ran dry while running.
                //
                let state = self.state.clone();
                self.device.build_output_stream(
                    config,
                    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                        let n = consumer.pop_slice(data);
                        if n < data.len() {
                            data[n..].fill(<T as cpal::Sample>::EQUILIBRIUM);
                            if state.running.load(Ordering::Acquire) {
                                state.xrun.store(true, Ordering::Release);
                            }
                        }
                    },
                    err_fn,
                    None,
                )
            }
            (Some(mut producer), _) => {
                //
                // Input callback: queue captured frames, flag an overrun when
                // the reader falls behind.
                //
                let state = self.state.clone();
                self.device.build_input_stream(
                    config,
                    move |data: &[T], _: &cpal::InputCallbackInfo| {
                        if !state.running.load(Ordering::Acquire) {
                            return;
                        }
                        if producer.push_slice(data) < data.len() {
                            state.xrun.store(true, Ordering::Release);
                        }
                    },
                    err_fn,
                    None,
                )
            }
            (None, None) => Err(cpal::BuildStreamError::StreamConfigNotSupported),
        }
    }

    fn check_callback(&self) -> Result<(), DeviceError> {
        if let Some(reason) = self.state.error.lock().take() {
            return Err(DeviceError::Io {
                device: self.name.clone(),
                reason,
            });
        }
        if self.state.xrun.swap(false, Ordering::AcqRel) {
            return Err(DeviceError::Xrun(self.name.clone()));
        }
        Ok(())
    }

    fn configured(&self) -> Result<HwParams, DeviceError> {
        self.params
            .ok_or_else(|| DeviceError::NotConfigured(self.name.clone()))
    }

    /// Sleep granularity while waiting on the ring.
    fn poll_interval(&self) -> Duration {
        self.params
            .map(|p| Duration::from_secs_f64(p.period_frames as f64 / f64::from(p.rate) / 4.0))
            .unwrap_or(Duration::from_millis(5))
    }

    fn play(&self) -> Result<(), DeviceError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| DeviceError::NotConfigured(self.name.clone()))?;
        stream.play().map_err(|e| DeviceError::Io {
            device: self.name.clone(),
            reason: e.to_string(),
        })?;
        self.state.running.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> Result<(), DeviceError> {
        self.state.running.store(false, Ordering::Release);
        if let Some(stream) = &self.stream {
            stream.pause().map_err(|e| DeviceError::Io {
                device: self.name.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl<T: PcmSample> Pcm<T> for CpalPcm<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn set_hw_params(&mut self, desired_rate: u32) -> Result<HwParams, DeviceError> {
        //
        // cpal hands out samples in host byte order only.
        //
        if !T::ENCODING.is_native() {
            return Err(DeviceError::Configure {
                device: self.name.clone(),
                param: "format",
                reason: format!("{} is not host byte order", T::ENCODING),
            });
        }

        let ranges = self.supported_ranges()?;
        let negotiation = negotiate(&self.name, &ranges, T::FORMAT, desired_rate)?;
        let rate = negotiation.rate;
        let mut period = negotiation.period;

        let mut config = StreamConfig {
            channels: CHANNELS as u16,
            sample_rate: SampleRate(rate),
            buffer_size: BufferSize::Fixed(period),
        };

        log::debug!(
            "Audio config: {:?} @ {}Hz, Channels: {}, Period: {}",
            T::FORMAT,
            rate,
            CHANNELS,
            period
        );

        let stream = loop {
            let capacity = period as usize * CHANNELS * RING_PERIODS;
            let (producer, consumer) = HeapRb::<T>::new(capacity).split();
            let (mine_p, mine_c, theirs_p, theirs_c) = match self.direction {
                Direction::Playback => (Some(producer), None, None, Some(consumer)),
                Direction::Capture => (None, Some(consumer), Some(producer), None),
            };

            match self.build_stream(&config, theirs_p, theirs_c) {
                Ok(stream) => {
                    self.producer = mine_p;
                    self.consumer = mine_c;
                    break stream;
                }
                Err(e) if config.buffer_size != BufferSize::Default => {
                    //
                    // The host picks the period now; size the ring for the
                    // largest callback it may ask for.
                    //
                    period = negotiation.fallback_period;
                    log::debug!(
                        "{}: fixed period rejected ({}), using default, planning for {} frames",
                        self.name,
                        e,
                        period
                    );
                    config.buffer_size = BufferSize::Default;
                }
                Err(e) => {
                    return Err(DeviceError::Configure {
                        device: self.name.clone(),
                        param: "hw params",
                        reason: e.to_string(),
                    })
                }
            }
        };

        //
        // Some hosts start streams on creation; keep it idle until start().
        //
        let _ = stream.pause();
        self.stream = Some(stream);

        let params = HwParams {
            rate,
            period_frames: period as usize,
            channels: CHANNELS,
            encoding: T::ENCODING,
        };
        self.params = Some(params);
        Ok(params)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.configured()?;
        self.state.xrun.store(false, Ordering::Release);
        if let Some(consumer) = self.consumer.as_mut() {
            let dropped = consumer.pop_iter().count();
            log::debug!("{}: discarded {} stale samples", self.name, dropped);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.configured()?;
        if !self.state.running.load(Ordering::Acquire) {
            self.play()?;
        }
        Ok(())
    }

    fn writei(&mut self, buf: &[T]) -> Result<usize, DeviceError> {
        self.configured()?;
        self.check_callback()?;

        let interval = self.poll_interval();
        let mut written = 0;
        let mut last_progress = Instant::now();

        while written < buf.len() {
            let pushed = match self.producer.as_mut() {
                Some(producer) => producer.push_slice(&buf[written..]),
                None => return Err(DeviceError::NotConfigured(self.name.clone())),
            };
            if pushed > 0 {
                written += pushed;
                last_progress = Instant::now();
                continue;
            }

            //
            // Ring is full: like ALSA, start playing once the buffer is filled.
            //
            if !self.state.running.load(Ordering::Acquire) {
                self.play()?;
            }
            if let Some(reason) = self.state.error.lock().take() {
                return Err(DeviceError::Io {
                    device: self.name.clone(),
                    reason,
                });
            }
            if last_progress.elapsed() > STALL_TIMEOUT {
                return Err(DeviceError::Timeout(self.name.clone()));
            }
            thread::sleep(interval);
        }
        Ok(written / CHANNELS)
    }

    fn readi(&mut self, buf: &mut [T]) -> Result<usize, DeviceError> {
        self.configured()?;
        self.check_callback()?;
        if !self.state.running.load(Ordering::Acquire) {
            self.play()?;
        }

        let interval = self.poll_interval();
        let mut filled = 0;
        let mut last_progress = Instant::now();

        while filled < buf.len() {
            let popped = match self.consumer.as_mut() {
                Some(consumer) => consumer.pop_slice(&mut buf[filled..]),
                None => return Err(DeviceError::NotConfigured(self.name.clone())),
            };
            if popped > 0 {
                filled += popped;
                last_progress = Instant::now();
                continue;
            }
            if let Some(reason) = self.state.error.lock().take() {
                return Err(DeviceError::Io {
                    device: self.name.clone(),
                    reason,
                });
            }
            if last_progress.elapsed() > STALL_TIMEOUT {
                return Err(DeviceError::Timeout(self.name.clone()));
            }
            thread::sleep(interval);
        }
        Ok(filled / CHANNELS)
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        let Some(params) = self.params else {
            return Ok(());
        };
        if !self.state.running.load(Ordering::Acquire) {
            let queued = self.producer.as_ref().map_or(false, |p| !p.is_empty());
            if !queued {
                return Ok(());
            }
            self.play()?;
        }

        let interval = self.poll_interval();
        let started = Instant::now();
        while self.producer.as_ref().map_or(false, |p| !p.is_empty()) {
            if started.elapsed() > STALL_TIMEOUT {
                return Err(DeviceError::Timeout(self.name.clone()));
            }
            thread::sleep(interval);
        }

        //
        // The ring is empty; give the device time to play out its own buffer.
        //
        thread::sleep(Duration::from_secs_f64(
            2.0 * params.period_frames as f64 / f64::from(params.rate),
        ));
        self.pause()
    }

    fn drop_pending(&mut self) -> Result<(), DeviceError> {
        self.pause()?;
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.pop_iter().count();
        }
        Ok(())
    }
}

impl<T: PcmSample> Drop for CpalPcm<T> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
        self.stream.take();
    }
}
