//! In-process loopback rack.
//!
//! Named virtual devices connected by "cables": whatever a playback device
//! writes shows up on the capture end of every cable plugged into it, as long
//! as that capture end is open. Unconnected captures hear silence, delivered
//! one period at a time so a read takes roughly as long as on real hardware.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{nearest_rate, Backend, Capability, DeviceInfo, Direction, HwParams, Pcm, CHANNELS};
use crate::error::DeviceError;
use crate::format::{PcmSample, SampleEncoding};

const DEFAULT_PERIOD_FRAMES: usize = 1024;

/// Static description of one virtual device.
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    pub name: String,
    pub capability: Capability,
    pub rates: Vec<u32>,
    /// `None` accepts every encoding.
    pub encodings: Option<Vec<SampleEncoding>>,
    pub period_frames: usize,
    pub fail_open: bool,
}

impl VirtualDevice {
    pub fn new(name: &str, capability: Capability) -> Self {
        Self {
            name: name.to_string(),
            capability,
            rates: vec![44100, 48000],
            encodings: None,
            period_frames: DEFAULT_PERIOD_FRAMES,
            fail_open: false,
        }
    }

    pub fn with_rates(mut self, rates: &[u32]) -> Self {
        self.rates = rates.to_vec();
        self
    }

    pub fn with_encodings(mut self, encodings: &[SampleEncoding]) -> Self {
        self.encodings = Some(encodings.to_vec());
        self
    }

    pub fn with_period(mut self, frames: usize) -> Self {
        self.period_frames = frames.max(1);
        self
    }

    /// Device is listed but refuses to open, like a card held by another process.
    pub fn busy(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

#[derive(Default)]
struct Tap {
    listening: bool,
    queue: VecDeque<f64>,
}

struct Rack {
    devices: Vec<VirtualDevice>,
    cables: Vec<(String, String)>,
    taps: Mutex<HashMap<String, Tap>>,
    arrived: Condvar,
    silence_pacing: Option<Duration>,
    pending_underruns: AtomicUsize,
    open_handles: AtomicUsize,
    open_log: Mutex<Vec<(String, Direction)>>,
}

impl Rack {
    fn device(&self, name: &str) -> Option<&VirtualDevice> {
        self.devices.iter().find(|d| d.name == name)
    }
}

#[derive(Default)]
pub struct VirtualRackBuilder {
    devices: Vec<VirtualDevice>,
    cables: Vec<(String, String)>,
    silence_pacing: Option<Duration>,
}

impl VirtualRackBuilder {
    pub fn device(self, name: &str, capability: Capability) -> Self {
        self.with_device(VirtualDevice::new(name, capability))
    }

    pub fn with_device(mut self, device: VirtualDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Routes everything played on `playback` into `capture`.
    pub fn cable(mut self, playback: &str, capture: &str) -> Self {
        self.cables.push((playback.to_string(), capture.to_string()));
        self
    }

    /// Wait this long for data before a capture period is filled with
    /// silence. Defaults to the period duration.
    pub fn silence_pacing(mut self, pacing: Duration) -> Self {
        self.silence_pacing = Some(pacing);
        self
    }

    pub fn build(self) -> VirtualBackend {
        VirtualBackend {
            rack: Arc::new(Rack {
                devices: self.devices,
                cables: self.cables,
                taps: Mutex::new(HashMap::new()),
                arrived: Condvar::new(),
                silence_pacing: self.silence_pacing,
                pending_underruns: AtomicUsize::new(0),
                open_handles: AtomicUsize::new(0),
                open_log: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Backend over a [`VirtualRackBuilder`]-assembled rack.
#[derive(Clone)]
pub struct VirtualBackend {
    rack: Arc<Rack>,
}

impl VirtualBackend {
    pub fn builder() -> VirtualRackBuilder {
        VirtualRackBuilder::default()
    }

    /// The next `count` playback writes report an underrun.
    pub fn inject_underruns(&self, count: usize) {
        self.rack.pending_underruns.store(count, Ordering::SeqCst);
    }

    pub fn pending_underruns(&self) -> usize {
        self.rack.pending_underruns.load(Ordering::SeqCst)
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> usize {
        self.rack.open_handles.load(Ordering::SeqCst)
    }

    /// Every open request in order, including refused ones.
    pub fn open_log(&self) -> Vec<(String, Direction)> {
        self.rack.open_log.lock().clone()
    }
}

impl Backend for VirtualBackend {
    type Handle<T: PcmSample> = VirtualPcm<T>;

    fn open<T: PcmSample>(
        &self,
        name: &str,
        direction: Direction,
    ) -> Result<VirtualPcm<T>, DeviceError> {
        self.rack
            .open_log
            .lock()
            .push((name.to_string(), direction));

        let device = self
            .rack
            .device(name)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))?;

        if !device.capability.supports(direction) {
            return Err(DeviceError::Open {
                device: name.to_string(),
                reason: format!("no {} support", direction),
            });
        }
        if device.fail_open {
            return Err(DeviceError::Open {
                device: name.to_string(),
                reason: "device or resource busy".to_string(),
            });
        }

        if direction == Direction::Capture {
            let mut taps = self.rack.taps.lock();
            let tap = taps.entry(name.to_string()).or_default();
            tap.listening = true;
            tap.queue.clear();
        }
        self.rack.open_handles.fetch_add(1, Ordering::SeqCst);

        Ok(VirtualPcm {
            rack: self.rack.clone(),
            device: device.clone(),
            direction,
            params: None,
            _sample: PhantomData,
        })
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self
            .rack
            .devices
            .iter()
            .map(|d| DeviceInfo {
                name: d.name.clone(),
                capability: d.capability,
            })
            .collect())
    }
}

pub struct VirtualPcm<T: PcmSample> {
    rack: Arc<Rack>,
    device: VirtualDevice,
    direction: Direction,
    params: Option<HwParams>,
    _sample: PhantomData<T>,
}

impl<T: PcmSample> VirtualPcm<T> {
    fn params(&self) -> Result<HwParams, DeviceError> {
        self.params
            .ok_or_else(|| DeviceError::NotConfigured(self.device.name.clone()))
    }

    fn clear_tap(&self) {
        if let Some(tap) = self.rack.taps.lock().get_mut(&self.device.name) {
            tap.queue.clear();
        }
    }
}

impl<T: PcmSample> Pcm<T> for VirtualPcm<T> {
    fn name(&self) -> &str {
        &self.device.name
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn set_hw_params(&mut self, desired_rate: u32) -> Result<HwParams, DeviceError> {
        if let Some(encodings) = &self.device.encodings {
            if !encodings.contains(&T::ENCODING) {
                return Err(DeviceError::Configure {
                    device: self.device.name.clone(),
                    param: "format",
                    reason: format!("{} not supported", T::ENCODING),
                });
            }
        }

        let rate = nearest_rate(desired_rate, self.device.rates.iter().copied()).ok_or_else(
            || DeviceError::Configure {
                device: self.device.name.clone(),
                param: "rate",
                reason: "no supported rates".to_string(),
            },
        )?;

        let params = HwParams {
            rate,
            period_frames: self.device.period_frames,
            channels: CHANNELS,
            encoding: T::ENCODING,
        };
        self.params = Some(params);
        Ok(params)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.params()?;
        if self.direction == Direction::Capture {
            self.clear_tap();
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.params().map(|_| ())
    }

    fn writei(&mut self, buf: &[T]) -> Result<usize, DeviceError> {
        self.params()?;

        let injected = self
            .rack
            .pending_underruns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DeviceError::Xrun(self.device.name.clone()));
        }

        let mut taps = self.rack.taps.lock();
        for (_, capture) in self
            .rack
            .cables
            .iter()
            .filter(|(playback, _)| *playback == self.device.name)
        {
            if let Some(tap) = taps.get_mut(capture) {
                if tap.listening {
                    tap.queue.extend(buf.iter().map(|s| s.to_f64()));
                }
            }
        }
        drop(taps);
        self.rack.arrived.notify_all();

        Ok(buf.len() / CHANNELS)
    }

    fn readi(&mut self, buf: &mut [T]) -> Result<usize, DeviceError> {
        let params = self.params()?;
        let pacing = self.rack.silence_pacing.unwrap_or_else(|| {
            Duration::from_secs_f64(params.period_frames as f64 / f64::from(params.rate))
        });

        let mut taps = self.rack.taps.lock();
        loop {
            let available = taps
                .get(&self.device.name)
                .map_or(0, |tap| tap.queue.len());
            if available >= buf.len() {
                break;
            }
            if self.rack.arrived.wait_for(&mut taps, pacing).timed_out() {
                break;
            }
        }

        //
        // Whatever arrived in time, then silence for the rest of the period.
        //
        let tap = taps.entry(self.device.name.clone()).or_default();
        for slot in buf.iter_mut() {
            *slot = match tap.queue.pop_front() {
                Some(v) => T::from_f64(v),
                None => <T as cpal::Sample>::EQUILIBRIUM,
            };
        }
        Ok(buf.len() / CHANNELS)
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn drop_pending(&mut self) -> Result<(), DeviceError> {
        if self.direction == Direction::Capture {
            self.clear_tap();
        }
        Ok(())
    }
}

impl<T: PcmSample> Drop for VirtualPcm<T> {
    fn drop(&mut self) {
        if self.direction == Direction::Capture {
            if let Some(tap) = self.rack.taps.lock().get_mut(&self.device.name) {
                tap.listening = false;
                tap.queue.clear();
            }
        }
        self.rack.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rack() -> VirtualBackend {
        VirtualBackend::builder()
            .device("out", Capability::Playback)
            .device("in", Capability::Capture)
            .with_device(
                VirtualDevice::new("s16-only", Capability::Both)
                    .with_encodings(&[SampleEncoding::native::<i16>()])
                    .with_rates(&[32000]),
            )
            .cable("out", "in")
            .silence_pacing(Duration::from_millis(1))
            .build()
    }

    #[test]
    fn test_open_checks_name_and_direction() {
        let backend = rack();
        assert!(matches!(
            backend.open::<i16>("nope", Direction::Playback),
            Err(DeviceError::NotFound(_))
        ));
        assert!(matches!(
            backend.open::<i16>("in", Direction::Playback),
            Err(DeviceError::Open { .. })
        ));
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(backend.open_log().len(), 2);
    }

    #[test]
    fn test_hw_params_snap_rate_and_check_format() {
        let backend = rack();
        let mut pcm = backend.open::<i16>("s16-only", Direction::Capture).unwrap();
        let params = pcm.set_hw_params(48000).unwrap();
        assert_eq!(params.rate, 32000);
        assert_eq!(params.period_frames, DEFAULT_PERIOD_FRAMES);

        let mut pcm = backend.open::<f32>("s16-only", Direction::Capture).unwrap();
        assert!(matches!(
            pcm.set_hw_params(48000),
            Err(DeviceError::Configure { param: "format", .. })
        ));
    }

    #[test]
    fn test_cable_carries_samples_only_while_listening() {
        let backend = rack();
        let mut out = backend.open::<i16>("out", Direction::Playback).unwrap();
        out.set_hw_params(48000).unwrap();

        // nobody listening yet: dropped on the floor
        out.writei(&[7, 7]).unwrap();

        let mut inp = backend.open::<i16>("in", Direction::Capture).unwrap();
        inp.set_hw_params(48000).unwrap();
        out.writei(&[1, 1, 2, 2]).unwrap();

        let mut buf = [0i16; 6];
        assert_eq!(inp.readi(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 1, 2, 2, 0, 0]);

        drop(inp);
        drop(out);
        assert_eq!(backend.open_handles(), 0);
    }

    #[test]
    fn test_injected_underruns_are_consumed() {
        let backend = rack();
        let mut out = backend.open::<f32>("out", Direction::Playback).unwrap();
        out.set_hw_params(44100).unwrap();
        backend.inject_underruns(2);

        assert!(matches!(out.writei(&[0.0, 0.0]), Err(DeviceError::Xrun(_))));
        assert!(matches!(out.writei(&[0.0, 0.0]), Err(DeviceError::Xrun(_))));
        assert_eq!(out.writei(&[0.0, 0.0]).unwrap(), 1);
        assert_eq!(backend.pending_underruns(), 0);
    }
}
