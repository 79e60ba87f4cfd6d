pub mod cpal_backend;
pub mod stream;
pub mod virtual_cable;

pub use cpal_backend::CpalBackend;
pub use stream::PcmStream;
pub use virtual_cable::VirtualBackend;

use std::fmt;

use crate::error::DeviceError;
use crate::format::{PcmSample, SampleEncoding};

/// Every stream is opened as interleaved stereo.
pub const CHANNELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Playback,
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Playback => f.write_str("playback"),
            Direction::Capture => f.write_str("capture"),
        }
    }
}

/// Which directions a device can be opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Playback,
    Capture,
    Both,
}

impl Capability {
    pub fn supports(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Capability::Both, _)
                | (Capability::Playback, Direction::Playback)
                | (Capability::Capture, Direction::Capture)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub capability: Capability,
}

/// Devices that can be opened in `direction`, in enumeration order.
pub fn device_names(devices: &[DeviceInfo], direction: Direction) -> Vec<String> {
    devices
        .iter()
        .filter(|d| d.capability.supports(direction))
        .map(|d| d.name.clone())
        .collect()
}

/// Parameters fixed by a successful hardware negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    pub rate: u32,
    pub period_frames: usize,
    pub channels: usize,
    pub encoding: SampleEncoding,
}

impl HwParams {
    pub fn period_samples(&self) -> usize {
        self.period_frames * self.channels
    }
}

/// Returns the candidate closest to `desired`; ties go to the lower rate.
pub fn nearest_rate(desired: u32, candidates: impl IntoIterator<Item = u32>) -> Option<u32> {
    candidates
        .into_iter()
        .min_by_key(|&r| (r.abs_diff(desired), r))
}

/// One open hardware endpoint.
///
/// This is the opaque driver boundary: interleaved access, two channels and
/// `T`'s native encoding. All buffer lengths are in samples and always a
/// multiple of [`CHANNELS`]; return values are in frames.
pub trait Pcm<T: PcmSample> {
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    /// Negotiates access, channels, format and the nearest supported rate.
    fn set_hw_params(&mut self, desired_rate: u32) -> Result<HwParams, DeviceError>;

    /// Returns the stream to a ready state, e.g. after an xrun.
    fn prepare(&mut self) -> Result<(), DeviceError>;

    fn start(&mut self) -> Result<(), DeviceError>;

    /// Blocking write. `Err(DeviceError::Xrun)` signals an underrun; nothing
    /// from `buf` was consumed in that case.
    fn writei(&mut self, buf: &[T]) -> Result<usize, DeviceError>;

    /// Blocking read filling the whole of `buf`.
    fn readi(&mut self, buf: &mut [T]) -> Result<usize, DeviceError>;

    /// Blocks until every queued frame has been played.
    fn drain(&mut self) -> Result<(), DeviceError>;

    /// Stops immediately, discarding pending frames.
    fn drop_pending(&mut self) -> Result<(), DeviceError>;
}

/// Source of PCM handles and device lists.
///
/// Backends are shared by reference between the foreground playback task and
/// the background capture task, hence `Sync`.
pub trait Backend: Sync {
    type Handle<T: PcmSample>: Pcm<T>;

    fn open<T: PcmSample>(
        &self,
        name: &str,
        direction: Direction,
    ) -> Result<Self::Handle<T>, DeviceError>;

    fn devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_rate() {
        assert_eq!(nearest_rate(48000, [44100, 48000, 96000]), Some(48000));
        assert_eq!(nearest_rate(47000, [44100, 48000]), Some(48000));
        assert_eq!(nearest_rate(46050, [44100, 48000]), Some(44100));
        assert_eq!(nearest_rate(8000, [44100, 48000]), Some(44100));
        assert_eq!(nearest_rate(48000, Vec::new()), None);
    }

    #[test]
    fn test_device_names_by_direction() {
        let devices = vec![
            DeviceInfo {
                name: "spk".into(),
                capability: Capability::Playback,
            },
            DeviceInfo {
                name: "mic".into(),
                capability: Capability::Capture,
            },
            DeviceInfo {
                name: "usb".into(),
                capability: Capability::Both,
            },
        ];
        assert_eq!(device_names(&devices, Direction::Playback), ["spk", "usb"]);
        assert_eq!(device_names(&devices, Direction::Capture), ["mic", "usb"]);
    }
}
