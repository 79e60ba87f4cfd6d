//! Playback and loopback scenarios.
//!
//! A loopback attempt captures on one device while a reference tone is
//! played on another, then checks that the captured signal's dominant
//! frequency is close enough to the tone.

use std::thread;

use crossbeam_channel::{bounded, Sender};

use crate::audio::{self, stream, Backend, Direction, CHANNELS};
use crate::error::{ConfigError, DeviceError};
use crate::fft::dominant_frequency;
use crate::format::PcmSample;
use crate::signal::{frames_for, generate, TEST_FREQUENCY};

pub const DEFAULT_ATTEMPTS: usize = 3;
pub const TEST_AMPLITUDE: f32 = 0.5;

/// Known-bad device skipped by the fallback search unless overridden.
pub const DEFAULT_EXCLUDED_PCM: &str = "surround40:CARD=PCH,DEV=0";

/// Longest tone a single attempt may play and capture.
pub const MAX_DURATION_SECS: f32 = 3600.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LoopbackConfig {
    /// Seconds of tone to play and capture.
    pub duration: f32,
    pub sample_rate: u32,
    pub frequency: f32,
    pub amplitude: f32,
    pub attempts: usize,
    /// Device names never used by the fallback search.
    pub excluded: Vec<String>,
}

impl LoopbackConfig {
    pub fn new(duration: f32, sample_rate: u32) -> Result<Self, ConfigError> {
        if !duration.is_finite() || duration <= 0.0 || duration > MAX_DURATION_SECS {
            return Err(ConfigError::InvalidDuration(duration));
        }
        frames_for(duration, sample_rate)
            .checked_mul(CHANNELS)
            .ok_or(ConfigError::InvalidDuration(duration))?;
        Ok(Self {
            duration,
            sample_rate,
            frequency: TEST_FREQUENCY,
            amplitude: TEST_AMPLITUDE,
            attempts: DEFAULT_ATTEMPTS,
            excluded: vec![DEFAULT_EXCLUDED_PCM.to_string()],
        })
    }

    pub fn with_excluded(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// Allowed deviation in Hz. Longer captures resolve frequency more
    /// finely, so the tolerance shrinks with the duration.
    pub fn epsilon(&self) -> f32 {
        5.0 / self.duration + 1.0
    }

    /// Interleaved samples captured per attempt.
    pub fn capture_samples(&self) -> usize {
        frames_for(self.duration, self.sample_rate) * CHANNELS
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.iter().any(|x| x == name)
    }
}

/// What one attempt measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub detected: f32,
    pub deviation: f32,
}

impl Detection {
    pub fn passes(&self, epsilon: f32) -> bool {
        self.detected > 0.0 && self.deviation <= epsilon
    }
}

/// Plays the reference tone once on `device`.
pub fn playback_test<T: PcmSample, B: Backend>(
    backend: &B,
    config: &LoopbackConfig,
    device: &str,
) -> Result<(), DeviceError> {
    let mut player = stream::open::<T, B>(backend, device, Direction::Playback)?;
    let params = player.configure(config.sample_rate)?;
    let tone = generate::<T>(config.frequency, config.duration, config.amplitude, params.rate);
    player.write(&tone)?;
    player.close()
}

/// Opens and arms the capture side, reports readiness, then fills `buffer`.
///
/// Runs on the capture thread; the stream never leaves it. The filled
/// buffer and the negotiated rate come back through the join handle.
fn record<T: PcmSample, B: Backend>(
    backend: &B,
    device: &str,
    rate: u32,
    mut buffer: Vec<T>,
    ready: Sender<Result<(), DeviceError>>,
) -> Result<(Vec<T>, u32), DeviceError> {
    let armed = stream::open::<T, B>(backend, device, Direction::Capture).and_then(|mut s| {
        s.configure(rate)?;
        s.start()?;
        Ok(s)
    });

    let mut recorder = match armed {
        Ok(recorder) => {
            let _ = ready.send(Ok(()));
            recorder
        }
        Err(e) => {
            let _ = ready.send(Err(e.clone()));
            return Err(e);
        }
    };

    let frames = buffer.len() / CHANNELS;
    recorder.read(&mut buffer, frames)?;
    let rate = recorder.params().map_or(rate, |p| p.rate);
    recorder.close()?;
    Ok((buffer, rate))
}

/// One capture/playback round on a fresh pair of streams.
pub fn run_attempt<T: PcmSample, B: Backend>(
    backend: &B,
    config: &LoopbackConfig,
    capture: &str,
    playback: &str,
) -> Result<Detection, DeviceError> {
    let buffer = vec![T::default(); config.capture_samples()];
    let (ready_tx, ready_rx) = bounded(1);

    thread::scope(|scope| -> Result<Detection, DeviceError> {
        let rate = config.sample_rate;
        let recorder = thread::Builder::new()
            .name("capture".to_string())
            .spawn_scoped(scope, move || {
                record::<T, B>(backend, capture, rate, buffer, ready_tx)
            })
            .map_err(|e| DeviceError::Io {
                device: capture.to_string(),
                reason: e.to_string(),
            })?;

        let played = match ready_rx.recv() {
            Ok(Ok(())) => playback_test::<T, B>(backend, config, playback),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeviceError::Io {
                device: capture.to_string(),
                reason: "capture task exited early".to_string(),
            }),
        };

        //
        // Join barrier: the buffer is only touched again after this.
        //
        let captured = recorder.join().map_err(|_| DeviceError::Io {
            device: capture.to_string(),
            reason: "capture task panicked".to_string(),
        })?;
        played?;
        let (samples, rate) = captured?;

        // interleaved stereo: two samples per frame
        let detected = dominant_frequency(&samples, rate * CHANNELS as u32);
        Ok(Detection {
            detected,
            deviation: (config.frequency - detected).abs(),
        })
    })
}

/// Up to `config.attempts` loopback rounds on one device pair.
pub fn loopback_test<T: PcmSample, B: Backend>(
    backend: &B,
    config: &LoopbackConfig,
    capture: &str,
    playback: &str,
) -> bool {
    let epsilon = config.epsilon();

    for attempt in 1..=config.attempts {
        match run_attempt::<T, B>(backend, config, capture, playback) {
            Ok(detection) => {
                if detection.detected > 0.0 {
                    log::info!("Dominant frequency: {}", detection.detected);
                    log::info!("Deviation: {}", detection.deviation);
                } else {
                    log::debug!("No dominant frequency in capture from {}", capture);
                }
                if detection.passes(epsilon) {
                    return true;
                }
            }
            Err(e) => {
                log::info!(
                    "Attempt {}/{} ({} -> {}) failed: {}",
                    attempt,
                    config.attempts,
                    playback,
                    capture,
                    e
                );
            }
        }
    }
    false
}

/// Tries every (capture, playback) combination the backend offers.
///
/// Devices that can do both directions appear in both lists. Names in the
/// exclusion list are never opened, and `already_tried` (a `(capture,
/// playback)` pair) is skipped.
pub fn fallback_search<T: PcmSample, B: Backend>(
    backend: &B,
    config: &LoopbackConfig,
    already_tried: Option<(&str, &str)>,
) -> bool {
    let devices = match backend.devices() {
        Ok(devices) => devices,
        Err(e) => {
            log::info!("Couldn't get the device list: {}", e);
            return false;
        }
    };

    let usable = |direction: Direction| -> Vec<String> {
        audio::device_names(&devices, direction)
            .into_iter()
            .filter(|name| !config.is_excluded(name))
            .collect()
    };
    let players = usable(Direction::Playback);
    let recorders = usable(Direction::Capture);

    for player in &players {
        for recorder in &recorders {
            if already_tried == Some((recorder.as_str(), player.as_str())) {
                continue;
            }
            log::info!("Trying combination {} -> {}", player, recorder);
            if loopback_test::<T, B>(backend, config, recorder, player) {
                return true;
            }
        }
    }
    false
}

/// The `loopback` scenario: the requested pair first, then every other pair.
pub fn run_loopback<T: PcmSample, B: Backend>(
    backend: &B,
    config: &LoopbackConfig,
    capture: &str,
    playback: &str,
) -> bool {
    if loopback_test::<T, B>(backend, config, capture, playback) {
        return true;
    }
    log::info!(
        "Loopback {} -> {} failed, searching other device pairs",
        playback,
        capture
    );
    fallback_search::<T, B>(backend, config, Some((capture, playback)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsilon_shrinks_with_duration() {
        let one = LoopbackConfig::new(1.0, 48000).unwrap();
        assert_eq!(one.epsilon(), 6.0);
        let five = LoopbackConfig::new(5.0, 48000).unwrap();
        assert_eq!(five.epsilon(), 2.0);
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert_eq!(
            LoopbackConfig::new(0.0, 48000),
            Err(ConfigError::InvalidDuration(0.0))
        );
        assert!(LoopbackConfig::new(-1.0, 48000).is_err());
        assert!(LoopbackConfig::new(f32::NAN, 48000).is_err());
    }

    #[test]
    fn test_rejects_durations_too_long_to_buffer() {
        assert_eq!(
            LoopbackConfig::new(1e30, 48000),
            Err(ConfigError::InvalidDuration(1e30))
        );
        assert!(LoopbackConfig::new(1e6, 48000).is_err());
        assert!(LoopbackConfig::new(f32::MAX, u32::MAX).is_err());

        let longest = LoopbackConfig::new(MAX_DURATION_SECS, 48000).unwrap();
        assert_eq!(longest.capture_samples(), 3600 * 48000 * CHANNELS);
    }

    #[test]
    fn test_capture_buffer_is_whole_stereo_frames() {
        let config = LoopbackConfig::new(1.0, 48000).unwrap();
        assert_eq!(config.capture_samples(), 96000);
        let config = LoopbackConfig::new(0.00001, 48000).unwrap();
        assert_eq!(config.capture_samples(), 2);
    }

    #[test]
    fn test_default_exclusion() {
        let config = LoopbackConfig::new(1.0, 48000).unwrap();
        assert!(config.is_excluded(DEFAULT_EXCLUDED_PCM));
        assert!(!config.is_excluded("default"));
        let config = config.with_excluded(vec![]);
        assert!(!config.is_excluded(DEFAULT_EXCLUDED_PCM));
    }

    #[test]
    fn test_detection_verdict() {
        let ok = Detection {
            detected: 443.0,
            deviation: 3.0,
        };
        assert!(ok.passes(6.0));
        assert!(!ok.passes(2.0));

        let silent = Detection {
            detected: 0.0,
            deviation: 440.0,
        };
        assert!(!silent.passes(1000.0));
    }

    #[test]
    fn test_tone_round_trip_within_epsilon() {
        let config = LoopbackConfig::new(1.0, 48000).unwrap();
        let tone = generate::<i16>(440.0, 1.0, TEST_AMPLITUDE, 48000);
        let detected = dominant_frequency(&tone, 48000 * CHANNELS as u32);
        let deviation = (440.0 - detected).abs();
        assert!(deviation <= config.epsilon(), "deviation {}", deviation);
    }
}
