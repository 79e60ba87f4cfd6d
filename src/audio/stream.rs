use std::marker::PhantomData;

use super::{Backend, Direction, HwParams, Pcm, CHANNELS};
use crate::error::DeviceError;
use crate::format::PcmSample;

/// Consecutive xruns tolerated on one period before giving up.
const MAX_CONSECUTIVE_XRUNS: usize = 8;

/// Opens `name` on `backend` and wraps the handle in a [`PcmStream`].
pub fn open<T: PcmSample, B: Backend>(
    backend: &B,
    name: &str,
    direction: Direction,
) -> Result<PcmStream<T, B::Handle<T>>, DeviceError> {
    let pcm = backend.open::<T>(name, direction)?;
    log::debug!("PCM opened. Name: {} PCM mode: {}", name, direction);
    Ok(PcmStream::new(pcm))
}

/// Exclusive owner of one open PCM.
///
/// Hardware parameters are negotiated once and then fixed for the life of
/// the stream. Closing drains playback and drops capture; dropping an
/// unclosed stream performs the same close.
pub struct PcmStream<T: PcmSample, P: Pcm<T>> {
    pcm: Option<P>,
    direction: Direction,
    params: Option<HwParams>,
    started: bool,
    _sample: PhantomData<T>,
}

impl<T: PcmSample, P: Pcm<T>> PcmStream<T, P> {
    pub fn new(pcm: P) -> Self {
        Self {
            direction: pcm.direction(),
            pcm: Some(pcm),
            params: None,
            started: false,
            _sample: PhantomData,
        }
    }

    pub fn params(&self) -> Option<HwParams> {
        self.params
    }

    pub fn name(&self) -> &str {
        self.pcm.as_ref().map_or("<closed>", |p| p.name())
    }

    fn pcm(&mut self) -> Result<&mut P, DeviceError> {
        // None once shutdown has released the handle
        self.pcm
            .as_mut()
            .ok_or_else(|| DeviceError::NotConfigured("<closed>".to_string()))
    }

    fn configured(&self) -> Result<HwParams, DeviceError> {
        self.params
            .ok_or_else(|| DeviceError::NotConfigured(self.name().to_string()))
    }

    /// Negotiates interleaved stereo in `T`'s encoding at the rate nearest to
    /// `desired_rate`.
    pub fn configure(&mut self, desired_rate: u32) -> Result<HwParams, DeviceError> {
        if self.params.is_some() {
            return Err(DeviceError::Configure {
                device: self.name().to_string(),
                param: "hw params",
                reason: "already configured".to_string(),
            });
        }

        let params = self.pcm()?.set_hw_params(desired_rate)?;
        if params.rate != desired_rate {
            log::debug!(
                "{}: requested {} Hz, hardware picked {} Hz",
                self.name(),
                desired_rate,
                params.rate
            );
        }
        log::debug!("got rate: {}", params.rate);
        log::debug!(
            "period: {} frames ({:.2} ms)",
            params.period_frames,
            params.period_frames as f64 * 1000.0 / f64::from(params.rate)
        );
        log::debug!("format: {} channels: {}", params.encoding, params.channels);

        self.params = Some(params);
        Ok(params)
    }

    /// Starts the stream if it is not running yet.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        self.configured()?;
        if !self.started {
            self.pcm()?.start()?;
            self.started = true;
            log::debug!("{}: started", self.name());
        }
        Ok(())
    }

    fn recover(&mut self, xruns: &mut usize) -> Result<(), DeviceError> {
        *xruns += 1;
        if *xruns > MAX_CONSECUTIVE_XRUNS {
            return Err(DeviceError::Io {
                device: self.name().to_string(),
                reason: format!("{} consecutive xruns", xruns),
            });
        }
        match self.direction {
            Direction::Playback => log::debug!("Buffer underrun"),
            Direction::Capture => log::debug!("Buffer overrun"),
        }
        self.started = false;
        self.pcm()?.prepare()
    }

    /// Writes interleaved frames, one period per driver call.
    ///
    /// Underruns are recovered by preparing the stream and retrying the same
    /// period. A trailing partial frame is ignored.
    pub fn write(&mut self, buffer: &[T]) -> Result<(), DeviceError> {
        let params = self.configured()?;
        let usable = buffer.len() - buffer.len() % CHANNELS;

        for chunk in buffer[..usable].chunks(params.period_samples()) {
            let mut xruns = 0;
            loop {
                match self.pcm()?.writei(chunk) {
                    Ok(_) => break,
                    Err(DeviceError::Xrun(_)) => self.recover(&mut xruns)?,
                    Err(e) => return Err(e),
                }
            }
        }

        //
        // The device may not have auto-started if less than a buffer was queued.
        //
        self.start()
    }

    /// Captures exactly `n_frames` into the front of `buffer`.
    ///
    /// Whole periods land directly in `buffer`; a tail shorter than a period
    /// is read into a period-sized scratch buffer and only the needed prefix
    /// is copied out.
    pub fn read(&mut self, buffer: &mut [T], n_frames: usize) -> Result<(), DeviceError> {
        let params = self.configured()?;
        let period = params.period_samples();
        let wanted = (n_frames * CHANNELS).min(buffer.len() - buffer.len() % CHANNELS);
        let mut scratch: Vec<T> = Vec::new();
        let mut filled = 0;
        let mut xruns = 0;

        self.start()?;

        while filled < wanted {
            let remaining = wanted - filled;
            let result = if remaining >= period {
                self.pcm()?
                    .readi(&mut buffer[filled..filled + period])
                    .map(|frames| frames * CHANNELS)
            } else {
                scratch.resize(period, <T as cpal::Sample>::EQUILIBRIUM);
                self.pcm()?.readi(&mut scratch).map(|_| {
                    buffer[filled..wanted].copy_from_slice(&scratch[..remaining]);
                    remaining
                })
            };

            match result {
                Ok(0) => {
                    return Err(DeviceError::Io {
                        device: self.name().to_string(),
                        reason: "short read".to_string(),
                    })
                }
                Ok(samples) => {
                    filled += samples;
                    xruns = 0;
                }
                Err(DeviceError::Xrun(_)) => {
                    self.recover(&mut xruns)?;
                    self.start()?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drains a playback stream without closing it.
    pub fn drain(&mut self) -> Result<(), DeviceError> {
        if self.direction == Direction::Playback {
            log::debug!("Draining PCM {}", self.name());
            self.pcm()?.drain()?;
            self.started = false;
        }
        Ok(())
    }

    /// Drains (playback) or drops (capture), then releases the device.
    pub fn close(mut self) -> Result<(), DeviceError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), DeviceError> {
        let Some(mut pcm) = self.pcm.take() else {
            return Ok(());
        };

        let result = match self.direction {
            Direction::Playback => {
                log::debug!("Draining PCM {}", pcm.name());
                pcm.drain()
            }
            Direction::Capture => {
                log::debug!("Dropping PCM {}", pcm.name());
                pcm.drop_pending()
            }
        };
        log::debug!("Closing PCM {}", pcm.name());
        drop(pcm);
        result
    }
}

impl<T: PcmSample, P: Pcm<T>> Drop for PcmStream<T, P> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to close PCM: {}", e);
        }
    }
}
