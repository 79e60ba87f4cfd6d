use num_complex::Complex32;

use super::find_plan;
use crate::format::PcmSample;

/// Frequency in Hz of the strongest bin in `buffer`'s spectrum.
///
/// The mean is removed first so unsigned encodings do not peak at DC, and
/// the sequence is zero-padded to the next power of two. Only the lower half
/// of the bins is searched; for real input the upper half mirrors it.
/// Returns `0.0` for an empty buffer or one without any signal.
pub fn dominant_frequency<T: PcmSample>(buffer: &[T], sample_rate: u32) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }

    let n = buffer.len().next_power_of_two();
    let Some(plan) = find_plan(n) else {
        return 0.0;
    };

    let mean = buffer.iter().map(|s| s.to_f64()).sum::<f64>() / buffer.len() as f64;
    let mut data = vec![Complex32::default(); n];
    for (slot, sample) in data.iter_mut().zip(buffer) {
        *slot = Complex32::new((sample.to_f64() - mean) as f32, 0.0);
    }

    plan.transform(&mut data);

    //
    // Argmax over the magnitudes of the non-mirrored half, first maximum wins.
    //
    let mut peak = 0;
    let mut peak_mag = 0.0f32;
    for (i, c) in data[..n / 2].iter().enumerate() {
        let mag = c.norm();
        if mag > peak_mag {
            peak = i;
            peak_mag = mag;
        }
    }

    peak as f32 / (n as f32 / sample_rate as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::generate;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_empty_buffer() {
        assert_eq!(dominant_frequency::<i16>(&[], 48000), 0.0);
    }

    #[test]
    fn test_silence_has_no_dominant_frequency() {
        assert_eq!(dominant_frequency(&[0i16; 4096], 48000), 0.0);
        assert_eq!(dominant_frequency(&[32768u16; 4096], 48000), 0.0);
    }

    #[test]
    fn test_pure_sine_within_one_bin() {
        let rate = 48000;
        let len = 8192;
        let bin = rate as f32 / len as f32;
        for freq in [100.0, 440.0, 1000.0, 7333.0, 15000.0] {
            let detected = dominant_frequency(&sine(freq, rate, len), rate);
            assert!(
                (detected - freq).abs() <= bin,
                "{} Hz detected as {} Hz",
                freq,
                detected
            );
        }
    }

    #[test]
    fn test_unsigned_tone_ignores_dc() {
        let tone = generate::<u8>(440.0, 0.5, 0.5, 44100);
        let detected = dominant_frequency(&tone, 44100 * 2);
        assert!((detected - 440.0).abs() < 2.0, "detected {}", detected);
    }

    #[test]
    fn test_non_power_of_two_length_is_padded() {
        // 96000 samples of interleaved stereo, effective rate 96 kHz
        let tone = generate::<i16>(440.0, 1.0, 0.5, 48000);
        assert_eq!(tone.len(), 96000);
        let detected = dominant_frequency(&tone, 96000);
        assert!((detected - 440.0).abs() <= 96000.0 / 131072.0);
    }
}
