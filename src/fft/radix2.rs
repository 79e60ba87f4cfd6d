use num_complex::Complex32;
use std::f32::consts::PI;

fn w(k: usize, n: usize) -> Complex32 {
    let angle = -2.0 * PI * (k as f32) / (n as f32);
    Complex32::from_polar(1.0, angle)
}

//
// Recursive radix-2 decimation-in-time FFT.
//
pub struct Radix2Plan {
    n: usize,
    twiddles: Vec<Complex32>,
}

impl Radix2Plan {
    pub fn new(n: usize) -> Option<Self> {
        if !n.is_power_of_two() {
            return None;
        }

        //
        // e^{-2πik/N} for k < N/2. A sub-transform of size N/s reads every
        // s-th entry.
        //
        let twiddles = (0..n / 2).map(|k| w(k, n)).collect();
        Some(Self { n, twiddles })
    }

    pub fn size(&self) -> usize {
        self.n
    }

    /// In-place forward transform. `data.len()` must equal the plan size.
    pub fn transform(&self, data: &mut [Complex32]) {
        assert_eq!(data.len(), self.n, "buffer does not match plan size");
        self.split_combine(data, 1);
    }

    fn split_combine(&self, x: &mut [Complex32], stride: usize) {
        let n = x.len();
        if n <= 1 {
            return;
        }
        let half = n / 2;

        //
        // Even/odd split, transform each half.
        //
        let mut even: Vec<Complex32> = x.iter().step_by(2).copied().collect();
        let mut odd: Vec<Complex32> = x.iter().skip(1).step_by(2).copied().collect();
        self.split_combine(&mut even, stride * 2);
        self.split_combine(&mut odd, stride * 2);

        //
        // Butterfly combine.
        //
        for k in 0..half {
            let t = self.twiddles[k * stride] * odd[k];
            x[k] = even[k] + t;
            x[k + half] = even[k] - t;
        }
    }
}
