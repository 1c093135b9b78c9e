//! Oscillator kinematics: state layout and model matrices.
//!
//! The canonical model tracks `[phase, frequency offset, drift]` and measures
//! `[phase, frequency]`. Phase is counted in cycles of the PPS reference and
//! lives on the circle `(-0.5, 0.5]`.

use serde::{Deserialize, Serialize};

use super::linalg::{self, Matrix, Vector};

/// Wrap a phase (cycles) into `(-0.5, 0.5]`.
///
/// Both `-0.5` and `+0.5` map to `+0.5`.
#[inline]
pub fn wrap_phase(x: f64) -> f64 {
    x - (x - 0.5).ceil()
}

/// Sampling geometry shared by every model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sampling {
    /// Sample interval `T` (s).
    pub interval_s: f64,
    /// Nominal oscillator frequency `f_osc` (Hz).
    pub oscillator_hz: f64,
    /// Expected counter value per interval `N0`.
    pub expected_count: f64,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            interval_s: 1.0,
            oscillator_hz: 10_000_000.0,
            expected_count: 625_000.0,
        }
    }
}

impl Sampling {
    /// Phase advance per unit frequency per second: `1 / (f_osc T)`.
    #[inline]
    pub fn phase_gain(&self) -> f64 {
        1.0 / (self.oscillator_hz * self.interval_s)
    }

    /// Frequency offset (Hz) implied by one counter sample.
    #[inline]
    pub fn count_to_frequency(&self, count: f64) -> f64 {
        (count - self.expected_count) * self.oscillator_hz / self.expected_count
    }

    /// Phase slip (cycles) accumulated over one interval.
    #[inline]
    pub fn count_to_phase_step(&self, count: f64) -> f64 {
        (count - self.expected_count) / self.expected_count
    }

    /// Frequency variance of one uniformly quantized count: `(f_osc/N0)² / 12`.
    pub fn quantization_variance(&self) -> f64 {
        let lsb = self.oscillator_hz / self.expected_count;
        lsb * lsb / 12.0
    }
}

/// Initial 1-sigma uncertainties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialUncertainty {
    /// Phase (cycles).
    pub phase: f64,
    /// Frequency offset (Hz).
    pub frequency: f64,
    /// Drift (Hz/s).
    pub drift: f64,
}

impl Default for InitialUncertainty {
    fn default() -> Self {
        Self {
            // Uniform over one cycle.
            phase: 0.5 / 3f64.sqrt(),
            frequency: 100.0,
            drift: 1.0,
        }
    }
}

/// State layout and model matrices for an `N`-state, `M`-measurement filter.
pub trait Kinematics<const N: usize, const M: usize> {
    /// Human-readable model name.
    const NAME: &'static str;
    /// State index of phase, when tracked.
    const PHASE: Option<usize>;
    /// State index of frequency offset.
    const FREQUENCY: usize;
    /// State index of drift, when tracked.
    const DRIFT: Option<usize>;
    /// Measurement channel carrying phase, when measured.
    const PHASE_CHANNEL: Option<usize>;

    fn transition(sampling: &Sampling) -> Matrix<N, N>;

    /// Discretized process noise for spectral density `q`.
    fn process_noise(sampling: &Sampling, q: f64) -> Matrix<N, N>;

    fn observation() -> Matrix<M, N>;

    /// Measurement noise given the frequency-channel variance (Hz²).
    fn measurement_noise(sampling: &Sampling, frequency_variance: f64) -> Matrix<M, M>;

    fn measurement(phase: f64, frequency: f64) -> Vector<M>;

    fn initial_covariance(sigma: &InitialUncertainty) -> Matrix<N, N>;

    /// `a - b` with the phase component taken the short way round.
    fn difference(a: &Vector<N>, b: &Vector<N>) -> Vector<N> {
        let mut d = linalg::sub(a, b);
        if let Some(i) = Self::PHASE {
            d[i] = wrap_phase(d[i]);
        }
        d
    }

    fn wrap_state(x: &mut Vector<N>) {
        if let Some(i) = Self::PHASE {
            x[i] = wrap_phase(x[i]);
        }
    }

    fn wrap_innovation(y: &mut Vector<M>) {
        if let Some(i) = Self::PHASE_CHANNEL {
            y[i] = wrap_phase(y[i]);
        }
    }
}

/// `[phase, frequency, drift]` driven by white drift-rate noise, measuring
/// `[phase, frequency]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseFreqDrift;

impl Kinematics<3, 2> for PhaseFreqDrift {
    const NAME: &'static str = "phase-frequency-drift";
    const PHASE: Option<usize> = Some(0);
    const FREQUENCY: usize = 1;
    const DRIFT: Option<usize> = Some(2);
    const PHASE_CHANNEL: Option<usize> = Some(0);

    fn transition(s: &Sampling) -> Matrix<3, 3> {
        let t = s.interval_s;
        let k = s.phase_gain();
        Matrix::from_rows([
            [1.0, k * t, k * t * t / 2.0],
            [0.0, 1.0, t],
            [0.0, 0.0, 1.0],
        ])
    }

    fn process_noise(s: &Sampling, q: f64) -> Matrix<3, 3> {
        let t = s.interval_s;
        let k = s.phase_gain();
        let (t2, t3, t4, t5) = (t * t, t.powi(3), t.powi(4), t.powi(5));
        Matrix::from_rows([
            [k * k * t5 / 20.0, k * t4 / 8.0, k * t3 / 6.0],
            [k * t4 / 8.0, t3 / 3.0, t2 / 2.0],
            [k * t3 / 6.0, t2 / 2.0, t],
        ])
        .scale(q)
    }

    fn observation() -> Matrix<2, 3> {
        Matrix::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    fn measurement_noise(s: &Sampling, frequency_variance: f64) -> Matrix<2, 2> {
        let f = s.oscillator_hz;
        Matrix::from_diagonal(&[frequency_variance / (f * f), frequency_variance])
    }

    fn measurement(phase: f64, frequency: f64) -> Vector<2> {
        [phase, frequency]
    }

    fn initial_covariance(sigma: &InitialUncertainty) -> Matrix<3, 3> {
        Matrix::from_diagonal(&[
            sigma.phase * sigma.phase,
            sigma.frequency * sigma.frequency,
            sigma.drift * sigma.drift,
        ])
    }
}

/// `[frequency, drift]` measuring frequency only.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreqDrift;

impl Kinematics<2, 1> for FreqDrift {
    const NAME: &'static str = "frequency-drift";
    const PHASE: Option<usize> = None;
    const FREQUENCY: usize = 0;
    const DRIFT: Option<usize> = Some(1);
    const PHASE_CHANNEL: Option<usize> = None;

    fn transition(s: &Sampling) -> Matrix<2, 2> {
        Matrix::from_rows([[1.0, s.interval_s], [0.0, 1.0]])
    }

    fn process_noise(s: &Sampling, q: f64) -> Matrix<2, 2> {
        let t = s.interval_s;
        Matrix::from_rows([[t.powi(3) / 3.0, t * t / 2.0], [t * t / 2.0, t]]).scale(q)
    }

    fn observation() -> Matrix<1, 2> {
        Matrix::from_rows([[1.0, 0.0]])
    }

    fn measurement_noise(_s: &Sampling, frequency_variance: f64) -> Matrix<1, 1> {
        Matrix([[frequency_variance]])
    }

    fn measurement(_phase: f64, frequency: f64) -> Vector<1> {
        [frequency]
    }

    fn initial_covariance(sigma: &InitialUncertainty) -> Matrix<2, 2> {
        Matrix::from_diagonal(&[sigma.frequency * sigma.frequency, sigma.drift * sigma.drift])
    }
}
