//! Single-model linear Kalman filter over a counter measurement.
//!
//! Each step converts one raw counter sample into a frequency measurement
//! (and, for phase-tracking models, an accumulated phase measurement), then
//! runs a predict/update cycle. The covariance update uses the Joseph form and
//! is re-symmetrized after every operation.

use std::f64::consts::TAU;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use super::linalg::{self, Invert, Matrix, Vector};
use super::model::{wrap_phase, InitialUncertainty, Kinematics, Sampling};
use super::prefilter::{Prefilter, PrefilterConfig};
use crate::error::{Result, TelemetryError};

/// 99% chi-squared quantile for 2 degrees of freedom.
pub const DEFAULT_OUTLIER_GATE: f64 = 9.21;

/// Default plausibility window around `N0` (counts).
pub const DEFAULT_MAX_COUNT_DEVIATION: f64 = 1000.0;

/// What to do with a measurement whose squared Mahalanobis distance exceeds
/// the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// Predict only.
    Skip,
    /// Scale `R` by `d² / gate` and correct with the inflated noise.
    #[default]
    InflateR,
}

/// Source of the frequency-channel measurement variance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementNoise {
    /// One uniformly quantized count: `(f_osc / N0)² / 12`.
    #[default]
    Quantization,
    /// Measured sample variance (Hz²).
    Calibrated { frequency_variance: f64 },
}

/// Filter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub sampling: Sampling,
    /// Process-noise spectral density `q`.
    pub process_noise: f64,
    pub measurement_noise: MeasurementNoise,
    /// Multiplier on the measurement noise (measurement trust).
    pub measurement_scale: f64,
    pub initial_sigma: InitialUncertainty,
    pub prefilter: PrefilterConfig,
    /// Chi-squared gate on the innovation; `None` disables gating.
    pub outlier_gate: Option<f64>,
    pub outlier_policy: OutlierPolicy,
    /// Samples further than this from `N0` are not used; `None` disables the check.
    pub max_count_deviation: Option<f64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sampling: Sampling::default(),
            process_noise: 1e-3,
            measurement_noise: MeasurementNoise::Quantization,
            measurement_scale: 1.0,
            initial_sigma: InitialUncertainty::default(),
            prefilter: PrefilterConfig::None,
            outlier_gate: Some(DEFAULT_OUTLIER_GATE),
            outlier_policy: OutlierPolicy::InflateR,
            max_count_deviation: Some(DEFAULT_MAX_COUNT_DEVIATION),
        }
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(TelemetryError::Config(format!(
            "{} must be positive and finite, got {}",
            name, value
        )))
    }
}

impl FilterConfig {
    /// Reject values that would make the filter meaningless.
    pub fn validate(&self) -> Result<()> {
        positive("sample interval", self.sampling.interval_s)?;
        positive("oscillator frequency", self.sampling.oscillator_hz)?;
        positive("expected count", self.sampling.expected_count)?;
        positive("measurement scale", self.measurement_scale)?;
        if !(self.process_noise.is_finite() && self.process_noise >= 0.0) {
            return Err(TelemetryError::Config(format!(
                "process noise must be non-negative, got {}",
                self.process_noise
            )));
        }
        if let MeasurementNoise::Calibrated { frequency_variance } = self.measurement_noise {
            positive("calibrated frequency variance", frequency_variance)?;
        }
        let sigma = &self.initial_sigma;
        for (name, v) in [
            ("initial phase sigma", sigma.phase),
            ("initial frequency sigma", sigma.frequency),
            ("initial drift sigma", sigma.drift),
        ] {
            positive(name, v)?;
        }
        if let Some(gate) = self.outlier_gate {
            positive("outlier gate", gate)?;
        }
        if let Some(max) = self.max_count_deviation {
            positive("max count deviation", max)?;
        }
        self.prefilter.validate().map_err(TelemetryError::Config)
    }

    /// Frequency-channel measurement variance (Hz²) after scaling.
    pub fn frequency_variance(&self) -> f64 {
        let base = match self.measurement_noise {
            MeasurementNoise::Quantization => self.sampling.quantization_variance(),
            MeasurementNoise::Calibrated { frequency_variance } => frequency_variance,
        };
        base * self.measurement_scale
    }
}

/// Result of a measurement update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateResult {
    /// Measurement was accepted and state was updated.
    Accepted,
    /// Measurement exceeded the gate and was applied with inflated noise.
    Inflated,
    /// Measurement exceeded the gate and was not applied.
    Rejected,
    /// Sample outside the plausibility window (or not finite); not applied.
    Implausible,
    /// Innovation covariance was singular or not finite; not applied.
    Degenerate,
}

impl UpdateResult {
    /// Whether the outlier counter was incremented for this step.
    pub fn is_outlier(self) -> bool {
        matches!(
            self,
            UpdateResult::Inflated | UpdateResult::Rejected | UpdateResult::Implausible
        )
    }

    /// Whether the state was corrected.
    pub fn is_corrected(self) -> bool {
        matches!(self, UpdateResult::Accepted | UpdateResult::Inflated)
    }
}

/// Everything one update produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput<const N: usize, const M: usize> {
    pub state: Vector<N>,
    pub covariance: Matrix<N, N>,
    /// Kalman gain (zero when no correction was applied).
    pub gain: Matrix<N, M>,
    pub innovation: Vector<M>,
    /// Nominal innovation covariance `H P⁻ Hᵀ + R`.
    pub innovation_covariance: Matrix<M, M>,
    pub mahalanobis_sq: f64,
    /// Gaussian log-likelihood of the innovation, when defined.
    pub log_likelihood: Option<f64>,
    pub result: UpdateResult,
}

/// Linear Kalman filter with `N` states and `M` measurement channels.
#[derive(Debug, Clone)]
pub struct KalmanFilter<const N: usize, const M: usize, K> {
    config: FilterConfig,
    f: Matrix<N, N>,
    q: Matrix<N, N>,
    h: Matrix<M, N>,
    r: Matrix<M, M>,
    x: Vector<N>,
    p: Matrix<N, N>,
    prefilter: Prefilter,
    /// Accumulated phase measurement (cycles, wrapped).
    measured_phase: f64,
    outliers: u64,
    iterations: u64,
    last: Option<StepOutput<N, M>>,
    _model: PhantomData<K>,
}

impl<const N: usize, const M: usize, K> KalmanFilter<N, M, K>
where
    K: Kinematics<N, M>,
    Matrix<M, M>: Invert,
{
    /// Build a filter at zero state with the configured initial covariance.
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        let s = config.sampling;
        Ok(Self {
            f: K::transition(&s),
            q: K::process_noise(&s, config.process_noise),
            h: K::observation(),
            r: K::measurement_noise(&s, config.frequency_variance()),
            x: [0.0; N],
            p: K::initial_covariance(&config.initial_sigma),
            prefilter: Prefilter::new(config.prefilter),
            measured_phase: 0.0,
            outliers: 0,
            iterations: 0,
            last: None,
            _model: PhantomData,
            config,
        })
    }

    /// Propagate state and covariance one interval.
    pub fn predict(&mut self) {
        self.x = self.f.mul_vec(&self.x);
        K::wrap_state(&mut self.x);
        self.p = (self.f * self.p * self.f.transpose() + self.q).symmetrize();
    }

    /// Fold in one raw counter sample.
    pub fn update(&mut self, raw_count: f64) -> StepOutput<N, M> {
        self.iterations += 1;
        let sampling = self.config.sampling;

        let plausible = raw_count.is_finite()
            && self
                .config
                .max_count_deviation
                .map_or(true, |max| (raw_count - sampling.expected_count).abs() <= max);
        if !plausible {
            self.outliers += 1;
            tracing::debug!("Implausible counter sample {}", raw_count);
            return self.finish(
                [0.0; M],
                Matrix::zeros(),
                Matrix::zeros(),
                f64::NAN,
                None,
                UpdateResult::Implausible,
            );
        }

        let count = self.prefilter.apply(raw_count);
        self.measured_phase =
            wrap_phase(self.measured_phase + sampling.count_to_phase_step(count));
        let z = K::measurement(self.measured_phase, sampling.count_to_frequency(count));

        let mut y = linalg::sub(&z, &self.h.mul_vec(&self.x));
        K::wrap_innovation(&mut y);

        let pht = self.p * self.h.transpose();
        let s_nominal = (self.h * pht + self.r).symmetrize();
        let Some(s_nominal_inv) = s_nominal.try_inverse() else {
            tracing::debug!("Degenerate innovation covariance, skipping correction");
            return self.finish(
                y,
                s_nominal,
                Matrix::zeros(),
                f64::NAN,
                None,
                UpdateResult::Degenerate,
            );
        };

        let d2 = linalg::dot(&y, &s_nominal_inv.mul_vec(&y));
        let log_likelihood =
            -0.5 * (d2 + s_nominal.determinant().ln() + M as f64 * TAU.ln());
        let log_likelihood = log_likelihood.is_finite().then_some(log_likelihood);

        let mut r = self.r;
        let mut s_inv = s_nominal_inv;
        let mut result = UpdateResult::Accepted;

        if let Some(gate) = self.config.outlier_gate.filter(|&gate| d2 > gate) {
            self.outliers += 1;
            match self.config.outlier_policy {
                OutlierPolicy::Skip => {
                    tracing::debug!("Outlier rejected: d² = {:.3} > {:.3}", d2, gate);
                    return self.finish(
                        y,
                        s_nominal,
                        Matrix::zeros(),
                        d2,
                        log_likelihood,
                        UpdateResult::Rejected,
                    );
                }
                OutlierPolicy::InflateR => {
                    tracing::debug!("Outlier inflated: d² = {:.3} > {:.3}", d2, gate);
                    r = r.scale(d2 / gate);
                    match (self.h * pht + r).symmetrize().try_inverse() {
                        Some(inv) => s_inv = inv,
                        None => {
                            return self.finish(
                                y,
                                s_nominal,
                                Matrix::zeros(),
                                d2,
                                None,
                                UpdateResult::Degenerate,
                            )
                        }
                    }
                    result = UpdateResult::Inflated;
                }
            }
        }

        let gain = pht * s_inv;
        self.x = linalg::add(&self.x, &gain.mul_vec(&y));
        K::wrap_state(&mut self.x);

        // Joseph form: (I - KH) P (I - KH)ᵀ + K R Kᵀ
        let ikh = Matrix::<N, N>::identity() - gain * self.h;
        self.p = (ikh * self.p * ikh.transpose() + gain * r * gain.transpose()).symmetrize();

        self.finish(y, s_nominal, gain, d2, log_likelihood, result)
    }

    fn finish(
        &mut self,
        innovation: Vector<M>,
        innovation_covariance: Matrix<M, M>,
        gain: Matrix<N, M>,
        mahalanobis_sq: f64,
        log_likelihood: Option<f64>,
        result: UpdateResult,
    ) -> StepOutput<N, M> {
        let output = StepOutput {
            state: self.x,
            covariance: self.p,
            gain,
            innovation,
            innovation_covariance,
            mahalanobis_sq,
            log_likelihood,
            result,
        };
        self.last = Some(output);
        output
    }

    /// Predict, then update.
    pub fn step(&mut self, raw_count: f64) -> StepOutput<N, M> {
        self.predict();
        self.update(raw_count)
    }

    /// Replace the posterior (used by model mixing).
    pub fn set_posterior(&mut self, x: Vector<N>, p: Matrix<N, N>) {
        self.x = x;
        K::wrap_state(&mut self.x);
        self.p = p.symmetrize();
    }

    pub fn state(&self) -> &Vector<N> {
        &self.x
    }

    pub fn covariance(&self) -> &Matrix<N, N> {
        &self.p
    }

    pub fn frequency_offset(&self) -> f64 {
        self.x[K::FREQUENCY]
    }

    pub fn phase(&self) -> Option<f64> {
        K::PHASE.map(|i| self.x[i])
    }

    pub fn drift(&self) -> Option<f64> {
        K::DRIFT.map(|i| self.x[i])
    }

    pub fn outlier_count(&self) -> u64 {
        self.outliers
    }

    /// Number of updates performed.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn last_output(&self) -> Option<&StepOutput<N, M>> {
        self.last.as_ref()
    }

    /// Log-likelihood of the most recent innovation.
    pub fn log_likelihood(&self) -> Option<f64> {
        self.last.and_then(|o| o.log_likelihood)
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
}
