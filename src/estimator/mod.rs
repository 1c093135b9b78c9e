//! Estimator module - Kalman filtering of counter samples.
//!
//! - [`KalmanFilter`] - one linear filter over a fixed-size state
//! - [`ModelBank`] - IMM bank of filters with different process noise
//! - [`Estimator`] - the bank with its state layout chosen from configuration
//!
//! Model matrices come from a [`Kinematics`] implementation, so the state
//! and measurement dimensions are fixed when the estimator is built.

pub mod calibrate;
mod imm;
mod kalman;
pub mod linalg;
mod model;
mod prefilter;

pub use imm::{FusedOutput, ImmConfig, ModelBank, ModelSpec, StateModel, LOG_LIKELIHOOD_FLOOR};
pub use kalman::{
    FilterConfig, KalmanFilter, MeasurementNoise, OutlierPolicy, StepOutput, UpdateResult,
    DEFAULT_MAX_COUNT_DEVIATION, DEFAULT_OUTLIER_GATE,
};
pub use model::{wrap_phase, FreqDrift, InitialUncertainty, Kinematics, PhaseFreqDrift, Sampling};
pub use prefilter::{Prefilter, PrefilterConfig};

use serde::Serialize;

use crate::error::Result;
use linalg::{Invert, Matrix, Vector};

/// Estimate snapshot independent of the state dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedEstimate {
    /// Phase (cycles), when tracked.
    pub phase: Option<f64>,
    /// Frequency offset (Hz).
    pub frequency_offset: f64,
    /// Drift (Hz/s), when tracked.
    pub drift: Option<f64>,
    /// Variances of the state components, in state order.
    pub variances: Vec<f64>,
    pub model_probabilities: Vec<f64>,
    /// Index of the most probable model.
    pub most_probable: usize,
}

impl FusedEstimate {
    fn from_state<const N: usize, const M: usize, K: Kinematics<N, M>>(
        x: &Vector<N>,
        p: &Matrix<N, N>,
        model_probabilities: Vec<f64>,
        most_probable: usize,
    ) -> Self {
        Self {
            phase: K::PHASE.map(|i| x[i]),
            frequency_offset: x[K::FREQUENCY],
            drift: K::DRIFT.map(|i| x[i]),
            variances: p.diagonal().to_vec(),
            model_probabilities,
            most_probable,
        }
    }
}

/// A recursive estimator fed one counter sample per interval.
pub trait StateEstimator {
    /// Detailed per-step result.
    type Output;

    /// Advance one interval and fold in `raw_count`.
    fn step(&mut self, raw_count: u32) -> Self::Output;

    /// Current estimate.
    fn estimate(&self) -> FusedEstimate;
}

impl<const N: usize, const M: usize, K> StateEstimator for KalmanFilter<N, M, K>
where
    K: Kinematics<N, M>,
    Matrix<M, M>: Invert,
{
    type Output = StepOutput<N, M>;

    fn step(&mut self, raw_count: u32) -> StepOutput<N, M> {
        KalmanFilter::step(self, f64::from(raw_count))
    }

    fn estimate(&self) -> FusedEstimate {
        FusedEstimate::from_state::<N, M, K>(self.state(), self.covariance(), vec![1.0], 0)
    }
}

impl<const N: usize, const M: usize, K> StateEstimator for ModelBank<N, M, K>
where
    K: Kinematics<N, M>,
    Matrix<M, M>: Invert,
{
    type Output = FusedOutput<N, M>;

    fn step(&mut self, raw_count: u32) -> FusedOutput<N, M> {
        self.update(f64::from(raw_count))
    }

    fn estimate(&self) -> FusedEstimate {
        FusedEstimate::from_state::<N, M, K>(
            self.state(),
            self.covariance(),
            self.probabilities().to_vec(),
            self.most_probable(),
        )
    }
}

/// Model bank with its state layout selected at construction.
#[derive(Debug, Clone)]
pub enum Estimator {
    PhaseFrequencyDrift(ModelBank<3, 2, PhaseFreqDrift>),
    FrequencyDrift(ModelBank<2, 1, FreqDrift>),
}

impl Estimator {
    pub fn new(config: &ImmConfig) -> Result<Self> {
        Ok(match config.state_model {
            StateModel::PhaseFrequencyDrift => Estimator::PhaseFrequencyDrift(ModelBank::new(config)?),
            StateModel::FrequencyDrift => Estimator::FrequencyDrift(ModelBank::new(config)?),
        })
    }

    pub fn model_names(&self) -> &[String] {
        match self {
            Estimator::PhaseFrequencyDrift(bank) => bank.model_names(),
            Estimator::FrequencyDrift(bank) => bank.model_names(),
        }
    }

    pub fn probabilities(&self) -> &[f64] {
        match self {
            Estimator::PhaseFrequencyDrift(bank) => bank.probabilities(),
            Estimator::FrequencyDrift(bank) => bank.probabilities(),
        }
    }

    pub fn cycles(&self) -> u64 {
        match self {
            Estimator::PhaseFrequencyDrift(bank) => bank.cycles(),
            Estimator::FrequencyDrift(bank) => bank.cycles(),
        }
    }

    pub fn outlier_count(&self) -> u64 {
        match self {
            Estimator::PhaseFrequencyDrift(bank) => bank.outlier_count(),
            Estimator::FrequencyDrift(bank) => bank.outlier_count(),
        }
    }
}

impl StateEstimator for Estimator {
    type Output = FusedEstimate;

    fn step(&mut self, raw_count: u32) -> FusedEstimate {
        match self {
            Estimator::PhaseFrequencyDrift(bank) => {
                bank.update(f64::from(raw_count));
                bank.estimate()
            }
            Estimator::FrequencyDrift(bank) => {
                bank.update(f64::from(raw_count));
                bank.estimate()
            }
        }
    }

    fn estimate(&self) -> FusedEstimate {
        match self {
            Estimator::PhaseFrequencyDrift(bank) => bank.estimate(),
            Estimator::FrequencyDrift(bank) => bank.estimate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_selects_state_model() {
        let three = Estimator::new(&ImmConfig::default()).unwrap();
        assert!(matches!(three, Estimator::PhaseFrequencyDrift(_)));
        assert!(three.estimate().phase.is_some());

        let two = Estimator::new(&ImmConfig {
            state_model: StateModel::FrequencyDrift,
            ..Default::default()
        })
        .unwrap();
        let estimate = two.estimate();
        assert!(estimate.phase.is_none());
        assert_eq!(estimate.variances.len(), 2);
    }

    #[test]
    fn test_estimator_step_reports_probabilities() {
        let mut estimator = Estimator::new(&ImmConfig::default()).unwrap();
        let estimate = estimator.step(625_001);
        assert_eq!(estimate.model_probabilities.len(), 3);
        assert!(estimate.frequency_offset > 0.0);
        assert_eq!(estimator.cycles(), 1);
    }

    #[test]
    fn test_single_filter_as_state_estimator() {
        let mut kf = KalmanFilter::<3, 2, PhaseFreqDrift>::new(FilterConfig::default()).unwrap();
        let out = StateEstimator::step(&mut kf, 625_000);
        assert_eq!(out.result, UpdateResult::Accepted);
        assert_eq!(kf.estimate().model_probabilities, vec![1.0]);
    }
}
