//! Interacting Multiple Model bank.
//!
//! Runs several [`KalmanFilter`]s that share a state layout but differ in
//! process noise (fast acquisition, steady state, holdover). Each cycle:
//! mix the previous posteriors through the Markov transition matrix, step
//! every model, score each innovation, update the model probabilities, and
//! combine the posteriors into one fused estimate.
//!
//! Probabilities are updated in the log domain so that models whose
//! likelihood underflows still keep their prior mass instead of collapsing
//! the whole vector.

use serde::{Deserialize, Serialize};

use super::kalman::{FilterConfig, KalmanFilter, UpdateResult};
use super::linalg::{outer, Invert, Matrix, Vector};
use super::model::Kinematics;
use crate::error::{Result, TelemetryError};

/// Lowest log-likelihood a model can score in one cycle.
pub const LOG_LIKELIHOOD_FLOOR: f64 = -1e6;

/// Tolerance on transition-matrix row sums.
const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// One model of the bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    /// Process-noise spectral density `q`.
    pub process_noise: f64,
    /// Multiplier on the shared measurement noise.
    #[serde(default = "unit_scale")]
    pub measurement_scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, process_noise: f64) -> Self {
        Self {
            name: name.into(),
            process_noise,
            measurement_scale: 1.0,
        }
    }
}

/// State layout used by every model in the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateModel {
    /// `[phase, frequency, drift]` measuring phase and frequency.
    #[default]
    PhaseFrequencyDrift,
    /// `[frequency, drift]` measuring frequency.
    FrequencyDrift,
}

/// Model bank configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmConfig {
    pub state_model: StateModel,
    /// Settings shared by every model; `process_noise` is overridden per model.
    pub filter: FilterConfig,
    pub models: Vec<ModelSpec>,
    /// Row-stochastic Markov matrix, `transition[from][to]`.
    pub transition: Vec<Vec<f64>>,
}

impl Default for ImmConfig {
    fn default() -> Self {
        Self {
            state_model: StateModel::PhaseFrequencyDrift,
            filter: FilterConfig::default(),
            models: vec![
                ModelSpec::new("fast", 1.0),
                ModelSpec::new("steady", 1e-3),
                ModelSpec::new("holdover", 1e-6),
            ],
            transition: vec![
                vec![0.90, 0.07, 0.03],
                vec![0.07, 0.86, 0.07],
                vec![0.03, 0.07, 0.90],
            ],
        }
    }
}

impl ImmConfig {
    pub fn validate(&self) -> Result<()> {
        let n = self.models.len();
        if n == 0 {
            return Err(TelemetryError::Config("model bank is empty".to_string()));
        }
        for spec in &self.models {
            self.model_config(spec).validate()?;
        }
        if self.transition.len() != n || self.transition.iter().any(|row| row.len() != n) {
            return Err(TelemetryError::Config(format!(
                "transition matrix must be {}x{}",
                n, n
            )));
        }
        for (i, row) in self.transition.iter().enumerate() {
            if row.iter().any(|p| !(0.0..=1.0).contains(p)) {
                return Err(TelemetryError::Config(format!(
                    "transition row {} has entries outside [0, 1]",
                    i
                )));
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(TelemetryError::Config(format!(
                    "transition row {} sums to {}",
                    i, sum
                )));
            }
        }
        Ok(())
    }

    /// Filter configuration for one model.
    pub fn model_config(&self, spec: &ModelSpec) -> FilterConfig {
        FilterConfig {
            process_noise: spec.process_noise,
            measurement_scale: self.filter.measurement_scale * spec.measurement_scale,
            ..self.filter.clone()
        }
    }
}

/// Result of one bank cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedOutput<const N: usize, const M: usize> {
    pub state: Vector<N>,
    pub covariance: Matrix<N, N>,
    pub probabilities: Vec<f64>,
    /// Floored log-likelihood per model.
    pub log_likelihoods: Vec<f64>,
    pub most_probable: usize,
    /// Gain of the most probable model.
    pub gain: Matrix<N, M>,
    /// Innovation of the most probable model.
    pub innovation: Vector<M>,
    /// Update result of the most probable model.
    pub result: UpdateResult,
}

/// Weighted mean and spread-of-means covariance of several estimates.
///
/// Deviations are taken relative to `reference` so that phases on either
/// side of the wrap point average correctly.
fn moment_match<const N: usize, const M: usize, K: Kinematics<N, M>>(
    estimates: &[(Vector<N>, Matrix<N, N>)],
    weights: &[f64],
    reference: &Vector<N>,
) -> (Vector<N>, Matrix<N, N>) {
    let mut offset = [0.0; N];
    for ((x, _), w) in estimates.iter().zip(weights) {
        let d = K::difference(x, reference);
        for k in 0..N {
            offset[k] += w * d[k];
        }
    }
    let mut mean: Vector<N> = std::array::from_fn(|k| reference[k] + offset[k]);
    K::wrap_state(&mut mean);

    let mut covariance = Matrix::<N, N>::zeros();
    for ((x, p), w) in estimates.iter().zip(weights) {
        let d = K::difference(x, &mean);
        covariance = covariance + (*p + outer(&d, &d)).scale(*w);
    }
    (mean, covariance.symmetrize())
}

/// IMM bank of `N`-state filters.
#[derive(Debug, Clone)]
pub struct ModelBank<const N: usize, const M: usize, K> {
    models: Vec<KalmanFilter<N, M, K>>,
    names: Vec<String>,
    mu: Vec<f64>,
    transition: Vec<Vec<f64>>,
    state: Vector<N>,
    covariance: Matrix<N, N>,
    cycles: u64,
}

impl<const N: usize, const M: usize, K> ModelBank<N, M, K>
where
    K: Kinematics<N, M>,
    Matrix<M, M>: Invert,
{
    /// Build the bank with uniform model probabilities.
    pub fn new(config: &ImmConfig) -> Result<Self> {
        config.validate()?;
        let models = config
            .models
            .iter()
            .map(|spec| KalmanFilter::new(config.model_config(spec)))
            .collect::<Result<Vec<_>>>()?;
        let n = models.len();
        let state = *models[0].state();
        let covariance = *models[0].covariance();

        tracing::info!(
            "Model bank ready: {} models over {}",
            n,
            K::NAME
        );

        Ok(Self {
            models,
            names: config.models.iter().map(|s| s.name.clone()).collect(),
            mu: vec![1.0 / n as f64; n],
            transition: config.transition.clone(),
            state,
            covariance,
            cycles: 0,
        })
    }

    /// Run one full IMM cycle on a raw counter sample.
    pub fn update(&mut self, raw_count: f64) -> FusedOutput<N, M> {
        let n = self.models.len();
        self.cycles += 1;

        // Predicted model probabilities c[i] = Σ_j PI[j][i] mu[j]
        let c: Vec<f64> = (0..n)
            .map(|i| (0..n).map(|j| self.transition[j][i] * self.mu[j]).sum())
            .collect();

        // Mixing, from the previous cycle's posteriors
        let posteriors: Vec<(Vector<N>, Matrix<N, N>)> = self
            .models
            .iter()
            .map(|m| (*m.state(), *m.covariance()))
            .collect();
        for (i, model) in self.models.iter_mut().enumerate() {
            if c[i] <= 0.0 {
                continue;
            }
            let weights: Vec<f64> = (0..n)
                .map(|j| self.transition[j][i] * self.mu[j] / c[i])
                .collect();
            let (x, p) = moment_match::<N, M, K>(&posteriors, &weights, &posteriors[i].0);
            model.set_posterior(x, p);
        }

        // Model-conditioned filtering and scoring
        let outputs: Vec<_> = self.models.iter_mut().map(|m| m.step(raw_count)).collect();
        let log_likelihoods: Vec<f64> = outputs
            .iter()
            .map(|o| match o.log_likelihood {
                Some(ll) if ll.is_finite() => ll.max(LOG_LIKELIHOOD_FLOOR),
                _ => LOG_LIKELIHOOD_FLOOR,
            })
            .collect();

        self.mu = normalize_log_weights(&c, &log_likelihoods);

        // Combination
        let most_probable = argmax(&self.mu);
        let posteriors: Vec<(Vector<N>, Matrix<N, N>)> =
            outputs.iter().map(|o| (o.state, o.covariance)).collect();
        let (state, covariance) =
            moment_match::<N, M, K>(&posteriors, &self.mu, &posteriors[most_probable].0);
        self.state = state;
        self.covariance = covariance;

        tracing::trace!(
            "IMM cycle {}: mu = {:?}, best = {}",
            self.cycles,
            self.mu,
            self.names[most_probable]
        );

        let best = &outputs[most_probable];
        FusedOutput {
            state,
            covariance,
            probabilities: self.mu.clone(),
            log_likelihoods,
            most_probable,
            gain: best.gain,
            innovation: best.innovation,
            result: best.result,
        }
    }

    /// Current model probabilities.
    pub fn probabilities(&self) -> &[f64] {
        &self.mu
    }

    pub fn model_names(&self) -> &[String] {
        &self.names
    }

    pub fn most_probable(&self) -> usize {
        argmax(&self.mu)
    }

    pub fn models(&self) -> &[KalmanFilter<N, M, K>] {
        &self.models
    }

    /// Fused state after the last cycle.
    pub fn state(&self) -> &Vector<N> {
        &self.state
    }

    /// Fused covariance after the last cycle.
    pub fn covariance(&self) -> &Matrix<N, N> {
        &self.covariance
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Total outliers across models.
    pub fn outlier_count(&self) -> u64 {
        self.models.iter().map(|m| m.outlier_count()).sum()
    }
}

/// `mu[i] ∝ c[i] · exp(ll[i])`, computed with log-sum-exp.
///
/// Falls back to the normalized prior when the weights are not usable.
fn normalize_log_weights(prior: &[f64], log_likelihoods: &[f64]) -> Vec<f64> {
    let log_weights: Vec<f64> = prior
        .iter()
        .zip(log_likelihoods)
        .map(|(c, ll)| c.ln() + ll)
        .collect();
    let max = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if max.is_finite() {
        let weights: Vec<f64> = log_weights.iter().map(|lw| (lw - max).exp()).collect();
        let total: f64 = weights.iter().sum();
        if total.is_finite() && total > 0.0 {
            return weights.iter().map(|w| w / total).collect();
        }
    }

    let total: f64 = prior.iter().sum();
    if total.is_finite() && total > 0.0 {
        prior.iter().map(|c| c / total).collect()
    } else {
        vec![1.0 / prior.len() as f64; prior.len()]
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::model::{FreqDrift, PhaseFreqDrift};
    use approx::assert_relative_eq;

    type Bank = ModelBank<3, 2, PhaseFreqDrift>;

    const N0: f64 = 625_000.0;

    fn steady_bank() -> Bank {
        let mut bank = Bank::new(&ImmConfig::default()).unwrap();
        for _ in 0..200 {
            bank.update(N0);
        }
        bank
    }

    #[test]
    fn test_initial_probabilities_uniform() {
        let bank = Bank::new(&ImmConfig::default()).unwrap();
        assert_eq!(bank.probabilities(), &[1.0 / 3.0; 3]);
        assert_eq!(bank.model_names(), &["fast", "steady", "holdover"]);
    }

    #[test]
    fn test_steady_input_favors_low_noise_models() {
        let bank = steady_bank();
        let mu = bank.probabilities();
        assert_relative_eq!(mu.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(mu[2] > mu[1] && mu[1] > mu[0], "mu = {:?}", mu);
        assert!(bank.state()[1].abs() < 1e-6);
    }

    #[test]
    fn test_frequency_step_shifts_mass_to_fast_model() {
        let mut bank = steady_bank();

        let outputs: Vec<_> = (0..20).map(|_| bank.update(N0 + 2.0)).collect();
        assert!(
            outputs[..10].iter().any(|out| out.most_probable == 0),
            "fast model never dominated"
        );
        assert!(outputs[0].probabilities[0] > 0.5);
        // Two counts of offset at 16 Hz per count.
        assert_relative_eq!(bank.state()[1], 32.0, epsilon = 1.0);
    }

    #[test]
    fn test_probabilities_fall_back_to_prior_when_all_floored() {
        let mut bank = steady_bank();
        let mu = bank.probabilities().to_vec();
        let pi = ImmConfig::default().transition;
        let expected: Vec<f64> = (0..3)
            .map(|i| (0..3).map(|j| pi[j][i] * mu[j]).sum())
            .collect();

        // Outside the plausibility window: every model is predict-only.
        let out = bank.update(N0 + 5000.0);
        assert!(out.log_likelihoods.iter().all(|&ll| ll == LOG_LIKELIHOOD_FLOOR));
        for (a, b) in out.probabilities.iter().zip(&expected) {
            assert_relative_eq!(*a, *b, epsilon = 1e-8);
        }
        assert_eq!(out.result, UpdateResult::Implausible);
    }

    #[test]
    fn test_moment_match_across_wrap() {
        let p = Matrix::<3, 3>::identity();
        let estimates = [([0.49, 1.0, 0.0], p), ([-0.49, 3.0, 0.0], p)];
        let (mean, cov) =
            moment_match::<3, 2, PhaseFreqDrift>(&estimates, &[0.5, 0.5], &estimates[0].0);

        // Halfway between 0.49 and -0.49 the short way round is 0.5.
        assert_relative_eq!(mean[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(mean[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(cov.get(0, 0), 1.0 + 0.01 * 0.01, epsilon = 1e-12);
        assert_relative_eq!(cov.get(1, 1), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_log_weights() {
        let mu = normalize_log_weights(&[0.5, 0.5], &[-1e6, -1e6 + 2f64.ln()]);
        assert_relative_eq!(mu[0], 1.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(mu[1], 2.0 / 3.0, epsilon = 1e-9);

        let mu = normalize_log_weights(&[0.0, 0.0], &[0.0, 0.0]);
        assert_eq!(mu, vec![0.5, 0.5]);
    }

    #[test]
    fn test_validate_transition_matrix() {
        let mut config = ImmConfig::default();
        config.transition[0] = vec![0.5, 0.2, 0.2];
        assert!(matches!(Bank::new(&config), Err(TelemetryError::Config(_))));

        let mut config = ImmConfig::default();
        config.transition.pop();
        assert!(Bank::new(&config).is_err());

        let config = ImmConfig {
            models: Vec::new(),
            transition: Vec::new(),
            ..Default::default()
        };
        assert!(Bank::new(&config).is_err());
    }

    #[test]
    fn test_single_model_bank_matches_filter() {
        let config = ImmConfig {
            models: vec![ModelSpec::new("only", 1e-3)],
            transition: vec![vec![1.0]],
            ..Default::default()
        };
        let mut bank = Bank::new(&config).unwrap();
        let mut kf = KalmanFilter::<3, 2, PhaseFreqDrift>::new(config.model_config(&config.models[0])).unwrap();

        for i in 0..50 {
            let count = N0 + (i % 3) as f64;
            let fused = bank.update(count);
            let single = kf.step(count);
            assert_eq!(fused.probabilities, vec![1.0]);
            for k in 0..3 {
                assert_relative_eq!(fused.state[k], single.state[k], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_two_state_bank() {
        let config = ImmConfig {
            state_model: StateModel::FrequencyDrift,
            ..Default::default()
        };
        let mut bank = ModelBank::<2, 1, FreqDrift>::new(&config).unwrap();
        for _ in 0..100 {
            bank.update(N0 + 1.0);
        }
        assert_relative_eq!(bank.state()[0], 16.0, epsilon = 1.0);
        assert_relative_eq!(bank.probabilities().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }
}
