//! Measurement-noise calibration from a captured counter log.
//!
//! The quantization variance `(f_osc/N0)²/12` is a lower bound. A real link
//! adds PPS jitter, so the variance of logged samples (after removing the
//! linear frequency trend of the oscillator) is a better `R`.

use super::model::Sampling;

/// Sample variance (Hz²) of the detrended frequency implied by `counts`.
///
/// Non-finite samples are ignored. Returns `None` with fewer than three usable
/// samples.
pub fn counter_frequency_variance(counts: &[f64], sampling: &Sampling) -> Option<f64> {
    let freqs: Vec<f64> = counts
        .iter()
        .filter(|c| c.is_finite())
        .map(|&c| sampling.count_to_frequency(c))
        .collect();
    let n = freqs.len();
    if n < 3 {
        return None;
    }

    // Least-squares line over sample index.
    let nf = n as f64;
    let mean_t = (nf - 1.0) / 2.0;
    let mean_f = freqs.iter().sum::<f64>() / nf;
    let (mut stt, mut stf) = (0.0, 0.0);
    for (i, f) in freqs.iter().enumerate() {
        let dt = i as f64 - mean_t;
        stt += dt * dt;
        stf += dt * (f - mean_f);
    }
    let slope = stf / stt;

    let residual_ss: f64 = freqs
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let r = f - mean_f - slope * (i as f64 - mean_t);
            r * r
        })
        .sum();
    Some(residual_ss / (nf - 2.0))
}
