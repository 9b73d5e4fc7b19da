//! Pulse analysis: pretrigger statistics, peak/average/RMS, and optional
//! basis-projection residuals (spec §4.6, grounded on
//! `original_source/process_data.go AnalyzeData`).

use crate::stream::as_signed;
use crate::trigger::DataRecord;

/// A channel's projectors/basis pair (spec §4.6): `projectors` is an
/// `n_basis x record_len` matrix mapping a raw record onto model
/// coefficients; `basis` is its `record_len x n_basis` counterpart used to
/// reconstruct the modeled pulse for the residual. Both are set together
/// and must agree in shape with each other and with the record length
/// (`CoreError::ProjectorBasisShapeMismatch` / panic on violation).
#[derive(Debug, Clone)]
pub struct Projectors {
    /// `n_basis` rows, each `record_len` long.
    pub projectors: Vec<Vec<f64>>,
    /// `record_len` rows, each `n_basis` long.
    pub basis: Vec<Vec<f64>>,
}

impl Projectors {
    pub fn n_basis(&self) -> usize {
        self.projectors.len()
    }

    pub fn record_len(&self) -> usize {
        self.projectors.first().map(|r| r.len()).unwrap_or(0)
    }

    fn check_shape(&self, record_len: usize) {
        assert_eq!(
            self.record_len(),
            record_len,
            "projector row length ({}) does not match record length ({})",
            self.record_len(),
            record_len
        );
        assert_eq!(
            self.basis.len(),
            record_len,
            "basis row count ({}) does not match record length ({})",
            self.basis.len(),
            record_len
        );
        for row in &self.basis {
            assert_eq!(
                row.len(),
                self.n_basis(),
                "basis row width ({}) does not match projector count ({})",
                row.len(),
                self.n_basis()
            );
        }
    }
}

/// Fill in the derived statistics fields of `record` in place, matching
/// `process_data.go AnalyzeData`'s pretrigMean/peakValue/pulseAverage/pulseRMS
/// formulas exactly (peak and average are measured relative to the
/// pretrigger mean; peak never goes below zero since the running max starts
/// at the pretrigger mean itself).
///
/// Panics if `projectors` is `Some` and its shape does not match
/// `record.data.len()` (spec §4.6, §7: a shape mismatch is a programming
/// error upstream, not a recoverable condition).
pub fn analyze(record: &mut DataRecord, projectors: Option<&Projectors>) {
    let signed = record.signed;
    let samples: Vec<f64> = record
        .data
        .iter()
        .map(|&s| as_signed(s, signed) as f64)
        .collect();

    let presamples = record.presamples.min(samples.len());
    let pretrig_mean = mean(&samples[..presamples]);

    let post = &samples[presamples..];
    let mut max = pretrig_mean;
    let mut sum = 0.0;
    let mut sum2 = 0.0;
    for &v in post {
        sum += v;
        sum2 += v * v;
        if v > max {
            max = v;
        }
    }
    let n = post.len().max(1) as f64;
    let pulse_average = sum / n - pretrig_mean;
    let mean_square = sum2 / n - 2.0 * pretrig_mean * (sum / n) + pretrig_mean * pretrig_mean;

    record.pretrig_mean = pretrig_mean;
    record.peak_value = max - pretrig_mean;
    record.pulse_average = pulse_average;
    record.pulse_rms = mean_square.max(0.0).sqrt();

    if let Some(proj) = projectors {
        proj.check_shape(samples.len());
        let coefs: Vec<f64> = proj
            .projectors
            .iter()
            .map(|row| row.iter().zip(samples.iter()).map(|(a, b)| a * b).sum())
            .collect();

        // model_full[i] = sum_j basis[i][j] * coefs[j]
        let model_full: Vec<f64> = proj
            .basis
            .iter()
            .map(|row| row.iter().zip(coefs.iter()).map(|(a, c)| a * c).sum())
            .collect();

        let residual: Vec<f64> = samples
            .iter()
            .zip(model_full.iter())
            .map(|(d, m)| d - m)
            .collect();

        record.model_coefs = Some(coefs);
        record.residual_std_dev = Some(std_dev(&residual));
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Uncorrected (population) standard deviation, matching `process_data.go stdDev`.
fn std_dev(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    let m = mean(xs);
    let ss: f64 = xs.iter().map(|v| (v - m).powi(2)).sum();
    (ss / xs.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn record(data: Vec<u16>, presamples: usize) -> DataRecord {
        DataRecord {
            data,
            trig_frame: 0,
            trig_time: SystemTime::UNIX_EPOCH,
            presamples,
            signed: false,
            channel_index: 0,
            volts_per_arb: 1.0,
            sample_period: Duration::from_micros(100),
            pretrig_mean: 0.0,
            peak_value: 0.0,
            pulse_average: 0.0,
            pulse_rms: 0.0,
            model_coefs: None,
            residual_std_dev: None,
        }
    }

    #[test]
    fn basic_statistics() {
        let mut r = record(vec![100, 100, 100, 100, 200, 300, 100], 4);
        analyze(&mut r, None);
        assert_eq!(r.pretrig_mean, 100.0);
        assert_eq!(r.peak_value, 200.0);
        assert!((r.pulse_average - ((200.0 + 300.0 + 100.0) / 3.0 - 100.0)).abs() < 1e-9);
    }

    #[test]
    fn peak_value_never_negative() {
        // post-trigger samples all below the pretrigger mean
        let mut r = record(vec![100, 100, 50, 60], 2);
        analyze(&mut r, None);
        assert_eq!(r.peak_value, 0.0);
    }

    #[test]
    #[should_panic(expected = "projector row length")]
    fn mismatched_projector_shape_panics() {
        let mut r = record(vec![0, 0, 0, 1, 2], 3);
        let proj = Projectors {
            projectors: vec![vec![1.0, 0.0]], // wrong length
            basis: vec![],
        };
        analyze(&mut r, Some(&proj));
    }

    #[test]
    fn projection_and_residual_reconstruct_exactly_for_identity_basis() {
        let mut r = record(vec![0, 0, 1, 1], 2);
        // identity-like single basis vector reproduces the data exactly
        let proj = Projectors {
            projectors: vec![vec![1.0, 0.0, 0.0, 0.0]],
            basis: vec![vec![1.0], vec![0.0], vec![0.0], vec![0.0]],
        };
        analyze(&mut r, Some(&proj));
        let coefs = r.model_coefs.unwrap();
        assert_eq!(coefs, vec![0.0]);
        assert!(r.residual_std_dev.unwrap() >= 0.0);
    }
}
