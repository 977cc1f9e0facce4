//! Least-squares fits of TPS against worker count.
//!
//! Four closed-form models; each records its R² in the original space so a
//! nonlinear transform cannot flatter a bad fit. The best model is simply
//! the highest finite R².

use crate::engine::analysis::sanitize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Linear,
    Logarithmic,
    Exponential,
    Logistic,
}

impl Model {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Logarithmic => "logarithmic",
            Self::Exponential => "exponential",
            Self::Logistic => "logistic",
        }
    }

    #[must_use]
    pub const fn all() -> [Self; 4] {
        [
            Self::Linear,
            Self::Logarithmic,
            Self::Exponential,
            Self::Logistic,
        ]
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fitted model and its goodness of fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFit {
    pub model: Model,
    /// Model parameters, meaning depends on the model:
    /// linear/logarithmic `[intercept, slope]`, exponential `[a, b]` for
    /// `a·e^(b·x)`, logistic `[l, k, x0]`.
    pub params: Vec<f64>,
    pub r_squared: f64,
}

impl ModelFit {
    /// Predicted TPS at `x` workers. `extrapolated` is set when `x` lies
    /// outside the fitted range.
    #[must_use]
    pub fn predict(&self, x: f64, observed_range: (f64, f64)) -> Prediction {
        let y = match (self.model, self.params.as_slice()) {
            (Model::Linear, [a, b]) => a + b * x,
            (Model::Logarithmic, [a, b]) => {
                if x > 0.0 {
                    a + b * x.ln()
                } else {
                    0.0
                }
            }
            (Model::Exponential, [a, b]) => a * (b * x).exp(),
            (Model::Logistic, [l, k, x0]) => l / (1.0 + (-k * (x - x0)).exp()),
            _ => 0.0,
        };
        Prediction {
            tps: sanitize(y),
            extrapolated: x < observed_range.0 || x > observed_range.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub tps: f64,
    pub extrapolated: bool,
}

/// All model fits over `(workers, tps)` points, plus the winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub models: BTreeMap<String, ModelFit>,
    pub best: Option<Model>,
    pub observed_workers: (f64, f64),
}

impl FitReport {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
            best: None,
            observed_workers: (0.0, 0.0),
        }
    }
}

/// Fit every model against the points. Non-finite points and non-positive
/// worker counts are dropped first; fewer than three surviving points yields
/// an empty report.
#[must_use]
pub fn fit_all(points: &[(f64, f64)]) -> FitReport {
    let clean: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|(x, y)| x.is_finite() && y.is_finite() && *x > 0.0)
        .collect();

    if clean.len() < 3 {
        return FitReport::empty();
    }

    let min_x = clean.iter().map(|(x, _)| *x).fold(f64::INFINITY, f64::min);
    let max_x = clean
        .iter()
        .map(|(x, _)| *x)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut models = BTreeMap::new();
    for model in Model::all() {
        if let Some(fit) = fit_model(model, &clean) {
            models.insert(model.as_str().to_string(), fit);
        }
    }

    let best = models
        .values()
        .filter(|fit| fit.r_squared.is_finite())
        .max_by(|a, b| a.r_squared.total_cmp(&b.r_squared))
        .map(|fit| fit.model);

    FitReport {
        models,
        best,
        observed_workers: (min_x, max_x),
    }
}

fn fit_model(model: Model, points: &[(f64, f64)]) -> Option<ModelFit> {
    let (params, predictor): (Vec<f64>, Box<dyn Fn(f64) -> f64>) = match model {
        Model::Linear => {
            let (a, b) = least_squares(points.iter().copied())?;
            (vec![a, b], Box::new(move |x| a + b * x))
        }
        Model::Logarithmic => {
            let (a, b) = least_squares(points.iter().map(|(x, y)| (x.ln(), *y)))?;
            (vec![a, b], Box::new(move |x: f64| a + b * x.ln()))
        }
        Model::Exponential => {
            if points.iter().any(|(_, y)| *y <= 0.0) {
                return None;
            }
            let (ln_a, b) = least_squares(points.iter().map(|(x, y)| (*x, y.ln())))?;
            let a = ln_a.exp();
            (vec![a, b], Box::new(move |x: f64| a * (b * x).exp()))
        }
        Model::Logistic => {
            let max_y = points.iter().map(|(_, y)| *y).fold(f64::NEG_INFINITY, f64::max);
            if max_y <= 0.0 {
                return None;
            }
            let l = max_y * 1.1;
            // linearize: ln(l/y - 1) = k·x0 - k·x
            let transformed: Vec<(f64, f64)> = points
                .iter()
                .filter(|(_, y)| *y > 0.0 && *y < l)
                .map(|(x, y)| (*x, (l / y - 1.0).ln()))
                .collect();
            if transformed.len() < 3 {
                return None;
            }
            let (intercept, slope) = least_squares(transformed.iter().copied())?;
            let k = -slope;
            if k == 0.0 || !k.is_finite() {
                return None;
            }
            let x0 = intercept / k;
            (
                vec![l, k, x0],
                Box::new(move |x: f64| l / (1.0 + (-k * (x - x0)).exp())),
            )
        }
    };

    let r_squared = r_squared(points, predictor.as_ref());
    Some(ModelFit {
        model,
        params: params.into_iter().map(sanitize).collect(),
        r_squared: sanitize(r_squared),
    })
}

/// Ordinary least squares over `(x, y)`: returns `(intercept, slope)`.
#[allow(clippy::cast_precision_loss)]
fn least_squares(points: impl Iterator<Item = (f64, f64)> + Clone) -> Option<(f64, f64)> {
    let n = points.clone().count();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let sum_x: f64 = points.clone().map(|(x, _)| x).sum();
    let sum_y: f64 = points.clone().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.clone().map(|(x, y)| x * y).sum();
    let sum_x2: f64 = points.map(|(x, _)| x * x).sum();

    let denom = n_f * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON || !denom.is_finite() {
        return None;
    }
    let slope = (n_f * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n_f;
    if slope.is_finite() && intercept.is_finite() {
        Some((intercept, slope))
    } else {
        None
    }
}

/// Coefficient of determination in the original space.
#[allow(clippy::cast_precision_loss)]
fn r_squared(points: &[(f64, f64)], predict: &dyn Fn(f64) -> f64) -> f64 {
    let n = points.len() as f64;
    let mean_y: f64 = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| (y - predict(*x)).powi(2))
        .sum();

    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;

    #[test]
    fn test_perfect_linear_fit() {
        let points: Vec<(f64, f64)> = (1..=10).map(|x| (f64::from(x), 3.0 + 2.0 * f64::from(x))).collect();
        let report = fit_all(&points);
        let linear = report.models.get("linear").unwrap();
        assert!((linear.r_squared - 1.0).abs() < 1e-9);
        assert!((linear.params[0] - 3.0).abs() < 1e-9);
        assert!((linear.params[1] - 2.0).abs() < 1e-9);
        assert_eq!(report.best, Some(Model::Linear));
    }

    #[test]
    fn test_logarithmic_fit_wins_on_log_data() {
        let points: Vec<(f64, f64)> = (1..=12)
            .map(|x| (f64::from(x), 100.0 + 400.0 * f64::from(x).ln()))
            .collect();
        let report = fit_all(&points);
        assert_eq!(report.best, Some(Model::Logarithmic));
        let log_fit = report.models.get("logarithmic").unwrap();
        assert!(log_fit.r_squared > 0.999);
    }

    #[test]
    fn test_exponential_fit_recovers_parameters() {
        let points: Vec<(f64, f64)> = (1..=8)
            .map(|x| (f64::from(x), 50.0 * (0.3 * f64::from(x)).exp()))
            .collect();
        let report = fit_all(&points);
        let exp_fit = report.models.get("exponential").unwrap();
        assert!((exp_fit.params[0] - 50.0).abs() < 0.5);
        assert!((exp_fit.params[1] - 0.3).abs() < 0.01);
        assert!(exp_fit.r_squared > 0.999);
    }

    #[test]
    fn test_exponential_skipped_with_nonpositive_values() {
        let points = vec![(1.0, 0.0), (2.0, 10.0), (3.0, 20.0), (4.0, 30.0)];
        let report = fit_all(&points);
        assert!(!report.models.contains_key("exponential"));
        assert!(report.models.contains_key("linear"));
    }

    #[test]
    fn test_too_few_points_yields_empty_report() {
        let report = fit_all(&[(1.0, 10.0), (2.0, 20.0)]);
        assert!(report.models.is_empty());
        assert!(report.best.is_none());
    }

    #[test]
    fn test_nonfinite_points_are_dropped() {
        let points = vec![
            (1.0, 10.0),
            (2.0, f64::NAN),
            (3.0, 30.0),
            (4.0, 40.0),
            (5.0, 50.0),
        ];
        let report = fit_all(&points);
        assert!(report.models.contains_key("linear"));
    }

    #[test]
    fn test_prediction_flags_extrapolation() {
        let points: Vec<(f64, f64)> = (1..=10).map(|x| (f64::from(x), 2.0 * f64::from(x))).collect();
        let report = fit_all(&points);
        let linear = report.models.get("linear").unwrap();

        let inside = linear.predict(5.0, report.observed_workers);
        assert!(!inside.extrapolated);

        let outside = linear.predict(50.0, report.observed_workers);
        assert!(outside.extrapolated);
        assert!((outside.tps - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_logistic_fit_on_saturating_data() {
        let points: Vec<(f64, f64)> = (1..=12)
            .map(|x| {
                let x = f64::from(x);
                (x, 1_000.0 / (1.0 + (-0.8 * (x - 5.0)).exp()))
            })
            .collect();
        let report = fit_all(&points);
        let logistic = report.models.get("logistic").unwrap();
        // the single-pass linearization is approximate; it still has to
        // explain most of the variance
        assert!(logistic.r_squared > 0.9);
    }
}
