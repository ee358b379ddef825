//! Color and size scales
//!
//! A [`ColorScale`] maps a numeric value to one of its color stops (bucketed
//! kinds) or to a color interpolated between stops (linear). The domain the
//! scale works against is computed from the data once per layer build.

use serde::{Deserialize, Serialize};

use super::palettes;
use super::ColorRange;
use crate::{GeodashError, Result};

/// How values are mapped to colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorScaleKind {
    /// Equal-count buckets, one per color stop
    #[default]
    Quantile,
    /// Equal-width buckets over the value extent, one per color stop
    Quantize,
    /// Continuous interpolation across the color stops
    Linear,
}

impl std::fmt::Display for ColorScaleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColorScaleKind::Quantile => "quantile",
            ColorScaleKind::Quantize => "quantize",
            ColorScaleKind::Linear => "linear",
        };
        write!(f, "{}", s)
    }
}

/// How values are mapped to point sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SizeScaleKind {
    Linear,
    /// Area-proportional scaling
    #[default]
    Sqrt,
    Log,
}

impl std::fmt::Display for SizeScaleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SizeScaleKind::Linear => "linear",
            SizeScaleKind::Sqrt => "sqrt",
            SizeScaleKind::Log => "log",
        };
        write!(f, "{}", s)
    }
}

/// Value domain a scale was fitted to.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleDomain {
    /// No values to fit
    Empty,
    /// Min and max of the data
    Extent { min: f64, max: f64 },
    /// Ascending bucket boundaries; `n` stops use `n - 1` thresholds
    Thresholds(Vec<f64>),
}

impl ScaleDomain {
    /// Flat representation written into the layer configuration.
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            ScaleDomain::Empty => Vec::new(),
            ScaleDomain::Extent { min, max } => vec![*min, *max],
            ScaleDomain::Thresholds(t) => t.clone(),
        }
    }
}

/// One legend swatch.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub color: String,
    pub label: String,
}

/// A color scale over a fixed list of hex color stops.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorScale {
    kind: ColorScaleKind,
    stops: Vec<String>,
}

impl ColorScale {
    pub fn new(kind: ColorScaleKind, range: &ColorRange) -> Result<Self> {
        if range.colors.is_empty() {
            return Err(GeodashError::LayerError(format!(
                "Color range '{}' has no colors",
                range.name
            )));
        }
        Ok(Self {
            kind,
            stops: range.colors.clone(),
        })
    }

    pub fn kind(&self) -> ColorScaleKind {
        self.kind
    }

    pub fn stops(&self) -> &[String] {
        &self.stops
    }

    /// Fit the scale's domain to the given values. Non-finite values are ignored.
    pub fn domain(&self, values: &[f64]) -> ScaleDomain {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return ScaleDomain::Empty;
        }
        sorted.sort_by(f64::total_cmp);

        match self.kind {
            ColorScaleKind::Linear | ColorScaleKind::Quantize => ScaleDomain::Extent {
                min: sorted[0],
                max: sorted[sorted.len() - 1],
            },
            ColorScaleKind::Quantile => {
                let n = self.stops.len();
                ScaleDomain::Thresholds(
                    (1..n)
                        .map(|k| quantile_sorted(&sorted, k, n))
                        .collect(),
                )
            }
        }
    }

    /// Index of the color stop a value falls into (bucketed kinds).
    ///
    /// Linear scales return the nearest stop.
    pub fn bucket(&self, value: f64, domain: &ScaleDomain) -> Option<usize> {
        if !value.is_finite() {
            return None;
        }
        let n = self.stops.len();
        match (self.kind, domain) {
            (_, ScaleDomain::Empty) => None,
            (ColorScaleKind::Quantile, ScaleDomain::Thresholds(thresholds)) => {
                Some(thresholds.partition_point(|t| *t <= value).min(n - 1))
            }
            (ColorScaleKind::Linear, _) => self.position(value, domain).map(|p| p.round() as usize),
            (_, ScaleDomain::Extent { min, max }) => {
                if max <= min {
                    return Some(0);
                }
                let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
                Some(((t * n as f64).floor() as usize).min(n - 1))
            }
            (_, ScaleDomain::Thresholds(thresholds)) => {
                Some(thresholds.partition_point(|t| *t <= value).min(n - 1))
            }
        }
    }

    /// Position of a value along the stop sequence, from `0.0` (first stop) to
    /// `n - 1` (last stop).
    pub fn position(&self, value: f64, domain: &ScaleDomain) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        match (self.kind, domain) {
            (ColorScaleKind::Linear, ScaleDomain::Extent { min, max }) => {
                let last = (self.stops.len() - 1) as f64;
                if max <= min {
                    return Some(0.0);
                }
                Some(((value - min) / (max - min)).clamp(0.0, 1.0) * last)
            }
            (ColorScaleKind::Linear, _) => None,
            _ => self.bucket(value, domain).map(|b| b as f64),
        }
    }

    /// Color for a value, or `None` if the value is non-finite or the domain is empty.
    pub fn color(&self, value: f64, domain: &ScaleDomain) -> Option<String> {
        match self.kind {
            ColorScaleKind::Linear => {
                let position = self.position(value, domain)?;
                if self.stops.len() == 1 {
                    return Some(self.stops[0].clone());
                }
                let t = position / (self.stops.len() - 1) as f64;
                palettes::color_at(&self.stops, t).ok()
            }
            _ => self
                .bucket(value, domain)
                .map(|b| self.stops[b].clone()),
        }
    }

    /// Legend entries describing the fitted scale.
    pub fn legend(&self, domain: &ScaleDomain) -> Vec<LegendEntry> {
        match (self.kind, domain) {
            (_, ScaleDomain::Empty) => Vec::new(),
            (ColorScaleKind::Linear, ScaleDomain::Extent { min, max }) => {
                let n = self.stops.len();
                self.stops
                    .iter()
                    .enumerate()
                    .map(|(i, color)| {
                        let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
                        LegendEntry {
                            color: color.clone(),
                            label: format_number(min + (max - min) * t),
                        }
                    })
                    .collect()
            }
            (ColorScaleKind::Quantize, ScaleDomain::Extent { min, max }) => {
                let n = self.stops.len() as f64;
                let width = (max - min) / n;
                self.stops
                    .iter()
                    .enumerate()
                    .map(|(i, color)| LegendEntry {
                        color: color.clone(),
                        label: format!(
                            "{} - {}",
                            format_number(min + width * i as f64),
                            format_number(min + width * (i + 1) as f64)
                        ),
                    })
                    .collect()
            }
            (_, ScaleDomain::Thresholds(thresholds)) => self
                .stops
                .iter()
                .enumerate()
                .map(|(i, color)| {
                    let label = match (i.checked_sub(1).and_then(|j| thresholds.get(j)), thresholds.get(i)) {
                        (None, Some(hi)) => format!("< {}", format_number(*hi)),
                        (Some(lo), Some(hi)) => {
                            format!("{} - {}", format_number(*lo), format_number(*hi))
                        }
                        (Some(lo), None) => format!(">= {}", format_number(*lo)),
                        (None, None) => "all".to_string(),
                    };
                    LegendEntry {
                        color: color.clone(),
                        label,
                    }
                })
                .collect(),
            (_, ScaleDomain::Extent { .. }) => Vec::new(),
        }
    }
}

/// Linear-interpolated quantile of ascending `sorted` at probability `k / n`.
fn quantile_sorted(sorted: &[f64], k: usize, n: usize) -> f64 {
    let h = ((sorted.len() - 1) * k) as f64 / n as f64;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (sorted[hi] - sorted[lo]) * (h - lo as f64)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

/// Extent of finite values, or `None` if there are none.
pub fn extent(values: &[f64]) -> Option<[f64; 2]> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some([v, v]),
            Some([lo, hi]) => Some([lo.min(v), hi.max(v)]),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn range(colors: &[&str]) -> ColorRange {
        ColorRange {
            name: "test".to_string(),
            range_type: "sequential".to_string(),
            category: "Custom".to_string(),
            colors: colors.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn three_stop() -> ColorRange {
        range(&["#d7191c", "#ffffbf", "#1a9641"])
    }

    #[test]
    fn test_empty_range_rejected() {
        assert!(ColorScale::new(ColorScaleKind::Linear, &range(&[])).is_err());
    }

    #[test]
    fn test_quantile_domain_and_buckets() {
        let scale = ColorScale::new(ColorScaleKind::Quantile, &three_stop()).unwrap();
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let domain = scale.domain(&values);

        let ScaleDomain::Thresholds(thresholds) = &domain else {
            panic!("expected thresholds, got {:?}", domain);
        };
        assert_eq!(thresholds.len(), 2);
        assert_eq!(thresholds[0], 3.0);
        assert_eq!(thresholds[1], 5.0);

        assert_eq!(scale.bucket(1.0, &domain), Some(0));
        assert_eq!(scale.bucket(3.0, &domain), Some(1));
        assert_eq!(scale.bucket(7.0, &domain), Some(2));
        assert_eq!(scale.color(7.0, &domain).as_deref(), Some("#1a9641"));
    }

    #[test]
    fn test_quantize_equal_width() {
        let scale = ColorScale::new(ColorScaleKind::Quantize, &three_stop()).unwrap();
        let domain = scale.domain(&[0.0, 30.0]);
        assert_eq!(domain, ScaleDomain::Extent { min: 0.0, max: 30.0 });
        assert_eq!(scale.bucket(5.0, &domain), Some(0));
        assert_eq!(scale.bucket(15.0, &domain), Some(1));
        assert_eq!(scale.bucket(30.0, &domain), Some(2));
    }

    #[test]
    fn test_linear_endpoints_and_midpoint() {
        let scale =
            ColorScale::new(ColorScaleKind::Linear, &range(&["#000000", "#ffffff"])).unwrap();
        let domain = scale.domain(&[10.0, 20.0]);
        assert_eq!(scale.color(10.0, &domain).as_deref(), Some("#000000"));
        assert_eq!(scale.color(20.0, &domain).as_deref(), Some("#ffffff"));
        assert_eq!(scale.position(15.0, &domain), Some(0.5));
        // Out of range values clamp
        assert_eq!(scale.color(100.0, &domain).as_deref(), Some("#ffffff"));
    }

    #[test]
    fn test_constant_values() {
        let scale = ColorScale::new(ColorScaleKind::Linear, &three_stop()).unwrap();
        let domain = scale.domain(&[5.0, 5.0]);
        assert_eq!(scale.position(5.0, &domain), Some(0.0));

        let quantile = ColorScale::new(ColorScaleKind::Quantile, &three_stop()).unwrap();
        let domain = quantile.domain(&[5.0, 5.0, 5.0]);
        assert_eq!(quantile.bucket(5.0, &domain), Some(2));
    }

    #[test]
    fn test_empty_domain() {
        let scale = ColorScale::new(ColorScaleKind::Quantile, &three_stop()).unwrap();
        let domain = scale.domain(&[f64::NAN]);
        assert_eq!(domain, ScaleDomain::Empty);
        assert!(scale.color(1.0, &domain).is_none());
        assert!(scale.legend(&domain).is_empty());
    }

    #[test]
    fn test_non_finite_value_has_no_color() {
        let scale = ColorScale::new(ColorScaleKind::Linear, &three_stop()).unwrap();
        let domain = scale.domain(&[0.0, 1.0]);
        assert!(scale.color(f64::INFINITY, &domain).is_none());
    }

    #[test]
    fn test_quantile_legend_labels() {
        let scale = ColorScale::new(ColorScaleKind::Quantile, &three_stop()).unwrap();
        let domain = scale.domain(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let legend = scale.legend(&domain);
        let labels: Vec<&str> = legend.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["< 3", "3 - 5", ">= 5"]);
    }

    #[test]
    fn test_extent() {
        assert_eq!(extent(&[3.0, f64::NAN, -1.0, 7.5]), Some([-1.0, 7.5]));
        assert_eq!(extent(&[]), None);
    }

    proptest! {
        #[test]
        fn prop_linear_is_monotonic(
            values in prop::collection::vec(-1e6f64..1e6, 2..50),
            a in 0.0f64..1.0,
            b in 0.0f64..1.0,
        ) {
            let scale = ColorScale::new(ColorScaleKind::Linear, &three_stop()).unwrap();
            let domain = scale.domain(&values);
            let [min, max] = extent(&values).unwrap();
            prop_assume!(max > min);

            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let v1 = min + (max - min) * lo;
            let v2 = min + (max - min) * hi;

            let p1 = scale.position(v1, &domain).unwrap();
            let p2 = scale.position(v2, &domain).unwrap();
            prop_assert!(p1 <= p2);
            if v2 - v1 > (max - min) * 1e-6 {
                prop_assert!(p1 < p2);
            }
        }

        #[test]
        fn prop_quantile_buckets_bounded_by_stops(
            values in prop::collection::vec(-1e6f64..1e6, 0..100),
            stop_count in 1usize..8,
        ) {
            let colors: Vec<String> = (0..stop_count).map(|i| format!("#0000{:02x}", i * 30)).collect();
            let color_refs: Vec<&str> = colors.iter().map(String::as_str).collect();
            let scale = ColorScale::new(ColorScaleKind::Quantile, &range(&color_refs)).unwrap();
            let domain = scale.domain(&values);

            let buckets: HashSet<usize> = values
                .iter()
                .filter_map(|v| scale.bucket(*v, &domain))
                .collect();
            prop_assert!(buckets.len() <= stop_count);
            prop_assert!(buckets.iter().all(|b| *b < stop_count));
        }
    }
}
