//! Filter controls and the row filters they drive

use std::collections::BTreeSet;

use polars::prelude::*;
use serde::Serialize;

use super::FilterState;
use crate::clean::CleanedDataset;
use crate::config::{CategoryControlConfig, Keep, ThresholdControlConfig};
use crate::{GeodashError, Result};

/// Dropdown selecting one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySelector {
    pub column: String,
    pub label: String,
    /// Sorted distinct values of the column in the unfiltered data
    pub options: Vec<String>,
    pub selected: Option<String>,
}

/// Numeric input narrowing rows to one side of a threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericInput {
    pub column: String,
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub step: f64,
    /// Current value, clamped to `[min, max]`
    pub value: f64,
    pub keep: Keep,
}

/// Filter controls shown next to the map.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Controls {
    pub category: Option<CategorySelector>,
    pub threshold: Option<NumericInput>,
}

impl Controls {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.threshold.is_none()
    }
}

pub(crate) fn category_selector(
    config: &CategoryControlConfig,
    source: &CleanedDataset,
    filter: &FilterState,
) -> Result<CategorySelector> {
    if !source.has_column(&config.column) {
        return Err(GeodashError::ConfigError(format!(
            "Category column '{}' not found (columns: {})",
            config.column,
            source.column_names().join(", ")
        )));
    }

    let options: BTreeSet<String> = text_values(source, &config.column)?
        .into_iter()
        .flatten()
        .collect();

    Ok(CategorySelector {
        column: config.column.clone(),
        label: config.label.clone().unwrap_or_else(|| config.column.clone()),
        options: options.into_iter().collect(),
        selected: filter.category.clone(),
    })
}

pub(crate) fn numeric_input(config: &ThresholdControlConfig, filter: &FilterState) -> NumericInput {
    let value = filter
        .threshold
        .filter(|v| v.is_finite())
        .unwrap_or(config.default)
        .clamp(config.min, config.max);

    NumericInput {
        column: config.column.clone(),
        label: config.label.clone().unwrap_or_else(|| config.column.clone()),
        min: config.min,
        max: config.max,
        default: config.default,
        step: config.step,
        value,
        keep: config.keep,
    }
}

/// Rows of `dataset` matching the controls. Controls whose column the
/// dataset does not have leave it untouched.
pub(crate) fn apply(dataset: &CleanedDataset, controls: &Controls) -> Result<CleanedDataset> {
    let mut keep = vec![true; dataset.height()];
    let mut filtered = false;

    if let Some(selector) = &controls.category {
        if let (Some(selected), true) = (&selector.selected, dataset.has_column(&selector.column)) {
            let values = text_values(dataset, &selector.column)?;
            for (k, v) in keep.iter_mut().zip(values) {
                *k &= v.as_deref() == Some(selected.as_str());
            }
            filtered = true;
        }
    }

    if let Some(input) = &controls.threshold {
        if dataset.has_column(&input.column) {
            let values = numeric_values(dataset, &input.column)?;
            for (k, v) in keep.iter_mut().zip(values) {
                *k &= match (v, input.keep) {
                    (Some(v), Keep::Above) => v >= input.value,
                    (Some(v), Keep::Below) => v <= input.value,
                    (None, _) => false,
                };
            }
            filtered = true;
        }
    }

    if filtered {
        dataset.retain(&keep)
    } else {
        Ok(dataset.clone())
    }
}

fn text_values(dataset: &CleanedDataset, column: &str) -> Result<Vec<Option<String>>> {
    let series = dataset
        .frame()
        .column(column)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn numeric_values(dataset: &CleanedDataset, column: &str) -> Result<Vec<Option<f64>>> {
    let series = dataset
        .frame()
        .column(column)?
        .as_materialized_series()
        .cast(&DataType::Float64)
        .map_err(|_| {
            GeodashError::ConfigError(format!("Threshold column '{}' is not numeric", column))
        })?;
    Ok(series.f64()?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clean::clean;

    fn dataset() -> CleanedDataset {
        let df = df! {
            "lat" => [1.0, 2.0, 3.0, 4.0],
            "lng" => [1.0, 2.0, 3.0, 4.0],
            "city" => ["SP", "RJ", "SP", "BH"],
            "discount" => [5.0, 12.5, 20.0, 10.0],
        }
        .unwrap();
        clean(df, &["lat", "lng"]).unwrap()
    }

    fn threshold_config(keep: Keep) -> ThresholdControlConfig {
        ThresholdControlConfig {
            column: "discount".to_string(),
            label: Some("Suggested discount (%)".to_string()),
            min: 0.0,
            max: 100.0,
            default: 10.0,
            step: 0.5,
            keep,
        }
    }

    #[test]
    fn test_selector_options_sorted_distinct() {
        let config = CategoryControlConfig {
            dataset: None,
            column: "city".to_string(),
            label: None,
        };
        let selector = category_selector(&config, &dataset(), &FilterState::default()).unwrap();
        assert_eq!(selector.options, vec!["BH", "RJ", "SP"]);
        assert_eq!(selector.label, "city");
        assert_eq!(selector.selected, None);
    }

    #[test]
    fn test_selector_missing_column() {
        let config = CategoryControlConfig {
            dataset: None,
            column: "state".to_string(),
            label: None,
        };
        let err = category_selector(&config, &dataset(), &FilterState::default()).unwrap_err();
        assert!(matches!(err, GeodashError::ConfigError(_)));
    }

    #[test]
    fn test_numeric_input_value() {
        let config = threshold_config(Keep::Above);
        assert_eq!(numeric_input(&config, &FilterState::default()).value, 10.0);

        let filter = FilterState {
            category: None,
            threshold: Some(250.0),
        };
        assert_eq!(numeric_input(&config, &filter).value, 100.0);

        let filter = FilterState {
            category: None,
            threshold: Some(f64::NAN),
        };
        assert_eq!(numeric_input(&config, &filter).value, 10.0);
    }

    #[test]
    fn test_apply_category_and_threshold() {
        let controls = Controls {
            category: Some(CategorySelector {
                column: "city".to_string(),
                label: "City".to_string(),
                options: vec![],
                selected: Some("SP".to_string()),
            }),
            threshold: Some(numeric_input(
                &threshold_config(Keep::Above),
                &FilterState::default(),
            )),
        };
        let filtered = apply(&dataset(), &controls).unwrap();
        // SP rows with discount >= 10
        assert_eq!(filtered.height(), 1);
    }

    #[test]
    fn test_apply_threshold_below() {
        let controls = Controls {
            category: None,
            threshold: Some(numeric_input(
                &threshold_config(Keep::Below),
                &FilterState {
                    category: None,
                    threshold: Some(10.0),
                },
            )),
        };
        let filtered = apply(&dataset(), &controls).unwrap();
        assert_eq!(filtered.height(), 2);
    }

    #[test]
    fn test_apply_ignores_datasets_without_column() {
        let controls = Controls {
            category: Some(CategorySelector {
                column: "state".to_string(),
                label: "State".to_string(),
                options: vec![],
                selected: Some("SP".to_string()),
            }),
            threshold: None,
        };
        let filtered = apply(&dataset(), &controls).unwrap();
        assert_eq!(filtered.height(), 4);
    }
}
