//! Renderer: layers and filter state to a widget tree
//!
//! [`render`] is one synchronous pass. It narrows every cleaned dataset by the
//! filter state, runs the Layer Builder over what is left and assembles the
//! [`Dashboard`] that [`crate::writer`]s turn into output. Nothing is kept
//! between passes; a filter change is simply another call.

mod controls;

pub use controls::{CategorySelector, Controls, NumericInput};

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::clean::CleanedDataset;
use crate::config::{DashboardConfig, ParamKind};
use crate::map::{build_layer, GeometrySource, MapLayer};
use crate::{DataFrame, GeodashError, Result};

/// Notice shown when no layer has anything to draw.
pub const EMPTY_NOTICE: &str = "No data to display for the current filters";

/// Interactive filter state of one render pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterState {
    /// Selected value of the category control
    pub category: Option<String>,
    /// Value of the numeric input; the control's default when unset
    pub threshold: Option<f64>,
}

/// A dataset as displayed on the map, after filtering.
#[derive(Debug, Clone)]
pub struct DatasetView {
    pub id: String,
    pub label: String,
    pub data: CleanedDataset,
    pub latitude: String,
    pub longitude: String,
}

impl DatasetView {
    pub fn height(&self) -> usize {
        self.data.height()
    }
}

/// Initial viewport of the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapState {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
}

impl Default for MapState {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            zoom: 1.0,
        }
    }
}

/// The map widget: visible layers and the datasets they draw from.
#[derive(Debug, Clone)]
pub struct MapView {
    pub layers: Vec<MapLayer>,
    pub datasets: Vec<DatasetView>,
    pub map_state: MapState,
}

/// Preview of one dataset's rows next to the map.
#[derive(Debug, Clone)]
pub struct TablePanel {
    pub dataset_id: String,
    pub label: String,
    /// Rows after filtering
    pub total_rows: usize,
    pub preview: DataFrame,
}

/// A query parameter as bound for this render pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamField {
    pub name: String,
    pub kind: ParamKind,
    pub value: String,
}

/// The widget tree of one render pass.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub title: String,
    /// Query parameters in effect, so a filter change keeps them
    pub params: Vec<ParamField>,
    pub controls: Controls,
    pub map: MapView,
    pub tables: Vec<TablePanel>,
    /// Set when the map has no layers
    pub notice: Option<String>,
}

/// Assemble the dashboard for `datasets`, which are the cleaned results of
/// `config.datasets` in the same order.
pub fn render(
    config: &DashboardConfig,
    datasets: &[CleanedDataset],
    filter: &FilterState,
) -> Result<Dashboard> {
    if datasets.len() != config.datasets.len() {
        return Err(GeodashError::InternalError(format!(
            "Expected {} datasets, got {}",
            config.datasets.len(),
            datasets.len()
        )));
    }

    let controls = build_controls(config, datasets, filter)?;

    let mut views = Vec::with_capacity(datasets.len());
    for (dataset_config, data) in config.datasets.iter().zip(datasets) {
        let data = controls::apply(data, &controls)?;
        debug!(
            "Dataset '{}': {} rows after filtering",
            dataset_config.id,
            data.height()
        );
        views.push(DatasetView {
            id: dataset_config.id.clone(),
            label: dataset_config.display_label().to_string(),
            data,
            latitude: dataset_config.latitude.clone(),
            longitude: dataset_config.longitude.clone(),
        });
    }

    let mut layers = Vec::new();
    for layer_config in config.layers.iter().filter(|l| l.visible) {
        let Some(view) = views.iter().find(|v| v.id == layer_config.dataset) else {
            continue;
        };
        if view.data.is_empty() {
            debug!(
                "Skipping layer '{}': dataset '{}' has no rows",
                layer_config.id, view.id
            );
            continue;
        }
        let source = GeometrySource {
            data_id: view.id.clone(),
            latitude: view.latitude.clone(),
            longitude: view.longitude.clone(),
        };
        layers.push(build_layer(&view.data, &source, layer_config)?);
    }

    let tables = views
        .iter()
        .map(|view| TablePanel {
            dataset_id: view.id.clone(),
            label: view.label.clone(),
            total_rows: view.height(),
            preview: view.data.frame().head(Some(config.preview_rows)),
        })
        .collect();

    let map_datasets: Vec<DatasetView> = views
        .into_iter()
        .filter(|view| layers.iter().any(|l| l.config.data_id == view.id))
        .collect();
    let map_state = map_state(&map_datasets, config.zoom)?;

    info!(
        "Rendered '{}': {} layer(s) over {} dataset(s)",
        config.title,
        layers.len(),
        map_datasets.len()
    );

    let notice = layers.is_empty().then(|| EMPTY_NOTICE.to_string());

    let defaults: BTreeMap<String, String> = config
        .params
        .iter()
        .map(|(name, param)| (name.clone(), param.default.clone()))
        .collect();

    Ok(Dashboard {
        title: config.title.clone(),
        params: param_fields(config, &defaults),
        controls,
        map: MapView {
            layers,
            datasets: map_datasets,
            map_state,
        },
        tables,
        notice,
    })
}

/// Declared parameters with their bound `values`, in name order.
pub fn param_fields(config: &DashboardConfig, values: &BTreeMap<String, String>) -> Vec<ParamField> {
    config
        .params
        .iter()
        .map(|(name, param)| ParamField {
            name: name.clone(),
            kind: param.kind,
            value: values.get(name).unwrap_or(&param.default).clone(),
        })
        .collect()
}

fn build_controls(
    config: &DashboardConfig,
    datasets: &[CleanedDataset],
    filter: &FilterState,
) -> Result<Controls> {
    let category = match &config.controls.category {
        Some(category) => {
            let index = match &category.dataset {
                Some(id) => config
                    .datasets
                    .iter()
                    .position(|d| &d.id == id)
                    .ok_or_else(|| {
                        GeodashError::ConfigError(format!(
                            "Category control references unknown dataset '{}'",
                            id
                        ))
                    })?,
                None => 0,
            };
            let source = datasets.get(index).ok_or_else(|| {
                GeodashError::InternalError(
                    "Category control has no dataset to read options from".to_string(),
                )
            })?;
            Some(controls::category_selector(category, source, filter)?)
        }
        None => None,
    };

    let threshold = config
        .controls
        .threshold
        .as_ref()
        .map(|t| controls::numeric_input(t, filter));

    Ok(Controls {
        category,
        threshold,
    })
}

/// Viewport centered on the mean coordinate of every displayed point.
fn map_state(datasets: &[DatasetView], zoom: f64) -> Result<MapState> {
    let mut lat_sum = 0.0;
    let mut lng_sum = 0.0;
    let mut count = 0usize;

    for view in datasets {
        let frame = view.data.frame();
        let lat = frame
            .column(&view.latitude)?
            .as_materialized_series()
            .cast(&polars::prelude::DataType::Float64)?;
        let lng = frame
            .column(&view.longitude)?
            .as_materialized_series()
            .cast(&polars::prelude::DataType::Float64)?;
        for (la, ln) in lat.f64()?.into_iter().zip(lng.f64()?.into_iter()) {
            if let (Some(la), Some(ln)) = (la, ln) {
                lat_sum += la;
                lng_sum += ln;
                count += 1;
            }
        }
    }

    if count == 0 {
        return Ok(MapState::default());
    }
    Ok(MapState {
        latitude: lat_sum / count as f64,
        longitude: lng_sum / count as f64,
        zoom,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clean::clean;
    use polars::prelude::*;

    const CONFIG: &str = r##"
title = "Discount monitor"
reader = "polars://memory"
preview_rows = 2

[[datasets]]
id = "stores"
label = "Stores"
query = "SELECT * FROM stores"
latitude = "lat"
longitude = "lng"

[[datasets]]
id = "hubs"
query = "SELECT * FROM hubs"
latitude = "lat"
longitude = "lng"

[[layers]]
id = "store-discount"
dataset = "stores"
color_field = "discount"
color_scale = "linear"
color_range = { palette = "viridis", steps = 4 }

[[layers]]
id = "hub-gmv"
dataset = "hubs"
color_field = "gmv"

[[layers]]
id = "hidden"
dataset = "hubs"
color_field = "gmv"
visible = false

[controls.category]
dataset = "stores"
column = "brand"

[controls.threshold]
column = "discount"
label = "Suggested discount (%)"
min = 0.0
max = 100.0
default = 10.0
step = 0.5
"##;

    fn datasets() -> Vec<CleanedDataset> {
        let stores = df! {
            "lat" => [-23.0, -22.0, -21.0],
            "lng" => [-46.0, -45.0, -44.0],
            "brand" => ["b", "a", "b"],
            "discount" => [5.0, 15.0, 25.0],
        }
        .unwrap();
        let hubs = df! {
            "lat" => [-20.0],
            "lng" => [-40.0],
            "gmv" => [100.0],
        }
        .unwrap();
        vec![
            clean(stores, &["lat", "lng"]).unwrap(),
            clean(hubs, &["lat", "lng"]).unwrap(),
        ]
    }

    #[test]
    fn test_render_default_filters() {
        let config = DashboardConfig::from_toml(CONFIG).unwrap();
        let dashboard = render(&config, &datasets(), &FilterState::default()).unwrap();

        assert_eq!(dashboard.title, "Discount monitor");
        // Default threshold 10 keeps two stores; hub has no discount column
        let ids: Vec<&str> = dashboard.map.layers.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["store-discount", "hub-gmv"]);
        assert_eq!(dashboard.map.datasets[0].height(), 2);
        assert_eq!(dashboard.map.datasets[1].height(), 1);

        let selector = dashboard.controls.category.as_ref().unwrap();
        assert_eq!(selector.options, vec!["a", "b"]);
        assert_eq!(dashboard.controls.threshold.as_ref().unwrap().value, 10.0);

        assert_eq!(dashboard.tables.len(), 2);
        assert_eq!(dashboard.tables[0].label, "Stores");
        assert_eq!(dashboard.tables[0].total_rows, 2);
        assert!(dashboard.tables[0].preview.height() <= 2);
        assert!(dashboard.notice.is_none());

        // Mean of (-22, -45), (-21, -44), (-20, -40)
        assert!((dashboard.map.map_state.latitude - -21.0).abs() < 1e-9);
        assert!((dashboard.map.map_state.longitude - -43.0).abs() < 1e-9);
        assert_eq!(dashboard.map.map_state.zoom, 10.0);
    }

    #[test]
    fn test_render_filtered_to_nothing_drops_layer() {
        let config = DashboardConfig::from_toml(CONFIG).unwrap();
        let filter = FilterState {
            category: Some("a".to_string()),
            threshold: Some(50.0),
        };
        let dashboard = render(&config, &datasets(), &filter).unwrap();

        let ids: Vec<&str> = dashboard.map.layers.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["hub-gmv"]);
        assert_eq!(dashboard.tables[0].total_rows, 0);
        // Options still come from the unfiltered data
        assert_eq!(
            dashboard.controls.category.as_ref().unwrap().options,
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_render_empty_datasets() {
        let config = DashboardConfig::from_toml(CONFIG).unwrap();
        let empty: Vec<CleanedDataset> = datasets()
            .into_iter()
            .map(|d| {
                let mask = vec![false; d.height()];
                d.retain(&mask).unwrap()
            })
            .collect();

        let dashboard = render(&config, &empty, &FilterState::default()).unwrap();
        assert!(dashboard.map.layers.is_empty());
        assert!(dashboard.map.datasets.is_empty());
        assert_eq!(dashboard.notice.as_deref(), Some(EMPTY_NOTICE));
        assert_eq!(dashboard.map.map_state, MapState::default());
    }

    #[test]
    fn test_category_control_without_datasets_is_error() {
        let mut config = DashboardConfig::from_toml(CONFIG).unwrap();
        config.datasets.clear();
        config.layers.clear();
        config.controls.category.as_mut().unwrap().dataset = None;

        let result = render(&config, &[], &FilterState::default());
        assert!(matches!(result, Err(GeodashError::InternalError(_))));
    }

    #[test]
    fn test_params_default_to_configured_values() {
        let text = format!("{}\n[params]\ncity = \"SP\"\n", CONFIG);
        let config = DashboardConfig::from_toml(&text).unwrap();
        let dashboard = render(&config, &datasets(), &FilterState::default()).unwrap();
        assert_eq!(
            dashboard.params,
            vec![ParamField {
                name: "city".to_string(),
                kind: ParamKind::String,
                value: "SP".to_string(),
            }]
        );
    }

    #[test]
    fn test_render_is_repeatable() {
        let config = DashboardConfig::from_toml(CONFIG).unwrap();
        let data = datasets();
        let a = render(&config, &data, &FilterState::default()).unwrap();
        let b = render(&config, &data, &FilterState::default()).unwrap();
        assert_eq!(a.map.layers, b.map.layers);
        assert_eq!(a.controls, b.controls);
    }

    #[test]
    fn test_render_dataset_count_mismatch() {
        let config = DashboardConfig::from_toml(CONFIG).unwrap();
        let result = render(&config, &datasets()[..1], &FilterState::default());
        assert!(matches!(result, Err(GeodashError::InternalError(_))));
    }
}
