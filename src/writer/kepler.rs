//! kepler.gl saved-map JSON
//!
//! Layout of the `v1` schema:
//!
//! ```json
//! {
//!   "datasets": [{ "version": "v1", "data": { "id", "label", "color", "fields", "allData" } }],
//!   "config": { "version": "v1", "config": { "visState": {..}, "mapState": {..}, "mapStyle": {..} } },
//!   "info": { "app": "kepler.gl", "title": .. }
//! }
//! ```
//!
//! Each [`MapLayer`] becomes a `visState.layers` entry; its color and size
//! encodings go to the layer's `visualChannels` and its ranges to
//! `config.visConfig`. The output contains no timestamps or random ids, so
//! the same dashboard always serializes to the same bytes.

use polars::prelude::{AnyValue, Column};
use serde_json::{json, Value};

use super::Writer;
use crate::map::{field_type, palettes, FieldType, MapLayer};
use crate::render::{Dashboard, DatasetView};
use crate::{GeodashError, Result};

pub struct KeplerWriter {
    pretty: bool,
}

impl KeplerWriter {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Indent the JSON output.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// The saved-map document as a JSON value.
    pub fn to_value(&self, dashboard: &Dashboard) -> Result<Value> {
        let datasets = dashboard
            .map
            .datasets
            .iter()
            .enumerate()
            .map(|(i, view)| dataset_to_json(view, i))
            .collect::<Result<Vec<_>>>()?;

        let layers: Vec<Value> = dashboard
            .map
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| layer_to_json(layer, i))
            .collect();

        let tooltip_fields: serde_json::Map<String, Value> = dashboard
            .map
            .datasets
            .iter()
            .map(|view| {
                let fields: Vec<Value> = view
                    .data
                    .column_names()
                    .into_iter()
                    .map(|name| json!({ "name": name, "format": null }))
                    .collect();
                (view.id.clone(), Value::Array(fields))
            })
            .collect();

        let state = dashboard.map.map_state;
        Ok(json!({
            "datasets": datasets,
            "config": {
                "version": "v1",
                "config": {
                    "visState": {
                        "filters": [],
                        "layers": layers,
                        "interactionConfig": {
                            "tooltip": { "enabled": true, "fieldsToShow": tooltip_fields },
                        },
                        "layerBlending": "normal",
                        "splitMaps": [],
                    },
                    "mapState": {
                        "bearing": 0,
                        "dragRotate": false,
                        "latitude": finite_or_null(state.latitude),
                        "longitude": finite_or_null(state.longitude),
                        "pitch": 0,
                        "zoom": finite_or_null(state.zoom),
                        "isSplit": false,
                    },
                    "mapStyle": { "styleType": "dark" },
                },
            },
            "info": {
                "app": "kepler.gl",
                "title": dashboard.title,
            },
        }))
    }
}

impl Default for KeplerWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for KeplerWriter {
    type Output = String;

    fn write(&self, dashboard: &Dashboard) -> Result<String> {
        let value = self.to_value(dashboard)?;
        let text = if self.pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        };
        text.map_err(|e| GeodashError::WriterError(format!("Failed to serialize map: {}", e)))
    }
}

fn layer_to_json(layer: &MapLayer, index: usize) -> Value {
    let spec = &layer.config;
    json!({
        "id": layer.id,
        "type": layer.geometry,
        "config": {
            "dataId": spec.data_id,
            "label": spec.label,
            "color": rgb(&palettes::TABLEAU10[index % palettes::TABLEAU10.len()]),
            "columns": { "lat": spec.columns.lat, "lng": spec.columns.lng, "altitude": null },
            "isVisible": spec.is_visible,
            "visConfig": {
                "radius": spec.vis_config.radius,
                "opacity": spec.vis_config.opacity,
                "colorRange": spec.vis_config.color_range,
                "radiusRange": spec.vis_config.size_range,
                "filled": true,
                "outline": false,
            },
            "hidden": false,
            "textLabel": [],
        },
        "visualChannels": {
            "colorField": spec.color_field,
            "colorScale": spec.color_scale,
            "sizeField": spec.size_field,
            "sizeScale": spec.size_scale,
        },
    })
}

fn dataset_to_json(view: &DatasetView, index: usize) -> Result<Value> {
    let frame = view.data.frame();

    let mut fields = Vec::with_capacity(frame.width());
    for name in view.data.column_names() {
        let field_type = field_type(&view.data, &name).ok_or_else(|| {
            GeodashError::WriterError(format!("Column '{}' vanished from dataset '{}'", name, view.id))
        })?;
        fields.push(json!({
            "name": name,
            "type": field_type,
            "format": "",
            "analyzerType": analyzer_type(field_type),
        }));
    }

    let columns = frame.get_columns();
    let rows: Vec<Value> = (0..frame.height())
        .map(|i| Value::Array(columns.iter().map(|c| column_value_to_json(c, i)).collect()))
        .collect();

    Ok(json!({
        "version": "v1",
        "data": {
            "id": view.id,
            "label": view.label,
            "color": rgb(&palettes::SET2[index % palettes::SET2.len()]),
            "fields": fields,
            "allData": rows,
        },
    }))
}

fn analyzer_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Real => "FLOAT",
        FieldType::Integer => "INT",
        FieldType::String => "STRING",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Timestamp => "DATETIME",
    }
}

/// `[r, g, b]` of a hex palette entry.
fn rgb(hex: &str) -> Value {
    match csscolorparser::parse(hex) {
        Ok(color) => {
            let [r, g, b, _] = color.to_rgba8();
            json!([r, g, b])
        }
        Err(_) => json!([255, 255, 255]),
    }
}

fn finite_or_null(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Convert a single value from a Polars Column to JSON
fn column_value_to_json(column: &Column, idx: usize) -> Value {
    let any_value = match column.get(idx) {
        Ok(v) => v,
        Err(_) => return Value::Null,
    };

    match any_value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::Int8(v) => Value::Number(v.into()),
        AnyValue::Int16(v) => Value::Number(v.into()),
        AnyValue::Int32(v) => Value::Number(v.into()),
        AnyValue::Int64(v) => Value::Number(v.into()),
        AnyValue::UInt8(v) => Value::Number(v.into()),
        AnyValue::UInt16(v) => Value::Number(v.into()),
        AnyValue::UInt32(v) => Value::Number(v.into()),
        AnyValue::UInt64(v) => Value::Number(v.into()),
        AnyValue::Float32(v) => finite_or_null(v as f64),
        AnyValue::Float64(v) => finite_or_null(v),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        other => {
            tracing::debug!("Converting unsupported Polars type to string: {:?}", other);
            Value::String(format!("{}", other))
        }
    }
}
