//! Layer Builder: cleaned dataset + layer configuration -> [`MapLayer`]

use polars::prelude::DataType;
use tracing::debug;

use super::palettes::resolve_color_range;
use super::scale::{extent, ColorScale};
use super::{FieldRef, FieldType, Geometry, LayerSpec, MapLayer, PointColumns, VisConfig};
use crate::clean::CleanedDataset;
use crate::config::LayerConfig;
use crate::{GeodashError, Result};

/// Where a layer's points come from.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometrySource {
    /// Dataset identifier the widget uses to join layer and rows
    pub data_id: String,
    pub latitude: String,
    pub longitude: String,
}

/// Build one point layer.
///
/// Color and size domains are fitted to the rows of `dataset`; the color
/// stops and size bounds come from `layer` unchanged. The result depends only
/// on the inputs, so the same dataset and configuration always produce an
/// identical layer.
pub fn build_layer(
    dataset: &CleanedDataset,
    source: &GeometrySource,
    layer: &LayerConfig,
) -> Result<MapLayer> {
    for column in [&source.latitude, &source.longitude] {
        if !dataset.has_column(column) {
            return Err(GeodashError::LayerError(format!(
                "Layer '{}': coordinate column '{}' not found in dataset '{}'",
                layer.id, column, source.data_id
            )));
        }
    }

    let color_field = numeric_field(dataset, &layer.id, &layer.color_field)?;
    let color_values = numeric_values(dataset, &layer.color_field)?;
    let color_range = resolve_color_range(&layer.color_range)?;
    let color_scale = ColorScale::new(layer.color_scale, &color_range)?;
    let color_domain = color_scale.domain(&color_values);

    let (size_field, size_domain) = match &layer.size_field {
        Some(name) => {
            let field = numeric_field(dataset, &layer.id, name)?;
            let values = numeric_values(dataset, name)?;
            (Some(field), extent(&values))
        }
        None => (None, None),
    };

    debug!(
        "Built layer '{}' over {} rows ({} color scale, {} stops)",
        layer.id,
        dataset.height(),
        layer.color_scale,
        color_range.colors.len()
    );

    Ok(MapLayer {
        id: layer.id.clone(),
        geometry: Geometry::Point,
        config: LayerSpec {
            data_id: source.data_id.clone(),
            label: layer.display_label().to_string(),
            columns: PointColumns {
                lat: source.latitude.clone(),
                lng: source.longitude.clone(),
            },
            is_visible: layer.visible,
            color_field,
            color_scale: layer.color_scale,
            color_domain: color_domain.to_vec(),
            size_field,
            size_scale: layer.size_scale,
            size_domain,
            vis_config: VisConfig {
                color_range,
                size_range: layer.size_range,
                radius: layer.radius,
                opacity: layer.opacity,
            },
        },
    })
}

/// Declared widget type of a dataset column.
pub fn field_type(dataset: &CleanedDataset, column: &str) -> Option<FieldType> {
    let dtype = dataset.frame().column(column).ok()?.dtype().clone();
    Some(match dtype {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => FieldType::Integer,
        DataType::Float32 | DataType::Float64 => FieldType::Real,
        DataType::Boolean => FieldType::Boolean,
        _ if dataset.is_temporal(column) => FieldType::Timestamp,
        _ => FieldType::String,
    })
}

fn numeric_field(dataset: &CleanedDataset, layer_id: &str, column: &str) -> Result<FieldRef> {
    match field_type(dataset, column) {
        Some(field_type @ (FieldType::Integer | FieldType::Real)) => Ok(FieldRef {
            name: column.to_string(),
            field_type,
        }),
        Some(other) => Err(GeodashError::LayerError(format!(
            "Layer '{}': column '{}' is {:?}, expected a numeric column",
            layer_id, column, other
        ))),
        None => Err(GeodashError::LayerError(format!(
            "Layer '{}': column '{}' not found (columns: {})",
            layer_id,
            column,
            dataset.column_names().join(", ")
        ))),
    }
}

fn numeric_values(dataset: &CleanedDataset, column: &str) -> Result<Vec<f64>> {
    let series = dataset
        .frame()
        .column(column)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().flatten().collect())
}
