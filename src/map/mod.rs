//! Map layer specifications
//!
//! A [`MapLayer`] is the declarative description of one set of points on the
//! map: where the coordinates come from, which columns drive color and size,
//! and the scales and ranges used for both. Layers are plain data; the
//! [`crate::writer`] module turns them into widget configuration.

mod builder;
pub mod palettes;
mod scale;

pub use builder::{build_layer, field_type, GeometrySource};
pub use scale::{extent, ColorScale, ColorScaleKind, LegendEntry, ScaleDomain, SizeScaleKind};

use serde::Serialize;

/// Geometry drawn by a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Geometry {
    Point,
}

/// Declared type of a field, as the map widget understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Real,
    Integer,
    String,
    Boolean,
    Timestamp,
}

/// A column referenced by an encoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldRef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// Ordered color stops with their palette classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorRange {
    pub name: String,
    #[serde(rename = "type")]
    pub range_type: String,
    pub category: String,
    pub colors: Vec<String>,
}

/// Coordinate columns of a point layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointColumns {
    pub lat: String,
    pub lng: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisConfig {
    pub color_range: ColorRange,
    pub size_range: [f64; 2],
    pub radius: f64,
    pub opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    pub data_id: String,
    pub label: String,
    pub columns: PointColumns,
    pub is_visible: bool,
    pub color_field: FieldRef,
    pub color_scale: ColorScaleKind,
    /// Domain the color scale was fitted to (extent or quantile thresholds)
    pub color_domain: Vec<f64>,
    pub size_field: Option<FieldRef>,
    pub size_scale: SizeScaleKind,
    pub size_domain: Option<[f64; 2]>,
    pub vis_config: VisConfig,
}

/// A point layer ready to hand to the map widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapLayer {
    pub id: String,
    #[serde(rename = "type")]
    pub geometry: Geometry,
    pub config: LayerSpec,
}

impl MapLayer {
    /// The color scale this layer was built with, refitted to its recorded domain.
    pub fn color_scale(&self) -> crate::Result<(ColorScale, ScaleDomain)> {
        let scale = ColorScale::new(self.config.color_scale, &self.config.vis_config.color_range)?;
        let domain = match (self.config.color_scale, self.config.color_domain.as_slice()) {
            // One stop has no thresholds, yet still colors every value
            (ColorScaleKind::Quantile, []) if scale.stops().len() == 1 => {
                ScaleDomain::Thresholds(Vec::new())
            }
            (_, []) => ScaleDomain::Empty,
            (ColorScaleKind::Quantile, thresholds) => ScaleDomain::Thresholds(thresholds.to_vec()),
            (_, [min, max]) => ScaleDomain::Extent {
                min: *min,
                max: *max,
            },
            (_, other) => {
                return Err(crate::GeodashError::InternalError(format!(
                    "Layer '{}' has malformed color domain of length {}",
                    self.id,
                    other.len()
                )))
            }
        };
        Ok((scale, domain))
    }
}
