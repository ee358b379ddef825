//! Credentials and dashboard configuration
//!
//! Credentials come from the process environment. The dashboard itself (the
//! queries, the layers drawn from them and the filter controls) is described
//! in a TOML file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::map::{ColorScaleKind, SizeScaleKind};
use crate::{GeodashError, Result};

// ============================================================================
// Credentials
// ============================================================================

pub const ENV_ACCESS_KEY: &str = "AWS_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "AWS_SECRET_KEY";
pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_STAGING_DIR: &str = "S3_STAGING_DIR";
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const ENV_WORKGROUP: &str = "ATHENA_WORKGROUP";

/// Connection parameters for the remote query service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Location where the service writes query results (e.g. `s3://bucket/prefix/`)
    pub staging_dir: String,
    pub session_token: Option<String>,
    pub workgroup: Option<String>,
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through an arbitrary variable lookup.
    ///
    /// Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                GeodashError::ConfigError(format!("Missing environment variable {}", key))
            })
        };

        Ok(Self {
            access_key: required(ENV_ACCESS_KEY)?,
            secret_key: required(ENV_SECRET_KEY)?,
            region: required(ENV_REGION)?,
            staging_dir: required(ENV_STAGING_DIR)?,
            session_token: get(ENV_SESSION_TOKEN),
            workgroup: get(ENV_WORKGROUP),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("staging_dir", &self.staging_dir)
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("workgroup", &self.workgroup)
            .finish()
    }
}

// ============================================================================
// Dashboard configuration
// ============================================================================

fn default_reader() -> String {
    "athena://".to_string()
}

fn default_preview_rows() -> usize {
    100
}

fn default_zoom() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

fn default_size_range() -> [f64; 2] {
    [1.0, 10.0]
}

fn default_radius() -> f64 {
    10.0
}

fn default_opacity() -> f64 {
    0.8
}

/// A complete dashboard: what to query and how to draw it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    pub title: String,
    /// Connection string for the Connector
    #[serde(default = "default_reader")]
    pub reader: String,
    /// Number of rows shown in the table panel per dataset
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
    /// Initial map zoom level
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    /// Typed values substituted into `{{name}}` placeholders of dataset queries
    #[serde(default)]
    pub params: BTreeMap<String, ParamConfig>,
    pub datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub controls: ControlsConfig,
}

/// One query and the coordinate columns of its result.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub id: String,
    pub label: Option<String>,
    /// SQL template
    pub query: String,
    pub latitude: String,
    pub longitude: String,
}

impl DatasetConfig {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// One map layer drawn from a dataset.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LayerConfig {
    pub id: String,
    pub dataset: String,
    pub label: Option<String>,
    pub color_field: String,
    #[serde(default)]
    pub color_scale: ColorScaleKind,
    #[serde(default)]
    pub color_range: ColorRangeConfig,
    pub size_field: Option<String>,
    #[serde(default)]
    pub size_scale: SizeScaleKind,
    #[serde(default = "default_size_range")]
    pub size_range: [f64; 2],
    #[serde(default = "default_radius")]
    pub radius: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default = "default_true")]
    pub visible: bool,
}

impl LayerConfig {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Color stops for a layer: a named palette or an explicit list.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ColorRangeConfig {
    /// Named palette (e.g. "rdylgn", "viridis", "global warming")
    pub palette: Option<String>,
    /// Number of stops sampled from the palette
    pub steps: Option<usize>,
    /// Explicit color stops (any CSS color)
    pub colors: Option<Vec<String>>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub range_type: Option<String>,
    pub category: Option<String>,
}

/// Interactive filter controls.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ControlsConfig {
    pub category: Option<CategoryControlConfig>,
    pub threshold: Option<ThresholdControlConfig>,
}

/// Dropdown populated from the distinct values of one column.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CategoryControlConfig {
    /// Dataset the options are read from (defaults to the first dataset)
    pub dataset: Option<String>,
    pub column: String,
    pub label: Option<String>,
}

/// SQL type of a query parameter. Decides how a value is validated and
/// written into the query as a literal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// `YYYY-MM-DD`, written as `DATE '...'`
    Date,
    /// Finite decimal number, written bare
    Number,
    /// Arbitrary text, written as a quoted string literal
    #[default]
    String,
}

/// A declared query parameter.
///
/// In TOML either `name = { type = "date", default = "2024-01-01" }`, or the
/// shorthand `name = "text"` (a string) and `name = 100` (a number).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(from = "ParamRepr")]
pub struct ParamConfig {
    pub kind: ParamKind,
    pub default: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl ParamValue {
    fn into_string(self) -> String {
        match self {
            ParamValue::Text(s) => s,
            ParamValue::Integer(v) => v.to_string(),
            ParamValue::Float(v) => v.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParamRepr {
    Typed {
        #[serde(rename = "type")]
        kind: ParamKind,
        default: ParamValue,
    },
    Text(String),
    Integer(i64),
    Float(f64),
}

impl From<ParamRepr> for ParamConfig {
    fn from(repr: ParamRepr) -> Self {
        let (kind, default) = match repr {
            ParamRepr::Typed { kind, default } => (kind, default.into_string()),
            ParamRepr::Text(s) => (ParamKind::String, s),
            ParamRepr::Integer(v) => (ParamKind::Number, v.to_string()),
            ParamRepr::Float(v) => (ParamKind::Number, v.to_string()),
        };
        ParamConfig { kind, default }
    }
}

/// Which side of the threshold is kept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Keep {
    #[default]
    Above,
    Below,
}

/// Numeric input narrowing rows by one column.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ThresholdControlConfig {
    pub column: String,
    pub label: Option<String>,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub step: f64,
    #[serde(default)]
    pub keep: Keep,
}

impl DashboardConfig {
    /// Parse and validate a TOML dashboard description.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: DashboardConfig = toml_edit::de::from_str(text)
            .map_err(|e| GeodashError::ConfigError(format!("Invalid dashboard config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML dashboard file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GeodashError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn dataset(&self, id: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.id == id)
    }

    /// Check cross references, numeric bounds and parameter defaults.
    pub fn validate(&self) -> Result<()> {
        for (name, param) in &self.params {
            crate::query::sql_literal(param.kind, &param.default).map_err(|e| {
                GeodashError::ConfigError(format!("Default of parameter '{}': {}", name, e))
            })?;
        }

        if self.datasets.is_empty() {
            return Err(GeodashError::ConfigError(
                "Dashboard needs at least one dataset".to_string(),
            ));
        }

        for (idx, dataset) in self.datasets.iter().enumerate() {
            if self.datasets[..idx].iter().any(|d| d.id == dataset.id) {
                return Err(GeodashError::ConfigError(format!(
                    "Duplicate dataset id '{}'",
                    dataset.id
                )));
            }
        }

        for (idx, layer) in self.layers.iter().enumerate() {
            if self.layers[..idx].iter().any(|l| l.id == layer.id) {
                return Err(GeodashError::ConfigError(format!(
                    "Duplicate layer id '{}'",
                    layer.id
                )));
            }
            if self.dataset(&layer.dataset).is_none() {
                return Err(GeodashError::ConfigError(format!(
                    "Layer '{}' references unknown dataset '{}'",
                    layer.id, layer.dataset
                )));
            }
            let [lo, hi] = layer.size_range;
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(GeodashError::ConfigError(format!(
                    "Layer '{}' has invalid size range [{}, {}]",
                    layer.id, lo, hi
                )));
            }
            if !(0.0..=1.0).contains(&layer.opacity) {
                return Err(GeodashError::ConfigError(format!(
                    "Layer '{}' opacity must be between 0 and 1",
                    layer.id
                )));
            }
        }

        if let Some(category) = &self.controls.category {
            if let Some(dataset) = &category.dataset {
                if self.dataset(dataset).is_none() {
                    return Err(GeodashError::ConfigError(format!(
                        "Category control references unknown dataset '{}'",
                        dataset
                    )));
                }
            }
        }

        if let Some(threshold) = &self.controls.threshold {
            let ThresholdControlConfig {
                min,
                max,
                default,
                step,
                ..
            } = *threshold;
            if !(min <= default && default <= max) {
                return Err(GeodashError::ConfigError(format!(
                    "Threshold default {} is outside [{}, {}]",
                    default, min, max
                )));
            }
            if !(step > 0.0) {
                return Err(GeodashError::ConfigError(
                    "Threshold step must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}
