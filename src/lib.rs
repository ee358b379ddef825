/*!
# geodash - query results on a map

Runs fixed analytical SQL against a query service, cleans the tabular result
and renders it as interactive map layers with optional filter controls.

## Example

```toml
title = "Hub monitoring"
reader = "athena://"

[params]
start_date = { type = "date", default = "2024-01-01" }

[[datasets]]
id = "hubs"
query = "SELECT hub_id, hub_latitude, hub_longitude, gmv, score_hub FROM gold.hubs WHERE dt >= {{start_date}}"
latitude = "hub_latitude"
longitude = "hub_longitude"

[[layers]]
id = "hub-score"
dataset = "hubs"
label = "Hub score"
color_field = "score_hub"
color_scale = "quantile"
color_range = { palette = "rdylgn", steps = 3 }
size_field = "gmv"
```

## Architecture

Every render pass runs the whole pipeline top to bottom:
- **Connector** ([`reader`]) executes each dataset query and returns a DataFrame
- **Cleaner** ([`clean`]) drops rows with missing coordinates or non-finite values
- **Layer Builder** ([`map`]) turns each cleaned dataset into a [`map::MapLayer`]
- **Renderer** ([`render`]) applies filter state and assembles the widget tree,
  which [`writer`]s turn into kepler.gl JSON or a standalone HTML page
*/

pub mod clean;
pub mod config;
pub mod map;
pub mod pipeline;
pub mod query;
pub mod reader;
pub mod render;
pub mod writer;

// Re-export key types for convenience
pub use clean::CleanedDataset;
pub use config::{Credentials, DashboardConfig};
pub use map::{ColorScale, MapLayer};
pub use pipeline::Pipeline;
pub use render::{Dashboard, FilterState};

// DataFrame abstraction (wraps Polars)
pub use polars::prelude::DataFrame;

/// Main library error type
#[derive(thiserror::Error, Debug)]
pub enum GeodashError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Layer error: {0}")]
    LayerError(String),

    #[error("Output generation error: {0}")]
    WriterError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<polars::prelude::PolarsError> for GeodashError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        GeodashError::InternalError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GeodashError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
