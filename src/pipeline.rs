//! Connector → Cleaner → Layer Builder → Renderer
//!
//! A [`Pipeline`] owns a dashboard configuration and the reader its queries
//! run against. Every call to [`Pipeline::render`] re-executes the dataset
//! queries and recomputes everything from the results forward; nothing is
//! cached across passes.

use std::collections::BTreeMap;

use tracing::info;

use crate::clean::{clean, CleanedDataset};
use crate::config::DashboardConfig;
use crate::query::{bind_params, render_template, sql_literals};
use crate::reader::{connect, Reader};
use crate::render::{param_fields, render, Dashboard, FilterState};
use crate::Result;

pub struct Pipeline {
    config: DashboardConfig,
    reader: Box<dyn Reader + Send>,
}

impl Pipeline {
    pub fn new(config: DashboardConfig, reader: Box<dyn Reader + Send>) -> Self {
        Self { config, reader }
    }

    /// Build a pipeline whose reader comes from `config.reader`.
    pub fn from_config(config: DashboardConfig) -> Result<Self> {
        let reader = connect(&config.reader)?;
        Ok(Self::new(config, reader))
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn reader(&self) -> &dyn Reader {
        self.reader.as_ref()
    }

    /// The SQL each dataset would run with `overrides` applied to the
    /// configured parameters, in dataset order.
    pub fn queries(&self, overrides: &BTreeMap<String, String>) -> Result<Vec<String>> {
        let values = bind_params(&self.config.params, overrides)?;
        self.queries_for(&values)
    }

    fn queries_for(&self, values: &BTreeMap<String, String>) -> Result<Vec<String>> {
        let literals = sql_literals(&self.config.params, values)?;
        self.config
            .datasets
            .iter()
            .map(|dataset| render_template(&dataset.query, &literals))
            .collect()
    }

    /// Run every dataset query and clean its result.
    ///
    /// The first connection or query failure aborts the whole load.
    pub fn load(&self, overrides: &BTreeMap<String, String>) -> Result<Vec<CleanedDataset>> {
        let values = bind_params(&self.config.params, overrides)?;
        self.load_with(&values)
    }

    fn load_with(&self, values: &BTreeMap<String, String>) -> Result<Vec<CleanedDataset>> {
        let queries = self.queries_for(values)?;
        let mut datasets = Vec::with_capacity(queries.len());

        for (dataset, sql) in self.config.datasets.iter().zip(&queries) {
            info!("Querying dataset '{}'", dataset.id);
            let result = self.reader.execute_sql(sql)?;
            let cleaned = clean(
                result,
                &[dataset.latitude.as_str(), dataset.longitude.as_str()],
            )?;
            datasets.push(cleaned);
        }

        Ok(datasets)
    }

    /// One full render pass with the configured query parameters.
    pub fn render(&self, filter: &FilterState) -> Result<Dashboard> {
        self.render_with_params(filter, &BTreeMap::new())
    }

    /// One full render pass with `overrides` applied to the query parameters.
    pub fn render_with_params(
        &self,
        filter: &FilterState,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Dashboard> {
        let values = bind_params(&self.config.params, overrides)?;
        let datasets = self.load_with(&values)?;
        let mut dashboard = render(&self.config, &datasets, filter)?;
        dashboard.params = param_fields(&self.config, &values);
        Ok(dashboard)
    }
}
