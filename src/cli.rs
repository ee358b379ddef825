/*!
geodash Command Line Interface

Renders a configured dashboard to kepler.gl JSON or a standalone HTML page,
runs ad hoc queries against a reader, and validates dashboard configs.
*/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use geodash::query::{bind_params, parse_param, render_template, sql_literals};
use geodash::reader::{connect, Reader};
use geodash::writer::{HtmlWriter, KeplerWriter, Writer};
use geodash::{DashboardConfig, FilterState, Pipeline, VERSION};

#[derive(Parser)]
#[command(name = "geodash")]
#[command(about = "Render query results as interactive map layers")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Standalone HTML page with controls, map configuration and tables
    Html,
    /// kepler.gl saved-map JSON
    Kepler,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one render pass of a dashboard
    Render {
        /// Dashboard config file (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Override the config's connection string
        #[arg(long)]
        reader: Option<String>,

        /// Query parameter override, `key=value` (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Selected value of the category control
        #[arg(long)]
        category: Option<String>,

        /// Value of the numeric threshold control
        #[arg(long)]
        threshold: Option<f64>,

        /// Output format
        #[arg(long, value_enum, default_value = "html")]
        format: OutputFormat,

        /// Output file path (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Execute a SQL query and print the result table
    Query {
        /// The SQL query to execute
        sql: String,

        /// Data source connection string
        #[arg(long, default_value = "athena://")]
        reader: String,
    },

    /// Validate a dashboard config without running any query
    Validate {
        /// Dashboard config file (TOML)
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean for output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geodash=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            config,
            reader,
            params,
            category,
            threshold,
            format,
            output,
        } => {
            let mut dashboard_config = DashboardConfig::from_file(&config)?;
            if let Some(reader) = reader {
                dashboard_config.reader = reader;
            }

            let overrides = params
                .iter()
                .map(|pair| parse_param(pair))
                .collect::<geodash::Result<BTreeMap<_, _>>>()?;

            let pipeline = Pipeline::from_config(dashboard_config)?;
            let filter = FilterState {
                category,
                threshold,
            };
            let dashboard = pipeline.render_with_params(&filter, &overrides)?;

            let rendered = match format {
                OutputFormat::Html => HtmlWriter::new().write(&dashboard)?,
                OutputFormat::Kepler => KeplerWriter::new().pretty(true).write(&dashboard)?,
            };
            emit(&rendered, output.as_deref())?;
        }

        Commands::Query { sql, reader } => {
            let reader = connect(&reader)?;
            let df = reader.execute_sql(&sql)?;
            println!("{}", df);
        }

        Commands::Validate { config } => {
            let config = DashboardConfig::from_file(&config)?;
            // Placeholders must all resolve from [params]
            let values = bind_params(&config.params, &BTreeMap::new())?;
            let literals = sql_literals(&config.params, &values)?;
            for dataset in &config.datasets {
                render_template(&dataset.query, &literals)?;
            }

            println!(
                "{}: {} dataset(s), {} layer(s) - OK",
                config.title,
                config.datasets.len(),
                config.layers.len()
            );
        }
    }

    Ok(())
}

fn emit(text: &str, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Wrote {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}
