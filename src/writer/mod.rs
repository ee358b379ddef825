//! Output writer abstraction layer
//!
//! The writer module turns a rendered [`Dashboard`] into something a map
//! widget or a browser can display.
//!
//! # Architecture
//!
//! All writers implement the `Writer` trait:
//! - [`KeplerWriter`] emits the kepler.gl saved-map JSON of the map view
//! - [`HtmlWriter`] emits a standalone page with the controls, the embedded
//!   map configuration and the table preview
//!
//! # Example
//!
//! ```rust,ignore
//! use geodash::writer::{Writer, KeplerWriter};
//!
//! let dashboard = pipeline.render(&FilterState::default())?;
//! let json = KeplerWriter::new().write(&dashboard)?;
//! ```

use crate::render::Dashboard;
use crate::Result;

mod html;
mod kepler;

pub use html::HtmlWriter;
pub use kepler::KeplerWriter;

/// Trait for dashboard output writers
///
/// # Associated Types
///
/// * `Output` - The type returned by `write()`.
pub trait Writer {
    /// The output type produced by this writer.
    type Output;

    /// Generate output for one rendered dashboard
    ///
    /// # Errors
    ///
    /// Returns `GeodashError::WriterError` if output generation fails.
    fn write(&self, dashboard: &Dashboard) -> Result<Self::Output>;
}
