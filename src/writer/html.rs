//! Standalone HTML dashboard
//!
//! The page carries the filter controls as a GET form (`?category=..&threshold=..`),
//! so every submission is one new render pass. The kepler.gl configuration is
//! embedded as a JSON script element for the map widget to load, next to a
//! legend per layer and the table preview.

use polars::prelude::AnyValue;

use super::kepler::KeplerWriter;
use super::Writer;
use crate::config::ParamKind;
use crate::render::{Controls, Dashboard, ParamField, TablePanel};
use crate::{DataFrame, GeodashError, Result};

/// Id of the script element holding the map configuration.
pub const MAP_CONFIG_ID: &str = "geodash-map-config";

pub struct HtmlWriter {
    kepler: KeplerWriter,
}

impl HtmlWriter {
    pub fn new() -> Self {
        Self {
            kepler: KeplerWriter::new(),
        }
    }
}

impl Default for HtmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for HtmlWriter {
    type Output = String;

    fn write(&self, dashboard: &Dashboard) -> Result<String> {
        let map_json = self.kepler.write(dashboard)?;

        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str(&format!("<title>{}</title>\n", escape_html(&dashboard.title)));
        html.push_str("</head>\n<body>\n");
        html.push_str(&format!("<h1>{}</h1>\n", escape_html(&dashboard.title)));

        if !dashboard.controls.is_empty() || !dashboard.params.is_empty() {
            html.push_str(&controls_to_html(&dashboard.controls, &dashboard.params));
        }

        if let Some(notice) = &dashboard.notice {
            html.push_str(&format!("<p class=\"notice\">{}</p>\n", escape_html(notice)));
        }

        html.push_str("<section class=\"map\">\n<div id=\"map\"></div>\n");
        for layer in &dashboard.map.layers {
            html.push_str(&legend_to_html(layer)?);
        }
        html.push_str(&format!(
            "<script type=\"application/json\" id=\"{}\">{}</script>\n",
            MAP_CONFIG_ID,
            escape_script(&map_json)
        ));
        html.push_str("</section>\n");

        for table in &dashboard.tables {
            html.push_str(&table_to_html(table));
        }

        html.push_str("</body>\n</html>\n");
        Ok(html)
    }
}

fn controls_to_html(controls: &Controls, params: &[ParamField]) -> String {
    let mut html = String::from("<form method=\"get\" class=\"controls\">\n");

    // Parameters ride along with every submission
    for param in params {
        let input = match param.kind {
            ParamKind::Date => "type=\"date\"",
            ParamKind::Number => "type=\"number\" step=\"any\"",
            ParamKind::String => "type=\"text\"",
        };
        html.push_str(&format!(
            "<label>{0}\n<input {1} name=\"{0}\" value=\"{2}\">\n</label>\n",
            escape_html(&param.name),
            input,
            escape_html(&param.value)
        ));
    }

    if let Some(selector) = &controls.category {
        html.push_str(&format!(
            "<label>{}\n<select name=\"category\">\n<option value=\"\">All</option>\n",
            escape_html(&selector.label)
        ));
        for option in &selector.options {
            let selected = if selector.selected.as_deref() == Some(option.as_str()) {
                " selected"
            } else {
                ""
            };
            html.push_str(&format!(
                "<option value=\"{0}\"{1}>{0}</option>\n",
                escape_html(option),
                selected
            ));
        }
        html.push_str("</select>\n</label>\n");
    }

    if let Some(input) = &controls.threshold {
        html.push_str(&format!(
            "<label>{}\n<input type=\"number\" name=\"threshold\" min=\"{}\" max=\"{}\" step=\"{}\" value=\"{}\">\n</label>\n",
            escape_html(&input.label),
            input.min,
            input.max,
            input.step,
            input.value
        ));
    }

    html.push_str("<button type=\"submit\">Apply</button>\n</form>\n");
    html
}

fn legend_to_html(layer: &crate::map::MapLayer) -> Result<String> {
    let (scale, domain) = layer
        .color_scale()
        .map_err(|e| GeodashError::WriterError(format!("Legend for '{}': {}", layer.id, e)))?;

    let mut html = format!(
        "<div class=\"legend\" data-layer=\"{}\">\n<strong>{}</strong> <span>{}</span>\n<ul>\n",
        escape_html(&layer.id),
        escape_html(&layer.config.label),
        escape_html(&layer.config.color_field.name)
    );
    for entry in scale.legend(&domain) {
        html.push_str(&format!(
            "<li><span class=\"swatch\" style=\"background:{}\"></span>{}</li>\n",
            escape_html(&entry.color),
            escape_html(&entry.label)
        ));
    }
    html.push_str("</ul>\n</div>\n");
    Ok(html)
}

fn table_to_html(table: &TablePanel) -> String {
    let mut html = format!(
        "<section class=\"table\">\n<h2>{}</h2>\n",
        escape_html(&table.label)
    );
    html.push_str(&dataframe_to_html(&table.preview));
    if table.total_rows > table.preview.height() {
        html.push_str(&format!(
            "<p>Showing {} of {} rows</p>\n",
            table.preview.height(),
            table.total_rows
        ));
    }
    html.push_str("</section>\n");
    html
}

/// Convert DataFrame to HTML table
fn dataframe_to_html(df: &DataFrame) -> String {
    let mut html = String::from("<table border=\"1\" class=\"dataframe\">\n<thead><tr>");

    for col in df.get_column_names() {
        html.push_str(&format!("<th>{}</th>", escape_html(col)));
    }
    html.push_str("</tr></thead>\n<tbody>\n");

    for i in 0..df.height() {
        html.push_str("<tr>");
        for col in df.get_columns() {
            let value = col.get(i).unwrap_or(AnyValue::Null);
            let text = match value {
                AnyValue::Null => String::new(),
                AnyValue::String(s) => s.to_string(),
                AnyValue::StringOwned(s) => s.to_string(),
                other => other.to_string(),
            };
            html.push_str(&format!("<td>{}</td>", escape_html(&text)));
        }
        html.push_str("</tr>\n");
    }

    html.push_str("</tbody>\n</table>\n");
    html
}

/// Escape HTML special characters
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Keep embedded JSON from closing its script element.
fn escape_script(json: &str) -> String {
    json.replace("</", "<\\/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clean::clean;
    use crate::config::DashboardConfig;
    use crate::render::{render, FilterState};
    use polars::prelude::*;

    const CONFIG: &str = r##"
title = "Price <monitor>"
preview_rows = 1

[[datasets]]
id = "stores"
query = "SELECT * FROM stores"
latitude = "lat"
longitude = "lng"

[[layers]]
id = "discount"
dataset = "stores"
color_field = "discount"
color_range = { colors = ["#fee8c8", "#e34a33"] }

[controls.category]
column = "brand"
label = "Brand"

[controls.threshold]
column = "discount"
label = "Suggested discount (%)"
min = 0.0
max = 100.0
default = 10.0
step = 0.5
"##;

    fn page(filter: &FilterState) -> String {
        let config = DashboardConfig::from_toml(CONFIG).unwrap();
        let df = df! {
            "lat" => [-23.0, -22.0, -21.0],
            "lng" => [-46.0, -45.0, -44.0],
            "brand" => ["</script>", "acme", "acme"],
            "discount" => [5.0, 15.0, 25.0],
        }
        .unwrap();
        let data = clean(df, &["lat", "lng"]).unwrap();
        let dashboard = render(&config, &[data], filter).unwrap();
        HtmlWriter::new().write(&dashboard).unwrap()
    }

    #[test]
    fn test_page_structure() {
        let html = page(&FilterState {
            category: Some("acme".to_string()),
            threshold: Some(12.5),
        });

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h1>Price &lt;monitor&gt;</h1>"));
        assert!(html.contains("<option value=\"acme\" selected>acme</option>"));
        assert!(html.contains("name=\"threshold\" min=\"0\" max=\"100\" step=\"0.5\" value=\"12.5\""));
        assert!(html.contains(&format!("id=\"{}\"", MAP_CONFIG_ID)));
        assert!(html.contains("<div class=\"legend\" data-layer=\"discount\">"));
        assert!(html.contains("Showing 1 of 2 rows"));
        assert!(html.contains("<table border=\"1\" class=\"dataframe\">"));
    }

    #[test]
    fn test_embedded_json_cannot_close_script() {
        let html = page(&FilterState {
            category: None,
            threshold: Some(0.0),
        });
        // Only the real closing tag of the config element remains
        let start = html.find(MAP_CONFIG_ID).unwrap();
        let body = &html[start..];
        let close = body.find("</script>").unwrap();
        assert!(body[..close].contains("<\\/script>"));
        assert!(html.contains("<option value=\"&lt;/script&gt;\">"));
    }

    #[test]
    fn test_form_keeps_query_params() {
        let config = DashboardConfig::from_toml(CONFIG).unwrap();
        let df = df! {
            "lat" => [-23.0],
            "lng" => [-46.0],
            "brand" => ["acme"],
            "discount" => [15.0],
        }
        .unwrap();
        let data = clean(df, &["lat", "lng"]).unwrap();
        let mut dashboard = render(&config, &[data], &FilterState::default()).unwrap();
        dashboard.params = vec![
            ParamField {
                name: "start_date".to_string(),
                kind: ParamKind::Date,
                value: "2024-03-01".to_string(),
            },
            ParamField {
                name: "city".to_string(),
                kind: ParamKind::String,
                value: "São \"Paulo\"".to_string(),
            },
        ];

        let html = HtmlWriter::new().write(&dashboard).unwrap();
        assert!(html.contains(
            "<input type=\"date\" name=\"start_date\" value=\"2024-03-01\">"
        ));
        assert!(html.contains(
            "<input type=\"text\" name=\"city\" value=\"São &quot;Paulo&quot;\">"
        ));
        let form_end = html.find("</form>").unwrap();
        assert!(html.find("name=\"start_date\"").unwrap() < form_end);
    }

    #[test]
    fn test_empty_state_notice() {
        let html = page(&FilterState {
            category: Some("none".to_string()),
            threshold: None,
        });
        assert!(html.contains("<p class=\"notice\">No data to display for the current filters</p>"));
        assert!(!html.contains("class=\"legend\""));
    }
}
