//! Named color ranges and color interpolation
//!
//! Provides the palettes a layer's `color_range` can name, and Oklab
//! interpolation used both to sample a palette down to `steps` stops and to
//! evaluate the linear color scale between stops.

use palette::{FromColor, IntoColor, LinSrgb, Mix, Oklab, Srgb};

use super::ColorRange;
use crate::config::ColorRangeConfig;
use crate::{GeodashError, Result};

/// A named palette with its kepler.gl classification.
#[derive(Debug, Clone, Copy)]
pub struct NamedPalette {
    pub name: &'static str,
    pub range_type: &'static str,
    pub category: &'static str,
    pub colors: &'static [&'static str],
}

// =============================================================================
// Sequential
// =============================================================================

/// Default kepler.gl color range
pub const GLOBAL_WARMING: &[&str] = &[
    "#5A1846", "#900C3F", "#C70039", "#E3611C", "#F1920E", "#FFC300",
];

pub const VIRIDIS: &[&str] = &[
    "#440154", "#482878", "#3e4a89", "#31688e", "#26828e",
    "#1f9e89", "#35b779", "#6ece58", "#b5de2b", "#fde725",
];

pub const MAGMA: &[&str] = &[
    "#000004", "#180f3d", "#440f76", "#721f81", "#9e2f7f",
    "#cd4071", "#f1605d", "#fd9668", "#feca8d", "#fcfdbf",
];

pub const BLUES: &[&str] = &[
    "#f7fbff", "#deebf7", "#c6dbef", "#9ecae1", "#6baed6",
    "#4292c6", "#2171b5", "#08519c", "#08306b",
];

pub const GREENS: &[&str] = &[
    "#f7fcf5", "#e5f5e0", "#c7e9c0", "#a1d99b", "#74c476",
    "#41ab5d", "#238b45", "#006d2c", "#00441b",
];

pub const ORANGES: &[&str] = &[
    "#fff5eb", "#fee6ce", "#fdd0a2", "#fdae6b", "#fd8d3c",
    "#f16913", "#d94801", "#a63603", "#7f2704",
];

pub const REDS: &[&str] = &[
    "#fff5f0", "#fee0d2", "#fcbba1", "#fc9272", "#fb6a4a",
    "#ef3b2c", "#cb181d", "#a50f15", "#67000d",
];

// =============================================================================
// Diverging
// =============================================================================

pub const RDBU: &[&str] = &[
    "#67001f", "#b2182b", "#d6604d", "#f4a582", "#fddbc7",
    "#f7f7f7", "#d1e5f0", "#92c5de", "#4393c3", "#2166ac", "#053061",
];

pub const RDYLBU: &[&str] = &[
    "#a50026", "#d73027", "#f46d43", "#fdae61", "#fee090",
    "#ffffbf", "#e0f3f8", "#abd9e9", "#74add1", "#4575b4", "#313695",
];

pub const RDYLGN: &[&str] = &[
    "#a50026", "#d73027", "#f46d43", "#fdae61", "#fee08b",
    "#ffffbf", "#d9ef8b", "#a6d96a", "#66bd63", "#1a9850", "#006837",
];

pub const SPECTRAL: &[&str] = &[
    "#9e0142", "#d53e4f", "#f46d43", "#fdae61", "#fee08b",
    "#ffffbf", "#e6f598", "#abdda4", "#66c2a5", "#3288bd", "#5e4fa2",
];

pub const PIYG: &[&str] = &[
    "#8e0152", "#c51b7d", "#de77ae", "#f1b6da", "#fde0ef",
    "#f7f7f7", "#e6f5d0", "#b8e186", "#7fbc41", "#4d9221", "#276419",
];

// =============================================================================
// Qualitative
// =============================================================================

pub const TABLEAU10: &[&str] = &[
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f",
    "#edc948", "#b07aa1", "#ff9da7", "#9c755f", "#bab0ac",
];

pub const SET2: &[&str] = &[
    "#66c2a5", "#fc8d62", "#8da0cb", "#e78ac3", "#a6d854",
    "#ffd92f", "#e5c494", "#b3b3b3",
];

const PALETTES: &[NamedPalette] = &[
    NamedPalette { name: "Global Warming", range_type: "sequential", category: "Uber", colors: GLOBAL_WARMING },
    NamedPalette { name: "Viridis", range_type: "sequential", category: "Custom", colors: VIRIDIS },
    NamedPalette { name: "Magma", range_type: "sequential", category: "Custom", colors: MAGMA },
    NamedPalette { name: "Blues", range_type: "sequential", category: "ColorBrewer", colors: BLUES },
    NamedPalette { name: "Greens", range_type: "sequential", category: "ColorBrewer", colors: GREENS },
    NamedPalette { name: "Oranges", range_type: "sequential", category: "ColorBrewer", colors: ORANGES },
    NamedPalette { name: "Reds", range_type: "sequential", category: "ColorBrewer", colors: REDS },
    NamedPalette { name: "RdBu", range_type: "diverging", category: "ColorBrewer", colors: RDBU },
    NamedPalette { name: "RdYlBu", range_type: "diverging", category: "ColorBrewer", colors: RDYLBU },
    NamedPalette { name: "RdYlGn", range_type: "diverging", category: "ColorBrewer", colors: RDYLGN },
    NamedPalette { name: "Spectral", range_type: "diverging", category: "ColorBrewer", colors: SPECTRAL },
    NamedPalette { name: "PiYG", range_type: "diverging", category: "ColorBrewer", colors: PIYG },
    NamedPalette { name: "Tableau10", range_type: "qualitative", category: "Custom", colors: TABLEAU10 },
    NamedPalette { name: "Set2", range_type: "qualitative", category: "ColorBrewer", colors: SET2 },
];

/// Look up a palette by name, ignoring case, spaces and dashes.
pub fn get_palette(name: &str) -> Option<&'static NamedPalette> {
    let wanted = normalize_name(name);
    PALETTES.iter().find(|p| normalize_name(p.name) == wanted)
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// The range used when a layer does not configure one.
pub fn default_color_range() -> ColorRange {
    ColorRange {
        name: "Global Warming".to_string(),
        range_type: "sequential".to_string(),
        category: "Uber".to_string(),
        colors: GLOBAL_WARMING.iter().map(|c| c.to_string()).collect(),
    }
}

/// Turn a layer's color range configuration into concrete hex stops.
///
/// Explicit `colors` win over `palette`; a palette with `steps` is resampled in Oklab.
pub fn resolve_color_range(config: &ColorRangeConfig) -> Result<ColorRange> {
    if let Some(colors) = &config.colors {
        if colors.is_empty() {
            return Err(GeodashError::LayerError(
                "Color range needs at least one color".to_string(),
            ));
        }
        let colors = colors
            .iter()
            .map(|c| color_to_hex(c))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(GeodashError::LayerError)?;
        return Ok(ColorRange {
            name: config.name.clone().unwrap_or_else(|| "Custom Palette".to_string()),
            range_type: config.range_type.clone().unwrap_or_else(|| "custom".to_string()),
            category: config.category.clone().unwrap_or_else(|| "Custom".to_string()),
            colors,
        });
    }

    let mut range = match &config.palette {
        Some(name) => {
            let palette = get_palette(name).ok_or_else(|| {
                GeodashError::LayerError(format!("Unknown color palette '{}'", name))
            })?;
            ColorRange {
                name: palette.name.to_string(),
                range_type: palette.range_type.to_string(),
                category: palette.category.to_string(),
                colors: palette.colors.iter().map(|c| c.to_string()).collect(),
            }
        }
        None => default_color_range(),
    };

    if let Some(steps) = config.steps {
        if steps == 0 {
            return Err(GeodashError::LayerError(
                "Color range steps must be at least 1".to_string(),
            ));
        }
        let stops: Vec<&str> = range.colors.iter().map(String::as_str).collect();
        range.colors =
            interpolate_colors(&stops, steps).map_err(GeodashError::LayerError)?;
        range.name = format!("{} {}", range.name, steps);
    }

    // Normalize to lowercase hex
    range.colors = range
        .colors
        .iter()
        .map(|c| color_to_hex(c))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(GeodashError::LayerError)?;

    Ok(range)
}

// =============================================================================
// Color Utilities
// =============================================================================

/// Convert a CSS color name/value to hex format.
/// Supports named colors (e.g., "red"), hex (#FF0000), rgb(), rgba(), hsl(), etc.
pub fn color_to_hex(value: &str) -> std::result::Result<String, String> {
    csscolorparser::parse(value)
        .map(|c| c.to_css_hex())
        .map_err(|e| format!("Invalid color '{}': {}", value, e))
}

/// Interpolate between colors in Oklab, returning `count` evenly-spaced hex colors.
pub fn interpolate_colors(colors: &[&str], count: usize) -> std::result::Result<Vec<String>, String> {
    if colors.is_empty() {
        return Err("At least one color is required".to_string());
    }

    if count == 0 {
        return Ok(vec![]);
    }

    let oklab = parse_to_oklab(colors)?;

    if count == 1 {
        return Ok(vec![oklab_to_hex(oklab[0])]);
    }

    Ok((0..count)
        .map(|i| mix_oklab(&oklab, i as f32 / (count - 1) as f32))
        .collect())
}

/// Color at fraction `t` (0..=1) along the stops, interpolated in Oklab.
pub fn color_at(stops: &[String], t: f64) -> std::result::Result<String, String> {
    let refs: Vec<&str> = stops.iter().map(String::as_str).collect();
    if refs.is_empty() {
        return Err("At least one color is required".to_string());
    }
    let oklab = parse_to_oklab(&refs)?;
    Ok(mix_oklab(&oklab, t.clamp(0.0, 1.0) as f32))
}

fn parse_to_oklab(colors: &[&str]) -> std::result::Result<Vec<Oklab<f32>>, String> {
    colors
        .iter()
        .map(|c| {
            let parsed = csscolorparser::parse(c)
                .map_err(|e| format!("Invalid color '{}': {}", c, e))?;
            let srgb = Srgb::new(parsed.r as f32, parsed.g as f32, parsed.b as f32);
            let linear: LinSrgb<f32> = srgb.into_linear();
            Ok(Oklab::from_color(linear))
        })
        .collect()
}

fn mix_oklab(colors: &[Oklab<f32>], t: f32) -> String {
    if colors.len() == 1 {
        return oklab_to_hex(colors[0]);
    }

    let num_segments = colors.len() - 1;
    let segment_float = t * num_segments as f32;
    let segment = (segment_float.floor() as usize).min(num_segments - 1);
    let segment_t = segment_float - segment as f32;

    oklab_to_hex(colors[segment].mix(colors[segment + 1], segment_t))
}

fn oklab_to_hex(color: Oklab<f32>) -> String {
    let lin: LinSrgb<f32> = color.into_color();
    let srgb: Srgb<f32> = Srgb::from_linear(lin);
    let r = (srgb.red.clamp(0.0, 1.0) * 255.0).round() as u8;
    let g = (srgb.green.clamp(0.0, 1.0) * 255.0).round() as u8;
    let b = (srgb.blue.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_palette() {
        assert!(get_palette("rdylgn").is_some());
        assert!(get_palette("RdYlGn").is_some());
        assert!(get_palette("global warming").is_some());
        assert!(get_palette("global-warming").is_some());
        assert!(get_palette("unknown").is_none());
        assert_eq!(get_palette("rdbu").unwrap().range_type, "diverging");
    }

    #[test]
    fn test_color_to_hex() {
        assert_eq!(color_to_hex("red").unwrap(), "#ff0000");
        assert_eq!(color_to_hex("#FF0000").unwrap(), "#ff0000");
        assert_eq!(color_to_hex("#f00").unwrap(), "#ff0000");
        assert!(color_to_hex("notacolor").is_err());
    }

    #[test]
    fn test_interpolate_colors_endpoints() {
        let colors = interpolate_colors(&["red", "white", "blue"], 5).unwrap();
        assert_eq!(colors.len(), 5);
        assert_eq!(colors[0], "#ff0000");
        assert_eq!(colors[2], "#ffffff");
        assert_eq!(colors[4], "#0000ff");
    }

    #[test]
    fn test_interpolate_colors_edge_counts() {
        assert!(interpolate_colors(&["red", "blue"], 0).unwrap().is_empty());
        assert_eq!(interpolate_colors(&["red", "blue"], 1).unwrap(), vec!["#ff0000"]);
        assert_eq!(
            interpolate_colors(&["red"], 3).unwrap(),
            vec!["#ff0000", "#ff0000", "#ff0000"]
        );
        assert!(interpolate_colors(&[], 3).is_err());
        assert!(interpolate_colors(&["red", "notacolor"], 3)
            .unwrap_err()
            .contains("Invalid color"));
    }

    #[test]
    fn test_color_at_clamps() {
        let stops = vec!["#000000".to_string(), "#ffffff".to_string()];
        assert_eq!(color_at(&stops, -1.0).unwrap(), "#000000");
        assert_eq!(color_at(&stops, 2.0).unwrap(), "#ffffff");
    }

    #[test]
    fn test_resolve_explicit_colors() {
        let config = ColorRangeConfig {
            colors: Some(vec!["red".to_string(), "#FFFFBF".to_string(), "green".to_string()]),
            name: Some("Hub diverging".to_string()),
            range_type: Some("diverging".to_string()),
            ..Default::default()
        };
        let range = resolve_color_range(&config).unwrap();
        assert_eq!(range.colors, vec!["#ff0000", "#ffffbf", "#008000"]);
        assert_eq!(range.name, "Hub diverging");
        assert_eq!(range.range_type, "diverging");
        assert_eq!(range.category, "Custom");
    }

    #[test]
    fn test_resolve_palette_with_steps() {
        let config = ColorRangeConfig {
            palette: Some("rdylgn".to_string()),
            steps: Some(3),
            ..Default::default()
        };
        let range = resolve_color_range(&config).unwrap();
        assert_eq!(range.colors, vec!["#a50026", "#ffffbf", "#006837"]);
        assert_eq!(range.range_type, "diverging");
        assert_eq!(range.category, "ColorBrewer");
        assert_eq!(range.name, "RdYlGn 3");
    }

    #[test]
    fn test_resolve_default_range() {
        let range = resolve_color_range(&ColorRangeConfig::default()).unwrap();
        assert_eq!(range.name, "Global Warming");
        assert_eq!(range.colors.len(), 6);
        assert_eq!(range.colors[0], "#5a1846");
    }

    #[test]
    fn test_resolve_errors() {
        let empty = ColorRangeConfig {
            colors: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(
            resolve_color_range(&empty),
            Err(GeodashError::LayerError(_))
        ));

        let unknown = ColorRangeConfig {
            palette: Some("rainbow-unicorn".to_string()),
            ..Default::default()
        };
        assert!(resolve_color_range(&unknown)
            .unwrap_err()
            .to_string()
            .contains("Unknown color palette"));
    }
}
