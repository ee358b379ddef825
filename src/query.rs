//! Query templates
//!
//! Dataset queries may contain `{{name}}` placeholders. Each name must be
//! declared in the config's `[params]` table with a type and a default; the
//! CLI or HTTP query string may override the value of a declared parameter
//! per render. Values never reach the SQL as raw text: they are validated
//! against their type and written as a literal (`DATE '2024-01-01'`, `100`,
//! `'it''s'`), so the placeholder takes the place of the whole literal.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use regex::Regex;

use crate::config::{ParamConfig, ParamKind};
use crate::{GeodashError, Result};

fn placeholder() -> Result<Regex> {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
        .map_err(|e| GeodashError::InternalError(format!("Regex error: {}", e)))
}

/// Names of the placeholders in `template`, in order of first appearance.
pub fn placeholders(template: &str) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for caps in placeholder()?.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Substitute every placeholder in `template` with its SQL literal.
///
/// `literals` comes from [`sql_literals`]. Fails with a `ConfigError` listing
/// all placeholders that have no value.
pub fn render_template(template: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let missing: Vec<String> = placeholders(template)?
        .into_iter()
        .filter(|name| !params.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(GeodashError::ConfigError(format!(
            "Query parameter(s) without a value: {}",
            missing.join(", ")
        )));
    }

    Ok(placeholder()?
        .replace_all(template, |caps: &regex::Captures| {
            params.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

/// The value of every declared parameter, defaults replaced by `overrides`.
///
/// Overriding an undeclared parameter or giving a value that does not fit
/// the parameter's type is a `ConfigError`.
pub fn bind_params(
    declared: &BTreeMap<String, ParamConfig>,
    overrides: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    if let Some(unknown) = overrides.keys().find(|k| !declared.contains_key(*k)) {
        return Err(GeodashError::ConfigError(format!(
            "Unknown query parameter '{}'",
            unknown
        )));
    }

    let mut values = BTreeMap::new();
    for (name, param) in declared {
        let value = overrides.get(name).unwrap_or(&param.default);
        sql_literal(param.kind, value).map_err(|e| {
            GeodashError::ConfigError(format!("Parameter '{}': {}", name, e))
        })?;
        values.insert(name.clone(), value.clone());
    }
    Ok(values)
}

/// SQL literal of every bound value.
pub fn sql_literals(
    declared: &BTreeMap<String, ParamConfig>,
    values: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    values
        .iter()
        .filter_map(|(name, value)| declared.get(name).map(|param| (name, param, value)))
        .map(|(name, param, value)| Ok((name.clone(), sql_literal(param.kind, value)?)))
        .collect()
}

/// Validate `value` as a `kind` and write it as a SQL literal.
pub fn sql_literal(kind: ParamKind, value: &str) -> Result<String> {
    match kind {
        ParamKind::Date => {
            let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
                GeodashError::ConfigError(format!("'{}' is not a YYYY-MM-DD date", value))
            })?;
            Ok(format!("DATE '{}'", date.format("%Y-%m-%d")))
        }
        ParamKind::Number => {
            let text = value.trim();
            match text.parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    // Parenthesized so a leading minus never forms `--`
                    if text.starts_with('-') {
                        Ok(format!("({})", text))
                    } else {
                        Ok(text.to_string())
                    }
                }
                _ => Err(GeodashError::ConfigError(format!(
                    "'{}' is not a finite number",
                    value
                ))),
            }
        }
        ParamKind::String => Ok(format!("'{}'", value.replace('\'', "''"))),
    }
}

/// Parse a `key=value` pair as given on the command line.
pub fn parse_param(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(GeodashError::ConfigError(format!(
            "Invalid parameter '{}', expected key=value",
            pair
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitution() {
        let sql = render_template(
            "SELECT * FROM gold.hubs WHERE dt >= DATE '{{ start_date }}' AND dt < DATE '{{end_date}}' AND dt <> DATE '{{start_date}}'",
            &params(&[("start_date", "2024-01-01"), ("end_date", "2024-02-01")]),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM gold.hubs WHERE dt >= DATE '2024-01-01' AND dt < DATE '2024-02-01' AND dt <> DATE '2024-01-01'"
        );
    }

    #[test]
    fn test_missing_parameter_is_error() {
        let err = render_template(
            "SELECT * FROM t WHERE dt >= '{{start_date}}' AND city = '{{city}}'",
            &params(&[("city", "SP")]),
        )
        .unwrap_err();
        assert!(matches!(err, GeodashError::ConfigError(_)));
        assert!(err.to_string().contains("start_date"));
        assert!(!err.to_string().contains("city"));
    }

    #[test]
    fn test_no_placeholders() {
        let sql = "SELECT '{not a placeholder}' AS x";
        assert_eq!(render_template(sql, &BTreeMap::new()).unwrap(), sql);
        assert!(placeholders(sql).unwrap().is_empty());
    }

    #[test]
    fn test_placeholders_dedup_in_order() {
        assert_eq!(placeholders("{{b}} {{a}} {{ b }}").unwrap(), vec!["b", "a"]);
    }

    fn declared() -> BTreeMap<String, ParamConfig> {
        let param = |kind, default: &str| ParamConfig {
            kind,
            default: default.to_string(),
        };
        BTreeMap::from([
            ("start_date".to_string(), param(ParamKind::Date, "2024-01-01")),
            ("min_gmv".to_string(), param(ParamKind::Number, "100")),
            ("city".to_string(), param(ParamKind::String, "SP")),
        ])
    }

    #[test]
    fn test_sql_literals_by_kind() {
        assert_eq!(sql_literal(ParamKind::Date, " 2024-03-01 ").unwrap(), "DATE '2024-03-01'");
        assert_eq!(sql_literal(ParamKind::Number, "2.5e3").unwrap(), "2.5e3");
        assert_eq!(sql_literal(ParamKind::Number, "-5").unwrap(), "(-5)");
        assert_eq!(sql_literal(ParamKind::String, "O'Hare").unwrap(), "'O''Hare'");

        assert!(sql_literal(ParamKind::Date, "2024-13-01").is_err());
        assert!(sql_literal(ParamKind::Date, "2024-01-01' OR '1'='1").is_err());
        assert!(sql_literal(ParamKind::Number, "1000 OR TRUE").is_err());
        assert!(sql_literal(ParamKind::Number, "NaN").is_err());
        assert!(sql_literal(ParamKind::Number, "inf").is_err());
    }

    #[test]
    fn test_bind_params_applies_overrides() {
        let declared = declared();
        let overrides = params(&[("min_gmv", "250")]);
        let values = bind_params(&declared, &overrides).unwrap();
        assert_eq!(values["min_gmv"], "250");
        assert_eq!(values["start_date"], "2024-01-01");

        let sql = render_template(
            "SELECT * FROM t WHERE dt >= {{start_date}} AND gmv >= {{min_gmv}} AND city = {{city}}",
            &sql_literals(&declared, &values).unwrap(),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE dt >= DATE '2024-01-01' AND gmv >= 250 AND city = 'SP'"
        );
    }

    #[test]
    fn test_bind_params_rejects_unknown_and_malformed() {
        let declared = declared();

        let err = bind_params(&declared, &params(&[("not_a_param", "x")])).unwrap_err();
        assert!(matches!(err, GeodashError::ConfigError(_)));
        assert!(err.to_string().contains("not_a_param"));

        let err = bind_params(&declared, &params(&[("min_gmv", "1000 OR TRUE")])).unwrap_err();
        assert!(matches!(err, GeodashError::ConfigError(_)));
        assert!(err.to_string().contains("min_gmv"));
    }

    #[test]
    fn test_string_values_stay_inside_their_literal() {
        let declared = declared();
        let values = bind_params(&declared, &params(&[("city", "SP' OR '1'='1")])).unwrap();
        let sql = render_template(
            "SELECT * FROM t WHERE city = {{city}}",
            &sql_literals(&declared, &values).unwrap(),
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE city = 'SP'' OR ''1''=''1'");
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("start_date=2024-03-01").unwrap(),
            ("start_date".to_string(), "2024-03-01".to_string())
        );
        assert_eq!(parse_param("q=a=b").unwrap(), ("q".to_string(), "a=b".to_string()));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }
}
