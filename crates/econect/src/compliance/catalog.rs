use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::domain::{Module, NewValidationRule, RuleLevel, RuleOperator};

#[derive(Debug, thiserror::Error)]
pub enum RuleCatalogError {
    #[error("failed to read rule catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid rule catalog CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("rule catalog line {line}: {reason}")]
    InvalidRow { line: u64, reason: String },
}

/// Load validation rule definitions from a CSV file.
pub fn load_rules_from_path<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<NewValidationRule>, RuleCatalogError> {
    let file = std::fs::File::open(path)?;
    load_rules(file)
}

/// Parse `code,module,field,operator,value,level,message,active` rows.
///
/// Surrounding blanks are ignored everywhere except `value`, which is
/// compared as written.
pub fn load_rules<R: Read>(reader: R) -> Result<Vec<NewValidationRule>, RuleCatalogError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let mut rules = Vec::new();

    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        let row: RuleRow = record.deserialize(Some(&headers))?;
        rules.push(row.into_rule(line)?);
    }

    Ok(rules)
}

#[derive(Debug, Deserialize)]
struct RuleRow {
    code: String,
    module: String,
    field: String,
    operator: String,
    #[serde(default)]
    value: String,
    level: String,
    message: String,
    #[serde(default, deserialize_with = "flag_or_default")]
    active: Option<bool>,
}

impl RuleRow {
    fn into_rule(self, line: u64) -> Result<NewValidationRule, RuleCatalogError> {
        let code = self.code.trim();
        let field = self.field.trim();
        let invalid = |reason: String| RuleCatalogError::InvalidRow {
            line,
            reason: format!("{reason} ({code})"),
        };

        if code.is_empty() {
            return Err(invalid("missing rule code".to_string()));
        }
        if field.is_empty() {
            return Err(invalid("missing field path".to_string()));
        }
        let module = self
            .module
            .trim()
            .parse::<Module>()
            .map_err(|err| invalid(err.to_string()))?;
        let operator = self
            .operator
            .trim()
            .parse::<RuleOperator>()
            .map_err(invalid)?;
        let level = self.level.trim().parse::<RuleLevel>().map_err(invalid)?;

        Ok(NewValidationRule {
            module,
            field: field.to_string(),
            operator,
            value: self.value,
            level,
            code: code.to_string(),
            message: self.message.trim().to_string(),
            active: self.active.unwrap_or(true),
        })
    }
}

fn flag_or_default<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "sim" => Ok(Some(true)),
            "false" | "0" | "no" | "nao" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "'{other}' is not a boolean flag"
            ))),
        },
    }
}
