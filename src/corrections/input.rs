//! Correction input documents.
//!
//! ```json
//! {"site": "Calperum",
//!  "variables": {"Fc": {"ExcludeDates": [["2024-06-01 00:00", "2024-06-01 01:00"]],
//!                       "RangeCheck": [-50, 50]}}}
//! ```

use crate::error::{ConditionerError, InputKind, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrectionInput {
    pub site: String,
    pub variables: BTreeMap<String, VariableCorrections>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableCorrections {
    #[serde(rename = "ExcludeDates", default)]
    pub exclude_dates: Vec<(String, String)>,
    #[serde(rename = "RangeCheck", default)]
    pub range_check: Option<(Value, Value)>,
}

impl CorrectionInput {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConditionerError::MissingInput {
                kind: InputKind::Corrections,
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }
}

impl std::str::FromStr for CorrectionInput {
    type Err = ConditionerError;

    fn from_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)?;
        let Some(object) = value.as_object() else {
            return Err(ConditionerError::InvalidCorrections {
                reason: "corrections must be a JSON object".to_string(),
            });
        };
        if !object.contains_key("variables") {
            return Err(ConditionerError::InvalidCorrections {
                reason: "no \"variables\" key".to_string(),
            });
        }
        serde_json::from_value(value).map_err(|e| ConditionerError::InvalidCorrections {
            reason: e.to_string(),
        })
    }
}

/// Render a JSON scalar as a bound string; only numbers and strings qualify
pub(crate) fn bound_text(value: &Value) -> Result<String> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        other => Err(ConditionerError::InvalidCorrections {
            reason: format!("range bound {other} is not numeric"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_corrections() {
        let input: CorrectionInput = r#"{"site": "Calperum", "variables": {"Fc": {
                "ExcludeDates": [["2024-06-01 00:00", "2024-06-01 01:00"]],
                "RangeCheck": [-50, "50"]}}}"#
            .parse()
            .unwrap();

        assert_eq!(input.site, "Calperum");
        let fc = &input.variables["Fc"];
        assert_eq!(fc.exclude_dates.len(), 1);
        let (lower, upper) = fc.range_check.as_ref().unwrap();
        assert_eq!(bound_text(lower).unwrap(), "-50");
        assert_eq!(bound_text(upper).unwrap(), "50");
    }

    #[test]
    fn test_missing_variables_key_rejected() {
        let err = r#"{"site": "Calperum"}"#.parse::<CorrectionInput>().unwrap_err();
        assert!(matches!(err, ConditionerError::InvalidCorrections { reason } if reason.contains("variables")));
    }

    #[test]
    fn test_unknown_correction_kind_rejected() {
        let err = r#"{"site": "x", "variables": {"Fc": {"Despike": 3}}}"#
            .parse::<CorrectionInput>()
            .unwrap_err();
        assert!(matches!(err, ConditionerError::InvalidCorrections { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = CorrectionInput::from_path(Path::new("/nonexistent/corrections.json")).unwrap_err();
        assert!(matches!(
            err,
            ConditionerError::MissingInput {
                kind: InputKind::Corrections,
                ..
            }
        ));
    }
}
