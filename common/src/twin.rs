use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::TwinUpdateKind;

/// Keys starting with `$` are twin metadata, never property names.
pub const VERSION_KEY: &str = "$version";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TwinParseError {
    #[error("twin document is not a JSON object")]
    NotAnObject,
    #[error("full twin is missing a desired object")]
    MissingDesired,
}

/// One desired property extracted from a twin delivery, with the version
/// that applies to it.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredProperty {
    pub name: String,
    pub value: Value,
    pub version: i64,
}

/// Parsed view of a twin delivery.
///
/// The transport layer hands over a parsed key/value tree tagged partial or
/// full; this type extracts the desired properties and, for full snapshots,
/// the previously reported values used by the convergence check.
#[derive(Debug, Clone, Default)]
pub struct TwinDocument {
    desired: Vec<DesiredProperty>,
    reported: Map<String, Value>,
}

impl TwinDocument {
    pub fn parse(kind: TwinUpdateKind, document: &Value) -> Result<Self, TwinParseError> {
        let root = document.as_object().ok_or(TwinParseError::NotAnObject)?;

        match kind {
            TwinUpdateKind::Partial => Ok(Self {
                desired: collect_desired(root),
                reported: Map::new(),
            }),
            TwinUpdateKind::Full => {
                let desired = root
                    .get("desired")
                    .and_then(Value::as_object)
                    .ok_or(TwinParseError::MissingDesired)?;
                let reported = root
                    .get("reported")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();

                Ok(Self {
                    desired: collect_desired(desired),
                    reported,
                })
            }
        }
    }

    /// Desired properties of the delivery, metadata keys excluded.
    pub fn desired(&self) -> &[DesiredProperty] {
        &self.desired
    }

    /// The `value` subfield last reported for `name`, if any.
    pub fn reported_value(&self, name: &str) -> Option<&Value> {
        self.reported.get(name).and_then(|entry| entry.get("value"))
    }

    /// A desired property whose value matches the last reported value is
    /// already applied on the device; re-invoking its handler would only
    /// replay work the reconnect/resync flood has already done.
    pub fn is_converged(&self, property: &DesiredProperty) -> bool {
        self.reported_value(&property.name) == Some(&property.value)
    }
}

fn collect_desired(scope: &Map<String, Value>) -> Vec<DesiredProperty> {
    let scope_version = version_of(scope);

    scope
        .iter()
        .filter(|(name, _)| !name.starts_with('$'))
        .map(|(name, entry)| {
            // The effective version comes from the innermost scope that
            // carries one: the property object itself, else the enclosing
            // mapping.
            let version = entry
                .as_object()
                .and_then(|object| object.get(VERSION_KEY))
                .and_then(Value::as_i64)
                .unwrap_or(scope_version);
            let value = entry.get("value").cloned().unwrap_or(Value::Null);

            DesiredProperty {
                name: name.clone(),
                value,
                version,
            }
        })
        .collect()
}

fn version_of(scope: &Map<String, Value>) -> i64 {
    scope
        .get(VERSION_KEY)
        .and_then(Value::as_i64)
        .unwrap_or(0)
}
