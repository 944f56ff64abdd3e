//! Project parameters and the three-stage value resolution.
//!
//! Values flow Original -> Configuration -> Manual. Each later stage may
//! overwrite an earlier one unconditionally; nothing flows backwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};

/// Separator between a parameter's owner and its leaf name.
pub const SCOPE_SEPARATOR: &str = "::";

const MASK: &str = "******";

/// Stage that last set a parameter's value, ordered by precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum ParameterSource {
    #[default]
    Original,
    Configuration,
    Manual,
}

impl ParameterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterSource::Original => "Original",
            ParameterSource::Configuration => "Configuration",
            ParameterSource::Manual => "Manual",
        }
    }
}

/// Declared type of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Byte,
    DateTime,
    Decimal,
    Double,
    Int16,
    Int32,
    Int64,
    SByte,
    Single,
    #[default]
    String,
    UInt32,
    UInt64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub source: ParameterSource,
    #[serde(default)]
    pub data_type: DataType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
            sensitive: false,
            source: ParameterSource::Original,
            data_type: DataType::String,
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Value safe to print: sensitive values are masked.
    pub fn display_value(&self) -> Option<String> {
        match (&self.value, self.sensitive) {
            (Some(_), true) => Some(MASK.to_string()),
            (value, _) => value.clone(),
        }
    }

    fn assign(&mut self, value: Option<String>, source: ParameterSource) {
        self.value = value;
        if source > self.source {
            self.source = source;
        }
    }
}

/// Split "Owner::Leaf" on the first separator.
pub fn split_scoped_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(SCOPE_SEPARATOR)
}

/// Resolved parameter set plus non-fatal findings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub parameters: Vec<Parameter>,
    pub warnings: Vec<String>,
}

impl Resolution {
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Merge configuration values and manual overrides into the declared set.
///
/// Configuration keys that the project does not declare are ignored. Manual
/// keys must name a declared parameter. A sensitive parameter left without a
/// value by its configuration is reported as a warning, not an error.
pub fn resolve(
    declared: Vec<Parameter>,
    configuration: &BTreeMap<String, Option<String>>,
    manual: &BTreeMap<String, String>,
) -> Result<Resolution> {
    let mut parameters = Vec::with_capacity(declared.len());
    let mut seen = HashSet::with_capacity(declared.len());

    for mut parameter in declared {
        if !seen.insert(parameter.name.clone()) {
            return Err(Error::validation_invalid_argument(
                "parameters",
                format!("Parameter '{}' is declared more than once", parameter.name),
                Some(parameter.name),
                None,
            ));
        }
        parameter.source = ParameterSource::Original;
        parameters.push(parameter);
    }

    for parameter in parameters.iter_mut() {
        if let Some(value) = configuration.get(&parameter.name) {
            parameter.assign(value.clone(), ParameterSource::Configuration);
        }
    }

    let mut declared_names: Vec<String> = seen.into_iter().collect();
    declared_names.sort();

    for (name, value) in manual {
        let parameter = parameters
            .iter_mut()
            .find(|p| &p.name == name)
            .ok_or_else(|| Error::parameter_unknown(name.clone(), declared_names.clone()))?;
        parameter.assign(Some(value.clone()), ParameterSource::Manual);
    }

    let warnings = parameters
        .iter()
        .filter(|p| p.sensitive && p.source == ParameterSource::Configuration && p.value.is_none())
        .map(|p| {
            format!(
                "Sensitive parameter '{}' has no readable value in the configuration; \
                 it will be saved without a value unless overridden with --parameter",
                p.name
            )
        })
        .collect();

    Ok(Resolution {
        parameters,
        warnings,
    })
}

/// Printable summary row for command output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub sensitive: bool,
    pub source: ParameterSource,
}

pub fn report(parameters: &[Parameter]) -> Vec<ParameterReport> {
    parameters
        .iter()
        .map(|p| ParameterReport {
            name: p.name.clone(),
            value: p.display_value(),
            sensitive: p.sensitive,
            source: p.source,
        })
        .collect()
}
