//! Catalog stored procedures used by deployment.

use std::time::Duration;

use super::{
    CatalogExecutor, ExecutionScope, ParamSpec, ProcedureCall, ProcedureSignature, SqlType,
    SqlValue,
};
use crate::error::{Error, Result};
use crate::parameters::DataType;

/// Backend error raised by `create_folder` when the folder already exists.
pub const FOLDER_EXISTS_ERROR: i32 = 27190;

const NAME: SqlType = SqlType::NVarChar(128);

pub static CREATE_FOLDER: ProcedureSignature = ProcedureSignature {
    name: "[catalog].[create_folder]",
    params: &[
        ParamSpec::input("@folder_name", NAME),
        ParamSpec::output("@folder_id", SqlType::BigInt),
    ],
};

pub static DEPLOY_PROJECT: ProcedureSignature = ProcedureSignature {
    name: "[catalog].[deploy_project]",
    params: &[
        ParamSpec::input("@folder_name", NAME),
        ParamSpec::input("@project_name", NAME),
        ParamSpec::input("@project_stream", SqlType::VarBinaryMax),
        ParamSpec::output("@operation_id", SqlType::BigInt),
    ],
};

pub static SET_OBJECT_PARAMETER_VALUE: ProcedureSignature = ProcedureSignature {
    name: "[catalog].[set_object_parameter_value]",
    params: &[
        ParamSpec::input("@object_type", SqlType::SmallInt),
        ParamSpec::input("@folder_name", NAME),
        ParamSpec::input("@project_name", NAME),
        ParamSpec::input("@parameter_name", NAME),
        ParamSpec::input("@parameter_value", SqlType::SqlVariant),
        ParamSpec::input("@object_name", SqlType::NVarChar(260)),
        ParamSpec::input("@value_type", SqlType::Char(1)),
    ],
};

pub static VALIDATE_PROJECT: ProcedureSignature = ProcedureSignature {
    name: "[catalog].[validate_project]",
    params: &[
        ParamSpec::input("@folder_name", NAME),
        ParamSpec::input("@project_name", NAME),
        ParamSpec::input("@validate_type", SqlType::Char(1)),
        ParamSpec::output("@validation_id", SqlType::BigInt),
        ParamSpec::input("@use32bitruntime", SqlType::Bit),
        ParamSpec::input("@environment_scope", SqlType::Char(1)),
        ParamSpec::input("@reference_id", SqlType::BigInt),
    ],
};

/// Catalog object kinds that own parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Project,
    Package,
}

impl ObjectType {
    pub fn code(&self) -> i16 {
        match self {
            ObjectType::Project => 20,
            ObjectType::Package => 30,
        }
    }
}

/// Typed entry points over the executor. `timeout` applies per attempt.
pub struct CatalogProcedures<'e, 'c> {
    executor: &'e CatalogExecutor<'c>,
    timeout: Duration,
}

impl<'e, 'c> CatalogProcedures<'e, 'c> {
    pub fn new(executor: &'e CatalogExecutor<'c>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    /// Create a folder. Returns `None` when it already existed.
    pub fn create_folder(
        &self,
        scope: Option<&mut ExecutionScope<'_>>,
        folder_name: &str,
    ) -> Result<Option<i64>> {
        let call = ProcedureCall::new(
            &CREATE_FOLDER,
            vec![("@folder_name", SqlValue::text(folder_name))],
        )?;

        match self.executor.execute(scope, &call, self.timeout) {
            Ok(outcome) => Ok(outcome.output_i64("@folder_id")),
            Err(err) if err.catalog_error_number() == Some(FOLDER_EXISTS_ERROR) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Upload a serialized project. Returns the catalog operation id.
    pub fn deploy_project(
        &self,
        scope: Option<&mut ExecutionScope<'_>>,
        folder_name: &str,
        project_name: &str,
        project_stream: Vec<u8>,
    ) -> Result<Option<i64>> {
        let call = ProcedureCall::new(
            &DEPLOY_PROJECT,
            vec![
                ("@folder_name", SqlValue::text(folder_name)),
                ("@project_name", SqlValue::text(project_name)),
                ("@project_stream", SqlValue::Binary(project_stream)),
            ],
        )?;

        let outcome = self.executor.execute(scope, &call, self.timeout)?;
        Ok(outcome.output_i64("@operation_id"))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_object_parameter_value(
        &self,
        scope: Option<&mut ExecutionScope<'_>>,
        object_type: ObjectType,
        folder_name: &str,
        project_name: &str,
        parameter_name: &str,
        parameter_value: SqlValue,
        object_name: &str,
    ) -> Result<()> {
        let call = ProcedureCall::new(
            &SET_OBJECT_PARAMETER_VALUE,
            vec![
                ("@object_type", SqlValue::SmallInt(object_type.code())),
                ("@folder_name", SqlValue::text(folder_name)),
                ("@project_name", SqlValue::text(project_name)),
                ("@parameter_name", SqlValue::text(parameter_name)),
                ("@parameter_value", parameter_value),
                ("@object_name", SqlValue::text(object_name)),
                ("@value_type", SqlValue::text("V")),
            ],
        )?;

        self.executor.execute(scope, &call, self.timeout)?;
        Ok(())
    }

    /// Queue a full validation against the deployed project. Returns the validation id.
    pub fn validate_project(
        &self,
        scope: Option<&mut ExecutionScope<'_>>,
        folder_name: &str,
        project_name: &str,
    ) -> Result<Option<i64>> {
        let call = ProcedureCall::new(
            &VALIDATE_PROJECT,
            vec![
                ("@folder_name", SqlValue::text(folder_name)),
                ("@project_name", SqlValue::text(project_name)),
                ("@validate_type", SqlValue::text("F")),
                ("@use32bitruntime", SqlValue::Bit(false)),
                ("@environment_scope", SqlValue::text("D")),
                ("@reference_id", SqlValue::Null),
            ],
        )?;

        let outcome = self.executor.execute(scope, &call, self.timeout)?;
        Ok(outcome.output_i64("@validation_id"))
    }
}

/// Convert a parameter's textual value to a typed catalog value.
pub fn parameter_value(name: &str, data_type: DataType, raw: &str) -> Result<SqlValue> {
    let invalid = |problem: String| {
        Error::validation_invalid_argument("parameter", problem, Some(name.to_string()), None)
    };
    let trimmed = raw.trim();

    macro_rules! parse_as {
        ($ty:ty, $variant:expr, $label:expr) => {
            trimmed.parse::<$ty>().map($variant).map_err(|_| {
                invalid(format!(
                    "Value '{}' of parameter '{}' is not a valid {}",
                    raw, name, $label
                ))
            })
        };
    }

    match data_type {
        DataType::String => Ok(SqlValue::Text(raw.to_string())),
        DataType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(SqlValue::Bit(true)),
            "false" | "0" => Ok(SqlValue::Bit(false)),
            _ => Err(invalid(format!(
                "Value '{}' of parameter '{}' is not a valid Boolean",
                raw, name
            ))),
        },
        DataType::Byte => parse_as!(u8, SqlValue::TinyInt, "Byte"),
        DataType::SByte => parse_as!(i8, |v| SqlValue::SmallInt(i16::from(v)), "SByte"),
        DataType::Int16 => parse_as!(i16, SqlValue::SmallInt, "Int16"),
        DataType::Int32 => parse_as!(i32, SqlValue::Int, "Int32"),
        DataType::Int64 => parse_as!(i64, SqlValue::BigInt, "Int64"),
        DataType::UInt32 => parse_as!(u32, |v| SqlValue::BigInt(i64::from(v)), "UInt32"),
        DataType::UInt64 => {
            parse_as!(u64, |v: u64| SqlValue::Decimal(v.to_string()), "UInt64")
        }
        DataType::Single => match trimmed.parse::<f32>() {
            Ok(v) if v.is_finite() => Ok(SqlValue::Real(v)),
            _ => Err(invalid(format!(
                "Value '{}' of parameter '{}' is not a valid Single",
                raw, name
            ))),
        },
        DataType::Double => match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(SqlValue::Float(v)),
            _ => Err(invalid(format!(
                "Value '{}' of parameter '{}' is not a valid Double",
                raw, name
            ))),
        },
        DataType::Decimal => {
            let digits = trimmed
                .strip_prefix(['-', '+'])
                .unwrap_or(trimmed);
            let well_formed = !digits.is_empty()
                && digits.chars().filter(|c| *c == '.').count() <= 1
                && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
                && digits.chars().any(|c| c.is_ascii_digit());
            if well_formed {
                Ok(SqlValue::Decimal(trimmed.to_string()))
            } else {
                Err(invalid(format!(
                    "Value '{}' of parameter '{}' is not a valid Decimal",
                    raw, name
                )))
            }
        }
        DataType::DateTime => chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
            .or_else(|_| {
                chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
            })
            .map(|dt| SqlValue::DateTime(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()))
            .map_err(|_| {
                invalid(format!(
                    "Value '{}' of parameter '{}' is not a valid DateTime",
                    raw, name
                ))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::catalog::testing::{Event, FakeBackend};
    use crate::retry::RetryPolicy;

    fn executor(backend: &FakeBackend) -> CatalogExecutor<'_> {
        CatalogExecutor::new(
            backend,
            RetryPolicy::new(10, Duration::ZERO),
            CancellationToken::new(),
        )
    }

    #[test]
    fn signatures_match_catalog_contract() {
        let declared: Vec<String> = VALIDATE_PROJECT
            .params
            .iter()
            .map(|p| format!("{} {}", p.name, p.sql_type.declaration()))
            .collect();
        assert_eq!(
            declared,
            vec![
                "@folder_name nvarchar(128)",
                "@project_name nvarchar(128)",
                "@validate_type char(1)",
                "@validation_id bigint",
                "@use32bitruntime bit",
                "@environment_scope char(1)",
                "@reference_id bigint",
            ]
        );
        assert_eq!(
            SET_OBJECT_PARAMETER_VALUE.params[5].sql_type,
            SqlType::NVarChar(260)
        );
    }

    #[test]
    fn existing_folder_counts_as_success() {
        let backend = FakeBackend::new();
        backend.fail_next("[catalog].[create_folder]", FOLDER_EXISTS_ERROR);
        let executor = executor(&backend);
        let procedures = CatalogProcedures::new(&executor, Duration::from_secs(1));

        assert_eq!(procedures.create_folder(None, "ETL").unwrap(), None);
        assert_eq!(backend.calls_to("[catalog].[create_folder]").len(), 1);
    }

    #[test]
    fn new_folder_returns_its_id() {
        let backend = FakeBackend::new();
        let executor = executor(&backend);
        let procedures = CatalogProcedures::new(&executor, Duration::from_secs(1));

        assert_eq!(procedures.create_folder(None, "ETL").unwrap(), Some(1));
    }

    #[test]
    fn other_create_folder_errors_propagate() {
        let backend = FakeBackend::new();
        backend.fail_next("[catalog].[create_folder]", 229);
        let executor = executor(&backend);
        let procedures = CatalogProcedures::new(&executor, Duration::from_secs(1));

        let err = procedures.create_folder(None, "ETL").unwrap_err();
        assert_eq!(err.catalog_error_number(), Some(229));
    }

    #[test]
    fn set_parameter_sends_literal_value_marker() {
        let backend = FakeBackend::new();
        let executor = executor(&backend);
        let procedures = CatalogProcedures::new(&executor, Duration::from_secs(1));

        procedures
            .set_object_parameter_value(
                None,
                ObjectType::Package,
                "ETL",
                "Sales",
                "ConnStr",
                SqlValue::text("Server=db"),
                "Load.dtsx",
            )
            .unwrap();

        let calls = backend.calls_to("[catalog].[set_object_parameter_value]");
        assert_eq!(calls.len(), 1);
        let inputs = &calls[0];
        assert_eq!(inputs[0], ("@object_type".to_string(), SqlValue::SmallInt(30)));
        assert_eq!(inputs[5], ("@object_name".to_string(), SqlValue::text("Load.dtsx")));
        assert_eq!(inputs[6], ("@value_type".to_string(), SqlValue::text("V")));
    }

    #[test]
    fn validate_project_uses_full_validation_defaults() {
        let backend = FakeBackend::new();
        let executor = executor(&backend);
        let procedures = CatalogProcedures::new(&executor, Duration::from_secs(1));

        let id = procedures.validate_project(None, "ETL", "Sales").unwrap();
        assert!(id.is_some());

        let inputs = &backend.calls_to("[catalog].[validate_project]")[0];
        let value = |name: &str| {
            inputs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(value("@validate_type"), Some(SqlValue::text("F")));
        assert_eq!(value("@environment_scope"), Some(SqlValue::text("D")));
        assert_eq!(value("@use32bitruntime"), Some(SqlValue::Bit(false)));
        assert_eq!(value("@reference_id"), Some(SqlValue::Null));
        assert!(backend.events().contains(&Event::Close));
    }

    #[test]
    fn parameter_values_follow_declared_type() {
        assert_eq!(
            parameter_value("P", DataType::Int32, "42").unwrap(),
            SqlValue::Int(42)
        );
        assert_eq!(
            parameter_value("P", DataType::Boolean, "True").unwrap(),
            SqlValue::Bit(true)
        );
        assert_eq!(
            parameter_value("P", DataType::String, " padded ").unwrap(),
            SqlValue::text(" padded ")
        );
        assert_eq!(
            parameter_value("P", DataType::DateTime, "2024-03-01").unwrap(),
            SqlValue::DateTime("2024-03-01T00:00:00.000".to_string())
        );
        assert_eq!(
            parameter_value("P", DataType::Decimal, "-12.50").unwrap(),
            SqlValue::Decimal("-12.50".to_string())
        );
    }

    #[test]
    fn malformed_parameter_value_is_invalid_argument() {
        let err = parameter_value("Project::Port", DataType::Int16, "99999").unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert!(err.message.contains("Project::Port"));
        assert!(parameter_value("P", DataType::Decimal, "1.2.3").is_err());
        assert!(parameter_value("P", DataType::Decimal, "--5").is_err());
        assert!(parameter_value("P", DataType::Decimal, "+-5").is_err());
        assert!(parameter_value("P", DataType::Decimal, "+5").is_ok());
    }
}
