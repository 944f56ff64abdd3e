//! Deploy pipeline: package in, catalog project out.
//!
//! All catalog calls of one run share a single scope. The transaction is
//! committed only after the last call succeeds; any failure rolls it back
//! when the scope is dropped.

use chrono::Utc;
use serde::Serialize;
use std::time::Duration;

use crate::arguments::DeployArguments;
use crate::cancel::CancellationToken;
use crate::catalog::procedures::{parameter_value, CatalogProcedures, ObjectType};
use crate::catalog::{CatalogExecutor, Connector, ExecutionScope};
use crate::error::Result;
use crate::log_status;
use crate::parameters::{split_scoped_name, Parameter};
use crate::project::{self, ProjectLoader};
use crate::protection::{self, PolicyMode, ProtectionLevel};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutput {
    pub project: String,
    pub package_path: String,
    pub server_instance: String,
    pub catalog: String,
    pub folder: String,
    pub folder_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_id: Option<i64>,
    pub protection_level: ProtectionLevel,
    /// Scoped names of the sensitive parameters written to the catalog.
    pub sensitive_parameters: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub deployed_at: String,
}

/// Where a sensitive parameter lives in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParameterTarget {
    object_type: ObjectType,
    object_name: String,
    parameter_name: String,
}

pub struct DeployPipeline<'a> {
    loader: &'a dyn ProjectLoader,
    connector: &'a dyn Connector,
    policy: RetryPolicy,
    cancel: CancellationToken,
    timeout: Duration,
}

impl<'a> DeployPipeline<'a> {
    pub fn new(
        loader: &'a dyn ProjectLoader,
        connector: &'a dyn Connector,
        policy: RetryPolicy,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Self {
        Self {
            loader,
            connector,
            policy,
            cancel,
            timeout,
        }
    }

    pub fn run(&self, args: &DeployArguments) -> Result<DeployOutput> {
        let package_path = project::discover(
            args.working_folder(),
            args.package_path(),
            self.loader.package_extension(),
        )?;
        let project_name = args.project_name_for(&package_path);

        let package = self
            .loader
            .load_from_package(&package_path, args.project_password())?;

        let protection = protection::resolve(
            package.protection_level(),
            None,
            args.project_password(),
            None,
            PolicyMode::Deploy {
                erase_sensitive: args.erase_sensitive_info(),
            },
        )?;
        let stream = package.save_to_bytes(&protection)?;

        let mut warnings = Vec::new();
        let mut assignments = Vec::new();
        if args.erase_sensitive_info() {
            for parameter in package.parameters().iter().filter(|p| p.sensitive) {
                let Some(value) = parameter.value.as_deref() else {
                    continue;
                };
                match target_of(&parameter.name, &project_name) {
                    Some(target) => {
                        let value = parameter_value(&parameter.name, parameter.data_type, value)?;
                        assignments.push((parameter, target, value));
                    }
                    None => warnings.push(unscoped_warning(parameter)),
                }
            }
        }
        for warning in &warnings {
            log_status!("deploy", "Warning: {}", warning);
        }

        let target = self.connector.target();
        log_status!(
            "deploy",
            "Deploying {} to {}/{} on {}",
            project_name,
            target.catalog,
            args.folder(),
            target.server_instance
        );

        let executor = CatalogExecutor::new(self.connector, self.policy.clone(), self.cancel.clone());
        let procedures = CatalogProcedures::new(&executor, self.timeout);
        let mut scope = ExecutionScope::begin(self.connector)?;

        let folder_id = procedures.create_folder(Some(&mut scope), args.folder())?;
        if folder_id.is_none() {
            log_status!("deploy", "Folder '{}' already exists", args.folder());
        }

        let operation_id =
            procedures.deploy_project(Some(&mut scope), args.folder(), &project_name, stream)?;

        let mut sensitive_parameters = Vec::with_capacity(assignments.len());
        for (parameter, target, value) in assignments {
            procedures.set_object_parameter_value(
                Some(&mut scope),
                target.object_type,
                args.folder(),
                &project_name,
                &target.parameter_name,
                value,
                &target.object_name,
            )?;
            sensitive_parameters.push(parameter.name.clone());
        }

        let validation_id = if args.validate() {
            log_status!("deploy", "Queueing validation of {}", project_name);
            procedures.validate_project(Some(&mut scope), args.folder(), &project_name)?
        } else {
            None
        };

        scope.commit()?;

        Ok(DeployOutput {
            project: project_name,
            package_path: package_path.display().to_string(),
            server_instance: args.server_instance().to_string(),
            catalog: args.catalog().to_string(),
            folder: args.folder().to_string(),
            folder_created: folder_id.is_some(),
            folder_id,
            operation_id,
            validation_id,
            protection_level: protection.level,
            sensitive_parameters,
            warnings,
            deployed_at: Utc::now().to_rfc3339(),
        })
    }
}

/// Map "Owner::Leaf" to its catalog object. `None` for unscoped names.
fn target_of(scoped_name: &str, project_name: &str) -> Option<ParameterTarget> {
    let (owner, leaf) = split_scoped_name(scoped_name)?;
    let (object_type, object_name) = if owner.eq_ignore_ascii_case("project") {
        (ObjectType::Project, project_name.to_string())
    } else {
        (ObjectType::Package, owner.to_string())
    };
    Some(ParameterTarget {
        object_type,
        object_name,
        parameter_name: leaf.to_string(),
    })
}

fn unscoped_warning(parameter: &Parameter) -> String {
    format!(
        "Sensitive parameter '{}' has no owner prefix and was not set in the catalog",
        parameter.name
    )
}
