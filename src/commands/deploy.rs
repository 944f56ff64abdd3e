use clap::Args;
use etlpack::arguments::{DeployArguments, DeployRequest};
use etlpack::catalog::sqlcmd::{SqlcmdConnector, SqlcmdSettings};
use etlpack::catalog::CatalogTarget;
use etlpack::deploy::{DeployOutput, DeployPipeline};
use etlpack::project::ProjectTool;
use etlpack::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

use crate::commands::{working_folder, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct DeployArgs {
    /// Package file (default: the single package file in the working folder)
    pub package: Option<PathBuf>,

    /// Server hosting the catalog
    #[arg(long)]
    pub server_instance: Option<String>,

    /// Catalog database name (default from config, else SSISDB)
    #[arg(long)]
    pub catalog: Option<String>,

    /// Catalog folder to deploy into; created when missing
    #[arg(long)]
    pub folder: Option<String>,

    /// Project name in the catalog (default: package file name)
    #[arg(long)]
    pub project_name: Option<String>,

    /// Password of the package
    #[arg(long)]
    pub project_password: Option<String>,

    /// Strip sensitive values from the package and set them as catalog parameters
    #[arg(long)]
    pub erase_sensitive_info: bool,

    /// Queue a project validation after deploying
    #[arg(long)]
    pub validate: bool,
}

pub fn run(args: DeployArgs, global: &GlobalArgs) -> CmdResult<DeployOutput> {
    let config = &global.config;
    let arguments = DeployArguments::new(DeployRequest {
        working_folder: working_folder()?,
        package_path: args.package,
        server_instance: args.server_instance,
        catalog: args
            .catalog
            .or_else(|| Some(config.catalog.default_catalog.clone())),
        folder: args.folder,
        project_name: args.project_name,
        project_password: args.project_password,
        erase_sensitive_info: args.erase_sensitive_info,
        validate: args.validate,
    })?;

    let tool = ProjectTool::new(config.project_tool.clone());
    let connector = SqlcmdConnector::new(
        CatalogTarget::new(arguments.server_instance(), arguments.catalog()),
        SqlcmdSettings::from_config(&config.catalog),
    );

    let pipeline = DeployPipeline::new(
        &tool,
        &connector,
        RetryPolicy::from_config(&config.retry),
        global.cancel.clone(),
        Duration::from_secs(config.catalog.command_timeout_secs),
    );
    let output = pipeline.run(&arguments)?;
    Ok((output, 0))
}
