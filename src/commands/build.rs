use clap::Args;
use etlpack::arguments::{BuildArguments, BuildRequest};
use etlpack::build::{BuildOutput, BuildPipeline};
use etlpack::project::ProjectTool;
use std::path::PathBuf;

use crate::commands::{working_folder, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct BuildArgs {
    /// Project file (default: the single project file in the working folder)
    pub project: Option<PathBuf>,

    /// Build configuration whose parameter values are applied
    #[arg(long)]
    pub configuration: Option<String>,

    /// Folder for the package (default: <project dir>/bin/<configuration>)
    #[arg(long)]
    pub output_folder: Option<PathBuf>,

    /// Protection level for the package
    #[arg(long)]
    pub protection_level: Option<String>,

    /// Password of the source project
    #[arg(long)]
    pub password: Option<String>,

    /// Password to encrypt the package with
    #[arg(long)]
    pub new_password: Option<String>,

    /// Release-notes file providing version and comments
    #[arg(long)]
    pub release_notes: Option<PathBuf>,

    /// Parameter override, repeatable: --parameter Project::Name value
    #[arg(
        long = "parameter",
        num_args = 2,
        value_names = ["NAME", "VALUE"],
        allow_hyphen_values = true,
        action = clap::ArgAction::Append
    )]
    pub parameters: Vec<String>,
}

pub fn run(args: BuildArgs, global: &GlobalArgs) -> CmdResult<BuildOutput> {
    let arguments = BuildArguments::new(BuildRequest {
        working_folder: working_folder()?,
        project_path: args.project,
        output_folder: args.output_folder,
        configuration: args.configuration,
        protection_level: args.protection_level,
        password: args.password,
        new_password: args.new_password,
        release_notes: args.release_notes,
        parameters: pairs(args.parameters),
    })?;

    let tool = ProjectTool::new(global.config.project_tool.clone());
    let output = BuildPipeline::new(&tool).run(&arguments)?;
    Ok((output, 0))
}

/// Group flat `NAME VALUE NAME VALUE ...` values into pairs.
fn pairs(flat: Vec<String>) -> Vec<(String, String)> {
    let mut iter = flat.into_iter();
    let mut result = Vec::new();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        result.push((name, value));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_values_pair_up_in_order() {
        let flat = vec!["A".to_string(), "1".to_string(), "B".to_string(), "2".to_string()];
        assert_eq!(
            pairs(flat),
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
    }
}
