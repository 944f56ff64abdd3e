use etlpack::cancel::CancellationToken;
use etlpack::defaults::EtlpackConfig;

pub type CmdResult<T> = etlpack::Result<(T, i32)>;

/// Process-wide state handed to every command.
pub(crate) struct GlobalArgs {
    pub config: EtlpackConfig,
    pub cancel: CancellationToken,
}

/// Working folder for a run: the current directory.
pub(crate) fn working_folder() -> etlpack::Result<std::path::PathBuf> {
    std::env::current_dir().map_err(|e| {
        etlpack::Error::internal_io(e.to_string(), Some("resolve working folder".to_string()))
    })
}

pub mod build;
pub mod deploy;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (etlpack::Result<serde_json::Value>, i32) {
    crate::tty::status("etlpack is working...");

    match command {
        crate::Commands::Build(args) => dispatch!(args, global, build),
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
    }
}
