pub type CmdResult<T> = airlift::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

pub mod addresses;
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
) -> (airlift::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Addresses(args) => dispatch!(args, global, addresses),
    }
}
