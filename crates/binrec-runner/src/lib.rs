mod engine;
mod logs;
mod project;
mod sandbox;
mod validate;

pub use engine::{patch_bootstrap, plugin_config, Engine, S2eEngine};
pub use logs::next_log_name;
pub use project::{Hook, Projects};
pub use sandbox::{materialize_input_files, stage_input_files};
pub use validate::{
    compare_outputs, Executor, HostChild, HostExecutor, RunOutput, Step, StreamCheck, Termination,
    Validator, ALIAS_NAME, LIFTED_NAME, ORIGINAL_NAME,
};

use binrec_core::Layout;

/// Project operations backed by the `s2e` command line tool.
pub fn s2e_projects(layout: Layout) -> Projects<S2eEngine> {
    Projects::new(layout.clone(), S2eEngine::new(layout))
}
