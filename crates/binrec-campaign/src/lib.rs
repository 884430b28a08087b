mod lint;
mod model;
mod resolve;
mod schema;
mod script;
mod store;

pub use lint::{lint_file, lint_path, LintReport};
pub use model::{
    create_trace_args, ArgKind, Campaign, FilePermissions, InputFile, MatchPolicy, Trace,
    TraceArg, DEFAULT_SYMBOLIC_ARG_VALUE,
};
pub use resolve::{resolve, resolve_index, TraceRef};
pub use schema::{compile_schema, schema_names, validate_campaign_document, CAMPAIGN_SCHEMA};
pub use script::render_trace_config;
pub use store::{
    campaign_from_document, load_template, validate_project_name, CampaignLock, CampaignStore,
};
