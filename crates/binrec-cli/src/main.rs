use anyhow::{bail, Result};
use binrec_campaign::{FilePermissions, InputFile, LintReport, TraceRef};
use binrec_core::Layout;
use binrec_runner::{s2e_projects, Projects, S2eEngine};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "binrec", version = "0.3.0", about = "binrec campaign manager")]
struct Cli {
    /// Directory holding campaign records and logs.
    #[arg(long, global = true, env = "BINREC_ROOT")]
    root: Option<PathBuf>,
    /// S2E environment directory (default: <root>/s2e).
    #[arg(long, global = true, env = "S2EDIR")]
    s2e_dir: Option<PathBuf>,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an analysis project and its campaign.
    New {
        project: String,
        binary: PathBuf,
        /// Seed the campaign from an existing campaign file.
        #[arg(long)]
        template: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    ListProjects {
        #[arg(long)]
        json: bool,
    },
    AddTrace {
        project: String,
        /// 1-based positions of the symbolic arguments, e.g. "1 3".
        #[arg(short = 's', long = "symbolic-indexes")]
        symbolic_indexes: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        json: bool,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    RemoveTrace {
        project: String,
        #[arg(required_unless_present = "all")]
        trace: Option<String>,
        #[arg(long)]
        id: bool,
        /// Remove every trace.
        #[arg(long, conflicts_with = "trace")]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    SetTraceStdin {
        project: String,
        trace: String,
        /// New stdin content; an empty string clears it.
        stdin: String,
        #[arg(long)]
        id: bool,
        #[arg(long)]
        json: bool,
    },
    AddTraceInputFile {
        project: String,
        trace: String,
        source: PathBuf,
        /// Path relative to the input files directory.
        #[arg(long)]
        destination: Option<PathBuf>,
        /// `preserve`, `default`, or a 3 digit octal mode.
        #[arg(long, default_value = "preserve")]
        permissions: String,
        #[arg(long)]
        id: bool,
        #[arg(long)]
        json: bool,
    },
    RemoveTraceInputFile {
        project: String,
        trace: String,
        filename: PathBuf,
        #[arg(long)]
        id: bool,
        #[arg(long)]
        json: bool,
    },
    /// Append a setup line to a trace, or to the campaign without --trace.
    AddSetup {
        project: String,
        line: String,
        #[arg(long)]
        trace: Option<String>,
        #[arg(long)]
        id: bool,
        #[arg(long)]
        json: bool,
    },
    /// Append a teardown line to a trace, or to the campaign without --trace.
    AddTeardown {
        project: String,
        line: String,
        #[arg(long)]
        trace: Option<String>,
        #[arg(long)]
        id: bool,
        #[arg(long)]
        json: bool,
    },
    /// Run every trace of the campaign through the engine.
    Run {
        project: String,
        #[arg(long)]
        json: bool,
    },
    RunTrace {
        project: String,
        #[arg(required_unless_present = "last")]
        trace: Option<String>,
        #[arg(long)]
        id: bool,
        #[arg(long, conflicts_with = "trace")]
        last: bool,
        #[arg(long)]
        json: bool,
    },
    /// Compare the original and recovered binaries over every trace.
    Validate {
        project: String,
        #[arg(long)]
        json: bool,
    },
    ValidateTrace {
        project: String,
        trace: String,
        #[arg(long)]
        id: bool,
        #[arg(long)]
        json: bool,
    },
    ValidateArgs {
        project: String,
        #[arg(long)]
        json: bool,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    Describe {
        project: String,
        #[arg(long)]
        json: bool,
    },
    ClearTraceData {
        project: String,
        #[arg(long)]
        json: bool,
    },
    /// Check a campaign file, or every campaign file in a directory.
    Lint {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = resolve_layout(cli.root, cli.s2e_dir)
        .and_then(|layout| run_command(s2e_projects(layout), cli.command));
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let (code, details) = error_code_and_details(&err);
                emit_json(&json_error(code, err.to_string(), details));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = if verbose > 0 { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_layout(root: Option<PathBuf>, s2e_dir: Option<PathBuf>) -> Result<Layout> {
    let from_env = Layout::from_env()?;
    let mut layout = Layout::new(root.unwrap_or(from_env.root), s2e_dir);
    layout.engine = from_env.engine;
    layout.shell = from_env.shell;
    debug!(
        root = %layout.root.display(),
        s2e_dir = %layout.s2e_dir.display(),
        engine = %layout.engine,
        "resolved layout"
    );
    Ok(layout)
}

fn run_command(projects: Projects<S2eEngine>, command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::New {
            project,
            binary,
            template,
            json,
        } => {
            let campaign = projects.new_project(&project, &binary, template.as_deref())?;
            let project_dir = projects.layout().project_dir(&project);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "new",
                    "project": project,
                    "project_dir": project_dir.display().to_string(),
                    "campaign_file": projects.store().path(&project).display().to_string(),
                    "traces": campaign.traces.len()
                })));
            }
            println!("project: {}", project);
            println!("project_dir: {}", project_dir.display());
            println!("traces: {}", campaign.traces.len());
        }
        Commands::ListProjects { json } => {
            let names = projects.list_projects()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "list-projects",
                    "projects": names
                })));
            }
            for name in names {
                println!("{}", name);
            }
        }
        Commands::AddTrace {
            project,
            symbolic_indexes,
            name,
            json,
            args,
        } => {
            let indexes = parse_symbolic_indexes(symbolic_indexes.as_deref())?;
            let id = projects.add_trace(&project, &args, &indexes, name)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "add-trace",
                    "project": project,
                    "trace_id": id
                })));
            }
            println!("trace_id: {}", id);
        }
        Commands::RemoveTrace {
            project,
            trace,
            id,
            all,
            json,
        } => {
            let removed = if all {
                projects.clear_traces(&project)?
            } else {
                let reference = trace_ref(trace.as_deref(), id)?;
                projects.remove_trace(&project, &reference)?;
                1
            };
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "remove-trace",
                    "project": project,
                    "removed": removed
                })));
            }
            println!("removed: {}", removed);
        }
        Commands::SetTraceStdin {
            project,
            trace,
            stdin,
            id,
            json,
        } => {
            let reference = trace_ref(Some(&trace), id)?;
            projects.set_trace_stdin(&project, &reference, Some(stdin))?;
            if json {
                return Ok(Some(ok_payload("set-trace-stdin", &project)));
            }
        }
        Commands::AddTraceInputFile {
            project,
            trace,
            source,
            destination,
            permissions,
            id,
            json,
        } => {
            let reference = trace_ref(Some(&trace), id)?;
            let permissions = parse_permissions(&permissions)?;
            let file =
                projects.add_trace_input_file(&project, &reference, &source, destination, permissions)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "add-trace-input-file",
                    "project": project,
                    "input_file": input_file_to_json(&file)
                })));
            }
            println!(
                "{} -> {} [{}]",
                file.source.display(),
                file.resolved_destination().display(),
                file.permissions
            );
        }
        Commands::RemoveTraceInputFile {
            project,
            trace,
            filename,
            id,
            json,
        } => {
            let reference = trace_ref(Some(&trace), id)?;
            let file = projects.remove_trace_input_file(&project, &reference, &filename)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "remove-trace-input-file",
                    "project": project,
                    "input_file": input_file_to_json(&file)
                })));
            }
            println!("removed: {}", file.source.display());
        }
        Commands::AddSetup {
            project,
            line,
            trace,
            id,
            json,
        } => {
            let reference = trace.as_deref().map(|t| trace_ref(Some(t), id)).transpose()?;
            projects.add_setup(&project, reference.as_ref(), &line)?;
            if json {
                return Ok(Some(ok_payload("add-setup", &project)));
            }
        }
        Commands::AddTeardown {
            project,
            line,
            trace,
            id,
            json,
        } => {
            let reference = trace.as_deref().map(|t| trace_ref(Some(t), id)).transpose()?;
            projects.add_teardown(&project, reference.as_ref(), &line)?;
            if json {
                return Ok(Some(ok_payload("add-teardown", &project)));
            }
        }
        Commands::Run { project, json } => {
            let logs = projects.run_campaign(&project)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "project": project,
                    "logs": logs.iter().map(|l| l.display().to_string()).collect::<Vec<_>>()
                })));
            }
            for log in logs {
                println!("log: {}", log.display());
            }
        }
        Commands::RunTrace {
            project,
            trace,
            id,
            last,
            json,
        } => {
            let reference = if last {
                TraceRef::last()
            } else {
                trace_ref(trace.as_deref(), id)?
            };
            let log = projects.run_trace(&project, &reference)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run-trace",
                    "project": project,
                    "log": log.display().to_string()
                })));
            }
            println!("log: {}", log.display());
        }
        Commands::Validate { project, json } => {
            let validated = projects.validate_campaign(&project)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "validate",
                    "project": project,
                    "traces_validated": validated
                })));
            }
            println!("validated {} trace(s)", validated);
        }
        Commands::ValidateTrace {
            project,
            trace,
            id,
            json,
        } => {
            let reference = trace_ref(Some(&trace), id)?;
            projects.validate_trace(&project, &reference)?;
            if json {
                return Ok(Some(ok_payload("validate-trace", &project)));
            }
        }
        Commands::ValidateArgs {
            project,
            json,
            args,
        } => {
            projects.validate_args(&project, &args)?;
            if json {
                return Ok(Some(ok_payload("validate-args", &project)));
            }
        }
        Commands::Describe { project, json } => {
            if json {
                let campaign = projects.load(&project)?;
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "campaign_file": projects.store().path(&project).display().to_string(),
                    "campaign": serde_json::to_value(&campaign)?
                })));
            }
            print!("{}", projects.describe_campaign(&project)?);
        }
        Commands::ClearTraceData { project, json } => {
            let removed = projects.clear_trace_data(&project)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "clear-trace-data",
                    "project": project,
                    "removed": removed.iter().map(|p| p.display().to_string()).collect::<Vec<_>>()
                })));
            }
            for dir in removed {
                println!("removed: {}", dir.display());
            }
        }
        Commands::Lint { path, json } => {
            let reports = projects.lint(&path)?;
            let failed = reports.iter().filter(|r| !r.ok()).count();
            if json {
                if failed > 0 {
                    emit_json(&json_error(
                        "lint_failed",
                        format!("{} campaign file(s) have problems", failed),
                        json!({ "reports": reports }),
                    ));
                    std::process::exit(1);
                }
                return Ok(Some(json!({
                    "ok": true,
                    "command": "lint",
                    "reports": reports
                })));
            }
            print_lint_reports(&reports);
            if failed > 0 {
                bail!("{} campaign file(s) have problems", failed);
            }
        }
    }
    Ok(None)
}

fn trace_ref(value: Option<&str>, force_id: bool) -> Result<TraceRef> {
    let Some(value) = value else {
        bail!("a trace name or id is required");
    };
    match TraceRef::parse(value) {
        TraceRef::ByName(_) if force_id => {
            bail!("--id expects an integer trace id, got '{}'", value)
        }
        reference => Ok(reference),
    }
}

fn parse_symbolic_indexes(raw: Option<&str>) -> Result<Vec<usize>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| anyhow::anyhow!("invalid symbolic index '{}'", s))
        })
        .collect()
}

fn parse_permissions(raw: &str) -> Result<FilePermissions> {
    match raw {
        "preserve" => Ok(FilePermissions::Preserve),
        "default" => Ok(FilePermissions::Default),
        mode => Ok(FilePermissions::parse_mode(mode)?),
    }
}

fn print_lint_reports(reports: &[LintReport]) {
    for report in reports {
        if report.ok() {
            println!("ok: {}", report.path.display());
            continue;
        }
        println!("failed: {}", report.path.display());
        for problem in &report.problems {
            println!("  - {}", problem);
        }
    }
}

fn ok_payload(command: &str, project: &str) -> Value {
    json!({
        "ok": true,
        "command": command,
        "project": project
    })
}

fn input_file_to_json(file: &InputFile) -> Value {
    json!({
        "source": file.source.display().to_string(),
        "destination": file.resolved_destination().display().to_string(),
        "permissions": file.permissions.to_string()
    })
}

fn error_code_and_details(err: &anyhow::Error) -> (&'static str, Value) {
    match err.downcast_ref::<binrec_core::Error>() {
        Some(binrec_core::Error::EngineFailure { log, .. }) => (
            "engine_failure",
            json!({ "log": log.as_ref().map(|l| l.display().to_string()) }),
        ),
        Some(binrec_core::Error::Validation(failure)) => (
            "validation_failure",
            json!({
                "criterion": failure.criterion.as_str(),
                "original": failure.original,
                "lifted": failure.lifted,
                "by_pattern": failure.by_pattern
            }),
        ),
        Some(other) => (other.code(), json!({})),
        None => ("command_failed", json!({})),
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::New { json, .. }
        | Commands::ListProjects { json }
        | Commands::AddTrace { json, .. }
        | Commands::RemoveTrace { json, .. }
        | Commands::SetTraceStdin { json, .. }
        | Commands::AddTraceInputFile { json, .. }
        | Commands::RemoveTraceInputFile { json, .. }
        | Commands::AddSetup { json, .. }
        | Commands::AddTeardown { json, .. }
        | Commands::Run { json, .. }
        | Commands::RunTrace { json, .. }
        | Commands::Validate { json, .. }
        | Commands::ValidateTrace { json, .. }
        | Commands::ValidateArgs { json, .. }
        | Commands::Describe { json, .. }
        | Commands::ClearTraceData { json, .. }
        | Commands::Lint { json, .. } => *json,
    }
}
