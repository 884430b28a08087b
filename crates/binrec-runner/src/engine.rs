use binrec_core::{absolute_path, ensure_dir, Error, Layout, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::logs::next_log_name;

/// The external lifting / symbolic execution engine.
pub trait Engine {
    /// Create the engine project for `binary`, returning its directory.
    fn create_project(&self, project: &str, binary: &Path) -> Result<PathBuf>;
    /// Run the project once, returning the log the run wrote to.
    fn run_project(&self, project: &str) -> Result<PathBuf>;
    fn list_projects(&self) -> Result<BTreeSet<String>>;
}

const EXECUTE_SAMPLE_PREFIX: &str = r#"S2E_SYM_ARGS="" LD_PRELOAD="${S2E_SO}" "${TARGET}""#;
const CALL_EXECUTE_PREFIX: &str = r#"execute "${TARGET_PATH}""#;
const PATCH_MARKER: &str =
    "# ~=~=~=~= This bootstrap.sh script has been patched by binrec. =~=~=~=~ #";

const PATCH_LOAD_TRACE_CONFIG: &str = r#"
# binrec patch #
${S2EGET} trace-config.sh
chmod 755 trace-config.sh
source ./trace-config.sh
get_trace_input_files
################
"#;

const PATCH_CALL_EXECUTE: &str = r#"
# binrec patch #
setup_trace
echo -en "${TRACE_STDIN}" | execute "${TARGET_PATH}"
teardown_trace
################
"#;

const PATCH_EXECUTE_SAMPLE: &str = r#"
    # binrec patch #
    LD_PRELOAD="${S2E_SO}" "${TARGET}" "${TRACE_ARGS[@]}" > /dev/null 2> /dev/null
    ################
"#;

/// Rewrite an engine `bootstrap.sh` so the guest sources the trace config
/// script, runs the trace hooks around the sample and feeds it stdin.
pub fn patch_bootstrap(script: &str) -> Result<String> {
    let lines: Vec<&str> = script.split_inclusive('\n').collect();
    let mut execute_sample = None;
    let mut call_execute = None;
    for (i, line) in lines.iter().enumerate() {
        let check = line.trim_start();
        if check.starts_with(EXECUTE_SAMPLE_PREFIX) {
            execute_sample = Some(i);
        } else if check.starts_with(CALL_EXECUTE_PREFIX) {
            call_execute = Some(i);
        } else if check.starts_with(PATCH_MARKER) {
            return Err(Error::invalid(
                "bootstrap script: it has already been patched".to_string(),
            ));
        }
    }
    if call_execute.is_none() {
        return Err(Error::invalid(
            "bootstrap script: it does not call the execute function".to_string(),
        ));
    }
    if execute_sample.is_none() {
        warn!("bootstrap script never executes the sample directly; is the sample statically linked?");
    }

    let mut out = String::with_capacity(script.len() + 512);
    for (i, line) in lines.iter().enumerate() {
        if Some(i) == execute_sample {
            out.push_str(PATCH_EXECUTE_SAMPLE);
        } else if Some(i) == call_execute {
            out.push_str(PATCH_LOAD_TRACE_CONFIG);
            out.push_str(PATCH_CALL_EXECUTE);
        } else {
            out.push_str(line);
        }
    }
    out.push('\n');
    out.push_str(PATCH_MARKER);
    out.push('\n');
    Ok(out)
}

/// Plugin configuration appended to a new project's `s2e-config.lua`.
pub fn plugin_config(project_dir: &Path, input_files_dir: &Path) -> String {
    let project_dir = project_dir.display();
    format!(
        r#"
add_plugin("ELFSelector")
add_plugin("FunctionMonitor")
add_plugin("FunctionLog")
pluginsConfig.FunctionLog = {{
    baseDirs = {{
        "{project_dir}"
    }},
    saveInterval = 1000 -- export every 1000 basic blocks
}}
add_plugin("ExportELF")
pluginsConfig.ExportELF = {{
    baseDirs = {{
        "{project_dir}"
    }},
    exportInterval = 1000 -- export every 1000 basic blocks
}}

table.insert(pluginsConfig.HostFiles.baseDirs, "{input_files}")
"#,
        project_dir = project_dir,
        input_files = input_files_dir.display()
    )
}

/// Drives the `s2e` command line tool as a subprocess.
#[derive(Debug, Clone)]
pub struct S2eEngine {
    layout: Layout,
}

impl S2eEngine {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.layout.engine);
        cmd.env("S2EDIR", &self.layout.s2e_dir);
        cmd
    }

    fn run_logged(&self, mut cmd: Command, log: &Path, what: String) -> Result<()> {
        if let Some(parent) = log.parent() {
            ensure_dir(parent)?;
        }
        let file = fs::File::create(log)?;
        cmd.stdout(Stdio::from(file.try_clone()?))
            .stderr(Stdio::from(file))
            .stdin(Stdio::null());
        debug!(?cmd, log = %log.display(), "running engine");
        let status = cmd.status().map_err(|e| Error::EngineFailure {
            message: format!("{}: could not start {}: {}", what, self.layout.engine, e),
            log: None,
        })?;
        if !status.success() {
            return Err(Error::EngineFailure {
                message: what,
                log: Some(log.to_path_buf()),
            });
        }
        Ok(())
    }

    fn finish_project(&self, project: &str, binary: &Path) -> Result<()> {
        let project_dir = self.layout.project_dir(project);
        let input_files = self.layout.input_files_dir(project);
        ensure_dir(&input_files)?;
        link_binary(binary, &self.layout.project_binary(project))?;

        let mut config = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(project_dir.join("s2e-config.lua"))?;
        config.write_all(plugin_config(&project_dir, &input_files).as_bytes())?;

        let bootstrap_path = project_dir.join("bootstrap.sh");
        let bootstrap = fs::read_to_string(&bootstrap_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("bootstrap script", bootstrap_path.display()),
            _ => Error::Io(e),
        })?;
        fs::write(&bootstrap_path, patch_bootstrap(&bootstrap)?)?;
        Ok(())
    }
}

impl Engine for S2eEngine {
    fn create_project(&self, project: &str, binary: &Path) -> Result<PathBuf> {
        let project_dir = self.layout.project_dir(project);
        if project_dir.exists() {
            return Err(Error::AlreadyExists(project_dir));
        }
        let binary = absolute_path(binary)?;
        info!(project, binary = %binary.display(), "creating engine project");

        let mut cmd = self.command();
        cmd.args(["new_project", "--name", project]).arg(&binary);
        let log = self
            .layout
            .logs_dir()
            .join(format!("new_project-{}.log", project));
        self.run_logged(
            cmd,
            &log,
            format!("s2e new_project failed for project: {}", project),
        )?;

        self.finish_project(project, &binary)?;
        Ok(project_dir)
    }

    fn run_project(&self, project: &str) -> Result<PathBuf> {
        let project_dir = self.layout.project_dir(project);
        if !project_dir.is_dir() {
            return Err(Error::not_found("engine project", project));
        }
        let log = next_log_name(&project_dir)?;
        info!(project, log = %log.display(), "running engine project");

        let mut cmd = self.command();
        cmd.args(["run", "--no-tui", project]);
        self.run_logged(cmd, &log, format!("s2e run failed for project: {}", project))?;
        Ok(log)
    }

    fn list_projects(&self) -> Result<BTreeSet<String>> {
        let mut cmd = self.command();
        cmd.arg("info");
        let output = cmd.output().map_err(|e| Error::EngineFailure {
            message: format!("could not start {}: {}", self.layout.engine, e),
            log: None,
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::EngineFailure {
                message: format!("s2e info failed: {}", stderr.trim()),
                log: None,
            });
        }
        let info: Value = serde_json::from_slice(&output.stdout)?;
        Ok(info
            .get("projects")
            .and_then(Value::as_object)
            .map(|projects| projects.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(unix)]
fn link_binary(binary: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(binary, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn link_binary(binary: &Path, link: &Path) -> Result<()> {
    fs::copy(binary, link)?;
    Ok(())
}
