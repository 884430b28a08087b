use binrec_campaign::{Campaign, MatchPolicy, Trace};
use binrec_core::{remove_if_exists, Criterion, Error, Result, ValidationFailure};
use regex::Regex;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::sandbox::materialize_input_files;

/// Name of the hard link both candidates are executed through, so that they
/// see the same `argv[0]`.
pub const ALIAS_NAME: &str = "test-target";
pub const ORIGINAL_NAME: &str = "binary";
pub const LIFTED_NAME: &str = "recovered";

/// How a candidate process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    /// Killed by the given signal number.
    Signaled(i32),
    /// The platform reported neither an exit code nor a signal.
    Unknown,
}

impl Default for Termination {
    fn default() -> Self {
        Termination::Exited(0)
    }
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Termination::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Termination::Signaled(signal);
            }
        }
        Termination::Unknown
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "{}", code),
            Termination::Signaled(signal) => write!(f, "signal {}", signal),
            Termination::Unknown => f.write_str("unknown"),
        }
    }
}

/// Exit status and captured output of one candidate run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub status: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutput {
    pub fn status_label(&self) -> String {
        self.status.to_string()
    }
}

/// Process and filesystem primitives the validator drives.
pub trait Executor {
    type Child;

    fn link(&mut self, target: &Path, alias: &Path) -> Result<()>;
    fn unlink(&mut self, alias: &Path) -> Result<()>;
    /// Run a multi-line shell script in `cwd`, returning its exit code.
    fn run_script(&mut self, script: &str, cwd: &Path) -> Result<Option<i32>>;
    fn spawn(
        &mut self,
        program: &Path,
        args: &[String],
        stdin: Option<&[u8]>,
        cwd: &Path,
    ) -> Result<Self::Child>;
    fn wait(&mut self, child: Self::Child) -> Result<RunOutput>;
}

/// Runs candidates as real child processes. Each hook gets a fresh shell
/// reading the script from stdin (`bash --noprofile` for bash).
#[derive(Debug, Clone)]
pub struct HostExecutor {
    shell: String,
    shell_args: Vec<String>,
}

impl HostExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        let shell = shell.into();
        let shell_args = match Path::new(&shell).file_name().and_then(|n| n.to_str()) {
            Some("bash") => vec!["--noprofile".to_string()],
            _ => Vec::new(),
        };
        Self { shell, shell_args }
    }
}

/// A spawned candidate and the thread feeding its stdin.
#[derive(Debug)]
pub struct HostChild {
    child: Child,
    feeder: Option<JoinHandle<()>>,
}

impl Executor for HostExecutor {
    type Child = HostChild;

    fn link(&mut self, target: &Path, alias: &Path) -> Result<()> {
        fs::hard_link(target, alias).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("executable", target.display()),
            _ => Error::Io(e),
        })
    }

    fn unlink(&mut self, alias: &Path) -> Result<()> {
        fs::remove_file(alias)?;
        Ok(())
    }

    fn run_script(&mut self, script: &str, cwd: &Path) -> Result<Option<i32>> {
        let mut child = Command::new(&self.shell)
            .args(&self.shell_args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(script.as_bytes());
        }
        let output = child.wait_with_output()?;
        if !output.stdout.is_empty() || !output.stderr.is_empty() {
            debug!(
                stdout = %String::from_utf8_lossy(&output.stdout),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "hook output"
            );
        }
        Ok(output.status.code())
    }

    fn spawn(
        &mut self,
        program: &Path,
        args: &[String],
        stdin: Option<&[u8]>,
        cwd: &Path,
    ) -> Result<HostChild> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        let mut child = cmd.spawn()?;
        // Stdin must be fed while `wait` drains stdout and stderr. The pipe
        // closes when the thread ends.
        let feeder = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_vec();
                Some(thread::spawn(move || {
                    // The child may exit without reading its input.
                    let _ = pipe.write_all(&input);
                }))
            }
            _ => None,
        };
        Ok(HostChild { child, feeder })
    }

    fn wait(&mut self, child: HostChild) -> Result<RunOutput> {
        let HostChild { child, feeder } = child;
        let output = child.wait_with_output()?;
        if let Some(feeder) = feeder {
            let _ = feeder.join();
        }
        Ok(RunOutput {
            status: output.status.into(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    LinkAlias,
    RunSetup,
    Spawn,
    Wait,
    Capture,
    UnlinkAlias,
    RunTeardown,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::LinkAlias => "link_alias",
            Step::RunSetup => "run_setup",
            Step::Spawn => "spawn",
            Step::Wait => "wait",
            Step::Capture => "capture",
            Step::UnlinkAlias => "unlink_alias",
            Step::RunTeardown => "run_teardown",
        };
        f.write_str(name)
    }
}

/// Runs the original and the recovered binary of a project back to back and
/// compares what they did.
pub struct Validator<E: Executor> {
    executor: E,
    sandbox: PathBuf,
}

impl<E: Executor> Validator<E> {
    /// `sandbox` holds the `binary` and `recovered` executables; both run with
    /// it as their working directory.
    pub fn new(executor: E, sandbox: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            sandbox: sandbox.into(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn validate(&mut self, campaign: &Campaign, trace: &Trace) -> Result<()> {
        let args = trace.command_line_args();
        info!(project = %campaign.project, trace = trace.display_name(), ?args, "validating trace");

        let stdout_check = StreamCheck::compile(&trace.match_stdout)?;
        let stderr_check = StreamCheck::compile(&trace.match_stderr)?;

        materialize_input_files(trace, &self.sandbox)?;
        let alias = self.sandbox.join(ALIAS_NAME);
        remove_if_exists(&alias)?;

        let setup = campaign.effective_setup(trace).join("\n");
        let teardown = campaign.effective_teardown(trace).join("\n");
        let stdin = trace.stdin.as_deref().map(str::as_bytes);

        let original = self.run_candidate(ORIGINAL_NAME, &alias, &args, stdin, &setup, &teardown)?;
        let lifted = self.run_candidate(LIFTED_NAME, &alias, &args, stdin, &setup, &teardown)?;

        compare_outputs(&stdout_check, &stderr_check, &original, &lifted)?;
        info!(
            project = %campaign.project,
            ?args,
            "output from original and lifted binaries match"
        );
        Ok(())
    }

    fn run_candidate(
        &mut self,
        candidate: &str,
        alias: &Path,
        args: &[String],
        stdin: Option<&[u8]>,
        setup: &str,
        teardown: &str,
    ) -> Result<RunOutput> {
        let target = self.sandbox.join(candidate);

        debug!(candidate, step = %Step::LinkAlias);
        self.executor.link(&target, alias)?;

        self.run_hook(candidate, Step::RunSetup, setup)?;

        debug!(candidate, step = %Step::Spawn, ?args);
        let spawned = self.executor.spawn(alias, args, stdin, &self.sandbox);
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = self.executor.unlink(alias);
                return Err(e);
            }
        };

        debug!(candidate, step = %Step::Wait);
        let waited = self.executor.wait(child);

        debug!(candidate, step = %Step::UnlinkAlias);
        self.executor.unlink(alias)?;
        let output = waited?;
        debug!(
            candidate,
            step = %Step::Capture,
            status = %output.status_label(),
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len()
        );

        self.run_hook(candidate, Step::RunTeardown, teardown)?;
        Ok(output)
    }

    fn run_hook(&mut self, candidate: &str, step: Step, script: &str) -> Result<()> {
        if script.is_empty() {
            return Ok(());
        }
        debug!(candidate, step = %step);
        let status = self.executor.run_script(script, &self.sandbox)?;
        if status != Some(0) {
            warn!(
                candidate,
                step = %step,
                status = ?status,
                "hook exited unsuccessfully; continuing"
            );
        }
        Ok(())
    }
}

/// A stream's match policy with its pattern compiled.
#[derive(Debug, Clone)]
pub enum StreamCheck {
    Off,
    Exact,
    Pattern(String, Regex),
}

impl StreamCheck {
    /// Patterns are anchored at the start of the output.
    pub fn compile(policy: &MatchPolicy) -> Result<Self> {
        match policy {
            MatchPolicy::Off => Ok(StreamCheck::Off),
            MatchPolicy::Exact => Ok(StreamCheck::Exact),
            MatchPolicy::Pattern(p) => Regex::new(&format!(r"\A(?:{})", p))
                .map(|re| StreamCheck::Pattern(p.clone(), re))
                .map_err(|e| Error::invalid(format!("match pattern '{}': {}", p, e))),
        }
    }

    fn check(
        &self,
        criterion: Criterion,
        original: &[u8],
        lifted: &[u8],
    ) -> std::result::Result<(), ValidationFailure> {
        match self {
            StreamCheck::Off => Ok(()),
            StreamCheck::Exact if original == lifted => Ok(()),
            StreamCheck::Exact => Err(ValidationFailure {
                criterion,
                original: String::from_utf8_lossy(original).to_string(),
                lifted: String::from_utf8_lossy(lifted).to_string(),
                by_pattern: false,
            }),
            StreamCheck::Pattern(pattern, re) => {
                let text = String::from_utf8_lossy(lifted);
                if pattern_matches(re, &text) {
                    Ok(())
                } else {
                    Err(ValidationFailure {
                        criterion,
                        original: pattern.clone(),
                        lifted: text.to_string(),
                        by_pattern: true,
                    })
                }
            }
        }
    }
}

/// `$` also matches just before a single trailing newline of the output.
fn pattern_matches(re: &Regex, text: &str) -> bool {
    re.is_match(text) || text.strip_suffix('\n').map_or(false, |t| re.is_match(t))
}

/// Compare exit code first, then stdout, then stderr. A pattern check only
/// looks at the lifted output.
pub fn compare_outputs(
    stdout: &StreamCheck,
    stderr: &StreamCheck,
    original: &RunOutput,
    lifted: &RunOutput,
) -> std::result::Result<(), ValidationFailure> {
    if original.status != lifted.status {
        return Err(ValidationFailure {
            criterion: Criterion::ExitCode,
            original: original.status_label(),
            lifted: lifted.status_label(),
            by_pattern: false,
        });
    }
    stdout.check(Criterion::Stdout, &original.stdout, &lifted.stdout)?;
    stderr.check(Criterion::Stderr, &original.stderr, &lifted.stderr)
}
