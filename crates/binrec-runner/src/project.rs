use binrec_campaign::{
    create_trace_args, lint_path, load_template, render_trace_config, validate_project_name,
    Campaign, CampaignStore, FilePermissions, InputFile, LintReport, Trace, TraceArg, TraceRef,
};
use binrec_core::{absolute_path, atomic_write_bytes, ensure_dir, Error, Layout, Result};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::engine::Engine;
use crate::sandbox::stage_input_files;
use crate::validate::{Executor, HostExecutor, Validator};

/// Which hook list a setup/teardown line is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Setup,
    Teardown,
}

/// Project-level operations: every mutation is a locked load, mutate, save
/// cycle against the campaign store; every read loads the record fresh.
pub struct Projects<E: Engine> {
    layout: Layout,
    store: CampaignStore,
    engine: E,
}

impl<E: Engine> Projects<E> {
    pub fn new(layout: Layout, engine: E) -> Self {
        let store = CampaignStore::for_layout(&layout);
        Self {
            layout,
            store,
            engine,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn store(&self) -> &CampaignStore {
        &self.store
    }

    pub fn load(&self, project: &str) -> Result<Campaign> {
        self.store.load(project)
    }

    fn mutate<T>(&self, project: &str, f: impl FnOnce(&mut Campaign) -> Result<T>) -> Result<T> {
        let _lock = self.store.lock(project)?;
        let mut campaign = self.store.load(project)?;
        let out = f(&mut campaign)?;
        self.store.save(&campaign)?;
        Ok(out)
    }

    /// Create the engine project and its campaign record, optionally seeding
    /// the campaign from a template campaign file.
    pub fn new_project(
        &self,
        project: &str,
        binary: &Path,
        template: Option<&Path>,
    ) -> Result<Campaign> {
        validate_project_name(project)?;
        let _lock = self.store.lock(project)?;
        if self.store.exists(project) {
            return Err(Error::AlreadyExists(self.store.path(project)));
        }
        let project_dir = self.layout.project_dir(project);
        if project_dir.exists() {
            return Err(Error::AlreadyExists(project_dir));
        }
        let binary = absolute_path(binary)?;
        if !binary.is_file() {
            return Err(Error::not_found("binary", binary.display()));
        }
        let campaign = match template {
            Some(path) => load_template(path, project, &binary)?,
            None => Campaign::new(project, binary.clone()),
        };

        self.engine.create_project(project, &binary)?;
        self.store.save(&campaign)?;
        info!(project, binary = %binary.display(), traces = campaign.traces.len(), "created project");
        Ok(campaign)
    }

    pub fn list_projects(&self) -> Result<BTreeSet<String>> {
        self.engine.list_projects()
    }

    /// Append a trace and return its id.
    pub fn add_trace(
        &self,
        project: &str,
        args: &[String],
        symbolic_indexes: &[usize],
        name: Option<String>,
    ) -> Result<usize> {
        let trace_args = create_trace_args(args, symbolic_indexes)?;
        let id = self.mutate(project, |campaign| {
            Ok(campaign.add_trace(Trace::new(trace_args).named(name)))
        })?;
        info!(project, id, ?args, ?symbolic_indexes, "added trace");
        Ok(id)
    }

    pub fn remove_trace(&self, project: &str, reference: &TraceRef) -> Result<Trace> {
        let removed = self.mutate(project, |campaign| campaign.remove_trace(reference))?;
        info!(project, trace = %reference, "removed trace");
        Ok(removed)
    }

    /// Remove every trace, returning how many were removed.
    pub fn clear_traces(&self, project: &str) -> Result<usize> {
        let removed = self.mutate(project, |campaign| {
            let n = campaign.traces.len();
            campaign.clear_traces();
            Ok(n)
        })?;
        info!(project, removed, "removed all traces");
        Ok(removed)
    }

    pub fn set_trace_stdin(
        &self,
        project: &str,
        reference: &TraceRef,
        stdin: Option<String>,
    ) -> Result<()> {
        self.mutate(project, |campaign| {
            let (_, trace) = campaign.trace_mut(reference)?;
            trace.stdin = stdin.filter(|s| !s.is_empty());
            Ok(())
        })?;
        info!(project, trace = %reference, "updated trace stdin");
        Ok(())
    }

    pub fn add_trace_input_file(
        &self,
        project: &str,
        reference: &TraceRef,
        source: &Path,
        destination: Option<PathBuf>,
        permissions: FilePermissions,
    ) -> Result<InputFile> {
        let mut file = InputFile::new(absolute_path(source)?, destination, permissions)?;
        file.check_source(None)?;
        let added = file.clone();
        self.mutate(project, |campaign| {
            let (_, trace) = campaign.trace_mut(reference)?;
            trace.input_files.push(file);
            Ok(())
        })?;
        info!(
            project,
            trace = %reference,
            source = %added.source.display(),
            dest = %added.resolved_destination().display(),
            "added input file"
        );
        Ok(added)
    }

    pub fn remove_trace_input_file(
        &self,
        project: &str,
        reference: &TraceRef,
        filename: &Path,
    ) -> Result<InputFile> {
        let removed = self.mutate(project, |campaign| {
            let (_, trace) = campaign.trace_mut(reference)?;
            trace.remove_input_file(filename)
        })?;
        info!(project, trace = %reference, source = %removed.source.display(), "removed input file");
        Ok(removed)
    }

    /// Append a hook line to a trace, or to the campaign when no trace is
    /// referenced.
    pub fn add_hook(
        &self,
        project: &str,
        reference: Option<&TraceRef>,
        hook: Hook,
        line: &str,
    ) -> Result<()> {
        self.mutate(project, |campaign| {
            let lines = match reference {
                Some(reference) => {
                    let (_, trace) = campaign.trace_mut(reference)?;
                    match hook {
                        Hook::Setup => &mut trace.setup,
                        Hook::Teardown => &mut trace.teardown,
                    }
                }
                None => match hook {
                    Hook::Setup => &mut campaign.setup,
                    Hook::Teardown => &mut campaign.teardown,
                },
            };
            lines.push(line.to_string());
            Ok(())
        })?;
        let target = reference
            .map(|r| r.to_string())
            .unwrap_or_else(|| "<campaign>".to_string());
        info!(project, trace = %target, ?hook, line, "added hook line");
        Ok(())
    }

    pub fn add_setup(&self, project: &str, reference: Option<&TraceRef>, line: &str) -> Result<()> {
        self.add_hook(project, reference, Hook::Setup, line)
    }

    pub fn add_teardown(
        &self,
        project: &str,
        reference: Option<&TraceRef>,
        line: &str,
    ) -> Result<()> {
        self.add_hook(project, reference, Hook::Teardown, line)
    }

    /// Run every trace through the engine in order, returning the run logs.
    pub fn run_campaign(&self, project: &str) -> Result<Vec<PathBuf>> {
        let campaign = self.store.load(project)?;
        let mut logs = Vec::with_capacity(campaign.traces.len());
        for trace in &campaign.traces {
            logs.push(self.run_loaded(&campaign, trace)?);
        }
        Ok(logs)
    }

    pub fn run_trace(&self, project: &str, reference: &TraceRef) -> Result<PathBuf> {
        let campaign = self.store.load(project)?;
        let (_, trace) = campaign.trace(reference)?;
        self.run_loaded(&campaign, trace)
    }

    fn run_loaded(&self, campaign: &Campaign, trace: &Trace) -> Result<PathBuf> {
        let project = campaign.project.as_str();
        stage_input_files(trace, &self.layout.input_files_dir(project))?;
        let script = render_trace_config(campaign, trace)?;
        atomic_write_bytes(&self.layout.trace_config_file(project), script.as_bytes())?;
        info!(project, trace = trace.display_name(), "running trace");
        self.engine.run_project(project)
    }

    fn validator(&self, project: &str) -> Validator<HostExecutor> {
        Validator::new(
            HostExecutor::new(self.layout.shell.clone()),
            self.layout.merged_dir(project),
        )
    }

    /// Validate every trace in order, stopping at the first failure.
    /// Returns how many traces were validated.
    pub fn validate_campaign(&self, project: &str) -> Result<usize> {
        let mut validator = self.validator(project);
        self.validate_campaign_with(project, &mut validator)
    }

    pub fn validate_campaign_with<X: Executor>(
        &self,
        project: &str,
        validator: &mut Validator<X>,
    ) -> Result<usize> {
        let campaign = self.store.load(project)?;
        for trace in &campaign.traces {
            validator.validate(&campaign, trace)?;
        }
        Ok(campaign.traces.len())
    }

    pub fn validate_trace(&self, project: &str, reference: &TraceRef) -> Result<()> {
        let campaign = self.store.load(project)?;
        let (_, trace) = campaign.trace(reference)?;
        self.validator(project).validate(&campaign, trace)
    }

    /// Validate against an ad hoc, all concrete argument list.
    pub fn validate_args(&self, project: &str, args: &[String]) -> Result<()> {
        let campaign = self.store.load(project)?;
        let trace = Trace::new(args.iter().cloned().map(TraceArg::Concrete).collect());
        self.validator(project).validate(&campaign, &trace)
    }

    pub fn describe_campaign(&self, project: &str) -> Result<String> {
        let campaign = self.store.load(project)?;
        Ok(describe(&campaign, &self.store.path(project)))
    }

    /// Delete the engine's per-run trace directories and the merged sandbox.
    pub fn clear_trace_data(&self, project: &str) -> Result<Vec<PathBuf>> {
        let mut removed = self.layout.trace_dirs(project)?;
        let merged = self.layout.merged_dir(project);
        if merged.is_dir() {
            removed.push(merged);
        }
        for dir in &removed {
            debug!(dir = %dir.display(), "deleting trace directory");
            fs::remove_dir_all(dir)?;
        }
        info!(project, removed = removed.len(), "cleared trace data");
        Ok(removed)
    }

    pub fn lint(&self, path: &Path) -> Result<Vec<LintReport>> {
        lint_path(path)
    }

    /// Make sure the campaign record directory exists.
    pub fn init(&self) -> Result<()> {
        ensure_dir(&self.layout.campaigns_dir())
    }
}

fn describe(campaign: &Campaign, record: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", campaign.project);
    let _ = writeln!(out, "{}", "=".repeat(campaign.project.chars().count()));
    let _ = writeln!(out, "Campaign File: {}", record.display());
    let _ = writeln!(out, "Sample Binary: {}", campaign.binary.display());
    write_lines(&mut out, "Global Setup", &campaign.setup, "  ");
    write_lines(&mut out, "Global Teardown", &campaign.teardown, "  ");

    let _ = writeln!(out, "Traces ({}):", campaign.traces.len());
    for (id, trace) in campaign.traces.iter().enumerate() {
        let name = trace.name.as_deref().unwrap_or("(anonymous trace)");
        let _ = writeln!(out, "  {}", name);
        let _ = writeln!(out, "  {}", "-".repeat(name.chars().count()));
        let _ = writeln!(out, "  Id: {}", id);
        let _ = writeln!(out, "  Command Line Arguments: {:?}", trace.command_line_args());
        let symbolic = trace
            .symbolic_indexes()
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "  Symbolic Indexes: {}", symbolic);

        if !trace.input_files.is_empty() {
            let _ = writeln!(out, "  Input Files ({}):", trace.input_files.len());
            for file in &trace.input_files {
                let _ = writeln!(out, "    {}", file.source.display());
                if let Some(dest) = &file.destination {
                    let _ = writeln!(out, "      Destination: {}", dest.display());
                }
                let note = match file.permissions {
                    FilePermissions::Preserve => "Preserve source permissions".to_string(),
                    FilePermissions::Default => "Use default permissions".to_string(),
                    FilePermissions::Mode(m) => format!("chmod {:03o}", m),
                };
                let _ = writeln!(out, "      [{}]", note);
            }
        }

        if !trace.setup.is_empty() {
            write_lines(&mut out, "  Setup", &trace.setup, "    ");
        } else if !campaign.setup.is_empty() {
            out.push_str("  [Inherit global setup]\n");
        }
        if !trace.teardown.is_empty() {
            write_lines(&mut out, "  Teardown", &trace.teardown, "    ");
        } else if !campaign.teardown.is_empty() {
            out.push_str("  [Inherit global teardown]\n");
        }
        let _ = writeln!(out, "  Stdout: {}", trace.match_stdout);
        let _ = writeln!(out, "  Stderr: {}", trace.match_stderr);

        if let Some(stdin) = &trace.stdin {
            out.push_str("  stdin:\n");
            for line in stdin.lines() {
                let _ = writeln!(out, "    {}", line);
            }
        }
        out.push('\n');
    }
    out
}

fn write_lines(out: &mut String, title: &str, lines: &[String], indent: &str) {
    if lines.is_empty() {
        return;
    }
    let _ = writeln!(out, "{} ({}):", title, lines.len());
    for line in lines {
        let _ = writeln!(out, "{}{}", indent, line);
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{RunOutput, Termination};
    use binrec_core::{Criterion, ValidationFailure};
    use chrono::Utc;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Records engine calls; runs fail for projects listed in `failing`.
    #[derive(Default)]
    struct FakeEngine {
        layout: Option<Layout>,
        created: RefCell<Vec<String>>,
        runs: RefCell<Vec<String>>,
        failing: Vec<String>,
    }

    impl Engine for FakeEngine {
        fn create_project(&self, project: &str, _binary: &Path) -> Result<PathBuf> {
            self.created.borrow_mut().push(project.to_string());
            let dir = match &self.layout {
                Some(layout) => layout.project_dir(project),
                None => PathBuf::from(project),
            };
            ensure_dir(&dir)?;
            Ok(dir)
        }

        fn run_project(&self, project: &str) -> Result<PathBuf> {
            self.runs.borrow_mut().push(project.to_string());
            let log = PathBuf::from(format!("/logs/{}/s2e-out-0.log", project));
            if self.failing.iter().any(|p| p == project) {
                return Err(Error::EngineFailure {
                    message: format!("s2e run failed for project: {}", project),
                    log: Some(log),
                });
            }
            Ok(log)
        }

        fn list_projects(&self) -> Result<BTreeSet<String>> {
            Ok(self.created.borrow().iter().cloned().collect())
        }
    }

    struct Fixture {
        root: PathBuf,
        projects: Projects<FakeEngine>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    fn fixture(tag: &str, failing: &[&str]) -> Fixture {
        let root = std::env::temp_dir().join(format!(
            "binrec_projects_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("root");
        fs::write(root.join("sample"), b"\x7fELF").expect("sample binary");
        let layout = Layout::new(&root, None);
        let engine = FakeEngine {
            layout: Some(layout.clone()),
            failing: failing.iter().map(|s| s.to_string()).collect(),
            ..FakeEngine::default()
        };
        Fixture {
            projects: Projects::new(layout, engine),
            root,
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_project_saves_campaign_and_refuses_duplicates() {
        let fx = fixture("new", &[]);
        let sample = fx.root.join("sample");
        let campaign = fx.projects.new_project("cat", &sample, None).expect("new");
        assert_eq!(campaign.binary, sample);
        assert!(fx.projects.store().exists("cat"));
        assert_eq!(
            fx.projects.list_projects().expect("list").into_iter().collect::<Vec<_>>(),
            vec!["cat".to_string()]
        );
        assert!(matches!(
            fx.projects.new_project("cat", &sample, None),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            fx.projects.new_project("dog", &fx.root.join("missing"), None),
            Err(Error::NotFound { .. })
        ));
        assert!(fx.projects.new_project("../escape", &sample, None).is_err());
    }

    #[test]
    fn new_project_from_template_keeps_traces() {
        let fx = fixture("template", &[]);
        let template = fx.root.join("template.json");
        fs::write(
            &template,
            r#"{"setup":["touch x"],"traces":[{"name":"t","args":["a",{"kind":"symbolic","value":"b"}]}]}"#,
        )
        .expect("template");
        let campaign = fx
            .projects
            .new_project("cat", &fx.root.join("sample"), Some(&template))
            .expect("new");
        assert_eq!(campaign.setup, strings(&["touch x"]));
        assert_eq!(campaign.traces[0].symbolic_indexes(), vec![2]);
        assert_eq!(fx.projects.load("cat").expect("load"), campaign);
    }

    #[test]
    fn trace_mutations_are_persisted() {
        let fx = fixture("mutate", &[]);
        let p = &fx.projects;
        p.new_project("cat", &fx.root.join("sample"), None).expect("new");

        assert_eq!(p.add_trace("cat", &strings(&["-n", "x"]), &[2], Some("first".into())).expect("add"), 0);
        assert_eq!(p.add_trace("cat", &strings(&["-e"]), &[], None).expect("add"), 1);
        assert!(p.add_trace("cat", &strings(&["-e"]), &[2], None).is_err());

        p.set_trace_stdin("cat", &TraceRef::parse("first"), Some("input\n".into()))
            .expect("stdin");
        p.add_setup("cat", None, "touch global").expect("global setup");
        p.add_teardown("cat", Some(&TraceRef::last()), "rm out").expect("trace teardown");

        let data = fx.root.join("data.txt");
        fs::write(&data, "payload").expect("data");
        let added = p
            .add_trace_input_file("cat", &TraceRef::ByIndex(0), &data, Some("conf/data.txt".into()), FilePermissions::Mode(0o644))
            .expect("input file");
        assert_eq!(added.resolved_destination(), PathBuf::from("input_files/conf/data.txt"));
        assert!(matches!(
            p.add_trace_input_file("cat", &TraceRef::ByIndex(0), &fx.root.join("nope"), None, FilePermissions::Preserve),
            Err(Error::NotFound { .. })
        ));

        let campaign = p.load("cat").expect("load");
        assert_eq!(campaign.setup, strings(&["touch global"]));
        assert_eq!(campaign.traces[0].stdin.as_deref(), Some("input\n"));
        assert_eq!(campaign.traces[1].teardown, strings(&["rm out"]));
        assert_eq!(campaign.traces[0].input_files.len(), 1);

        p.remove_trace_input_file("cat", &TraceRef::ByIndex(0), Path::new("data.txt"))
            .expect("remove input");
        let removed = p.remove_trace("cat", &TraceRef::ByIndex(-2)).expect("remove");
        assert_eq!(removed.name.as_deref(), Some("first"));
        assert_eq!(p.load("cat").expect("load").traces.len(), 1);
        assert_eq!(p.clear_traces("cat").expect("clear"), 1);
        assert!(p.load("cat").expect("load").traces.is_empty());
        assert!(matches!(
            p.remove_trace("cat", &TraceRef::ByIndex(0)),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn mutations_fail_while_the_project_is_locked() {
        let fx = fixture("locked", &[]);
        fx.projects
            .new_project("cat", &fx.root.join("sample"), None)
            .expect("new");
        let _held = fx.projects.store().lock("cat").expect("lock");
        assert!(matches!(
            fx.projects.add_trace("cat", &[], &[], None),
            Err(Error::Locked { .. })
        ));
    }

    #[test]
    fn run_trace_writes_config_and_stages_inputs() {
        let fx = fixture("run", &["broken"]);
        let p = &fx.projects;
        p.new_project("cat", &fx.root.join("sample"), None).expect("new");
        p.add_trace("cat", &strings(&["a b"]), &[1], None).expect("add");
        let data = fx.root.join("data.txt");
        fs::write(&data, "payload").expect("data");
        p.add_trace_input_file("cat", &TraceRef::last(), &data, None, FilePermissions::Default)
            .expect("input");

        let log = p.run_trace("cat", &TraceRef::last()).expect("run");
        assert_eq!(log, PathBuf::from("/logs/cat/s2e-out-0.log"));
        let script = fs::read_to_string(p.layout().trace_config_file("cat")).expect("config");
        assert!(script.contains("export S2E_SYM_ARGS=1\n"), "{}", script);
        assert!(script.contains("export TRACE_ARGS=('a b')\n"), "{}", script);
        assert!(p.layout().input_files_dir("cat").join("data.txt").is_file());
        assert_eq!(p.run_campaign("cat").expect("run all").len(), 1);
        assert_eq!(p.engine.runs.borrow().len(), 2);

        let mut broken = p.load("cat").expect("load");
        broken.project = "broken".to_string();
        p.store().save(&broken).expect("save broken");
        ensure_dir(&p.layout().project_dir("broken")).expect("broken dir");
        let err = p.run_campaign("broken").expect_err("engine failure");
        assert!(err.to_string().contains("s2e-out-0.log"), "{}", err);
    }

    #[test]
    fn describe_reports_hooks_and_policies() {
        let fx = fixture("describe", &[]);
        let p = &fx.projects;
        p.new_project("cat", &fx.root.join("sample"), None).expect("new");
        p.add_setup("cat", None, "touch global").expect("setup");
        p.add_trace("cat", &strings(&["-n", "x"]), &[2], Some("numbered".into()))
            .expect("add");
        p.set_trace_stdin("cat", &TraceRef::ByIndex(0), Some("one\ntwo".into()))
            .expect("stdin");
        let text = p.describe_campaign("cat").expect("describe");
        assert!(text.starts_with("cat\n===\n"), "{}", text);
        assert!(text.contains("Global Setup (1):\n  touch global\n"));
        assert!(text.contains("  numbered\n  --------\n  Id: 0\n"));
        assert!(text.contains("  Command Line Arguments: [\"-n\", \"x\"]\n"));
        assert!(text.contains("  Symbolic Indexes: 2\n"));
        assert!(text.contains("  [Inherit global setup]\n"));
        assert!(!text.contains("Inherit global teardown"));
        assert!(text.contains("  stdin:\n    one\n    two\n"));
    }

    #[test]
    fn clear_trace_data_removes_runs_and_sandbox() {
        let fx = fixture("clear", &[]);
        let p = &fx.projects;
        p.new_project("cat", &fx.root.join("sample"), None).expect("new");
        let dir = p.layout().project_dir("cat");
        ensure_dir(&dir.join("s2e-out-0")).expect("run 0");
        ensure_dir(&dir.join("s2e-out-1")).expect("run 1");
        ensure_dir(&p.layout().merged_dir("cat")).expect("merged");
        fs::write(dir.join("s2e-out-0.log"), "log").expect("log");

        let removed = p.clear_trace_data("cat").expect("clear");
        assert_eq!(removed.len(), 3);
        assert!(!dir.join("s2e-out-0").exists());
        assert!(!p.layout().merged_dir("cat").exists());
        assert!(dir.join("s2e-out-0.log").exists(), "logs are kept");
    }

    /// Replays canned outputs and counts spawns.
    struct ScriptedExecutor {
        outputs: VecDeque<RunOutput>,
        spawned: usize,
    }

    impl Executor for ScriptedExecutor {
        type Child = RunOutput;

        fn link(&mut self, _target: &Path, _alias: &Path) -> Result<()> {
            Ok(())
        }

        fn unlink(&mut self, _alias: &Path) -> Result<()> {
            Ok(())
        }

        fn run_script(&mut self, _script: &str, _cwd: &Path) -> Result<Option<i32>> {
            Ok(Some(0))
        }

        fn spawn(
            &mut self,
            _program: &Path,
            _args: &[String],
            _stdin: Option<&[u8]>,
            _cwd: &Path,
        ) -> Result<RunOutput> {
            self.spawned += 1;
            Ok(self.outputs.pop_front().unwrap_or_default())
        }

        fn wait(&mut self, child: RunOutput) -> Result<RunOutput> {
            Ok(child)
        }
    }

    #[test]
    fn validate_campaign_stops_at_first_failing_trace() {
        let fx = fixture("validate", &[]);
        let p = &fx.projects;
        p.new_project("cat", &fx.root.join("sample"), None).expect("new");
        for _ in 0..3 {
            p.add_trace("cat", &[], &[], None).expect("add");
        }
        let out = |s: &str| RunOutput {
            status: Termination::Exited(0),
            stdout: s.as_bytes().to_vec(),
            stderr: Vec::new(),
        };
        let executor = ScriptedExecutor {
            outputs: vec![out("a"), out("a"), out("b"), out("B"), out("c"), out("c")].into(),
            spawned: 0,
        };
        let sandbox = p.layout().merged_dir("cat");
        ensure_dir(&sandbox).expect("sandbox");
        let mut validator = Validator::new(executor, sandbox);
        let err = p
            .validate_campaign_with("cat", &mut validator)
            .expect_err("second trace differs");
        assert!(matches!(
            err,
            Error::Validation(ValidationFailure {
                criterion: Criterion::Stdout,
                ..
            })
        ));
        assert_eq!(validator.executor().spawned, 4);
    }
}
