use binrec_core::{Error, Result, INPUT_FILES_DIRNAME};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::resolve::{resolve_index, TraceRef};

/// Value handed to the binary for a symbolic argument that has no value.
pub const DEFAULT_SYMBOLIC_ARG_VALUE: &str = "0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    #[default]
    Concrete,
    Symbolic,
}

/// One command-line argument of a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTraceArg", into = "TaggedArg")]
pub enum TraceArg {
    Concrete(String),
    Symbolic(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTraceArg {
    Plain(String),
    Tagged(TaggedArg),
}

#[derive(Clone, Serialize, Deserialize)]
struct TaggedArg {
    #[serde(default, alias = "arg_type")]
    kind: ArgKind,
    #[serde(default)]
    value: String,
}

impl From<RawTraceArg> for TraceArg {
    fn from(raw: RawTraceArg) -> Self {
        match raw {
            RawTraceArg::Plain(value) => TraceArg::Concrete(value),
            RawTraceArg::Tagged(tagged) => TraceArg::new(tagged.kind, tagged.value),
        }
    }
}

impl From<TraceArg> for TaggedArg {
    fn from(arg: TraceArg) -> Self {
        let kind = arg.kind();
        let value = match arg {
            TraceArg::Concrete(v) | TraceArg::Symbolic(v) => v,
        };
        TaggedArg { kind, value }
    }
}

impl TraceArg {
    pub fn new(kind: ArgKind, value: impl Into<String>) -> Self {
        match kind {
            ArgKind::Concrete => TraceArg::Concrete(value.into()),
            ArgKind::Symbolic => TraceArg::Symbolic(value.into()),
        }
    }

    pub fn kind(&self) -> ArgKind {
        match self {
            TraceArg::Concrete(_) => ArgKind::Concrete,
            TraceArg::Symbolic(_) => ArgKind::Symbolic,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            TraceArg::Concrete(v) | TraceArg::Symbolic(v) => v,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, TraceArg::Symbolic(_))
    }

    /// The value placed on the command line when the binary is executed.
    pub fn concrete_value(&self) -> &str {
        match self {
            TraceArg::Symbolic(v) if v.is_empty() => DEFAULT_SYMBOLIC_ARG_VALUE,
            TraceArg::Concrete(v) | TraceArg::Symbolic(v) => v,
        }
    }
}

/// Build trace arguments from raw values, marking the 1-based positions in
/// `symbolic_indexes` as symbolic.
pub fn create_trace_args(values: &[String], symbolic_indexes: &[usize]) -> Result<Vec<TraceArg>> {
    for &i in symbolic_indexes {
        if i == 0 || i > values.len() {
            return Err(Error::invalid(format!(
                "symbolic argument index out of bounds: {}",
                i
            )));
        }
    }
    Ok(values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let kind = if symbolic_indexes.contains(&(i + 1)) {
                ArgKind::Symbolic
            } else {
                ArgKind::Concrete
            };
            TraceArg::new(kind, value.clone())
        })
        .collect())
}

/// How a stream of the recovered binary is checked against the original.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMatch", into = "RawMatch")]
pub enum MatchPolicy {
    #[default]
    Off,
    Exact,
    /// Regex that must match at the start of the recovered output.
    Pattern(String),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawMatch {
    Flag(bool),
    Pattern(String),
    Null,
}

impl From<RawMatch> for MatchPolicy {
    fn from(raw: RawMatch) -> Self {
        match raw {
            RawMatch::Flag(true) => MatchPolicy::Exact,
            RawMatch::Pattern(p) if !p.is_empty() => MatchPolicy::Pattern(p),
            RawMatch::Flag(false) | RawMatch::Pattern(_) | RawMatch::Null => MatchPolicy::Off,
        }
    }
}

impl From<MatchPolicy> for RawMatch {
    fn from(policy: MatchPolicy) -> Self {
        match policy {
            MatchPolicy::Off => RawMatch::Flag(false),
            MatchPolicy::Exact => RawMatch::Flag(true),
            MatchPolicy::Pattern(p) => RawMatch::Pattern(p),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::Off => f.write_str("not checked"),
            MatchPolicy::Exact => f.write_str("exact"),
            MatchPolicy::Pattern(p) => write!(f, "pattern {}", p),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPermissions", into = "RawPermissions")]
pub enum FilePermissions {
    /// Copy the source file's mode bits.
    #[default]
    Preserve,
    /// Leave the destination at the default mode.
    Default,
    Mode(u32),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawPermissions {
    Flag(bool),
    Mode(String),
}

impl TryFrom<RawPermissions> for FilePermissions {
    type Error = Error;

    fn try_from(raw: RawPermissions) -> Result<Self> {
        match raw {
            RawPermissions::Flag(true) => Ok(FilePermissions::Preserve),
            RawPermissions::Flag(false) => Ok(FilePermissions::Default),
            RawPermissions::Mode(s) => FilePermissions::parse_mode(&s),
        }
    }
}

impl From<FilePermissions> for RawPermissions {
    fn from(p: FilePermissions) -> Self {
        match p {
            FilePermissions::Preserve => RawPermissions::Flag(true),
            FilePermissions::Default => RawPermissions::Flag(false),
            FilePermissions::Mode(m) => RawPermissions::Mode(format!("{:03o}", m)),
        }
    }
}

impl FilePermissions {
    /// Parse a chmod-compatible 3 digit octal mode such as `"644"`.
    pub fn parse_mode(s: &str) -> Result<Self> {
        let invalid = || {
            Error::invalid(format!(
                "permissions '{}': must be valid 3 digit octal number",
                s
            ))
        };
        if s.len() != 3 || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(invalid());
        }
        u32::from_str_radix(s, 8)
            .map(FilePermissions::Mode)
            .map_err(|_| invalid())
    }
}

impl fmt::Display for FilePermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilePermissions::Preserve => f.write_str("preserve source permissions"),
            FilePermissions::Default => f.write_str("default permissions"),
            FilePermissions::Mode(m) => write!(f, "chmod {:03o}", m),
        }
    }
}

/// A host file copied into the trace's `input_files/` directory before the
/// binary runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawInputFile")]
pub struct InputFile {
    pub source: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    pub permissions: FilePermissions,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInputFile {
    Path(PathBuf),
    Object {
        source: PathBuf,
        #[serde(default)]
        destination: Option<String>,
        #[serde(default)]
        permissions: FilePermissions,
    },
}

impl From<RawInputFile> for InputFile {
    fn from(raw: RawInputFile) -> Self {
        match raw {
            RawInputFile::Path(source) => InputFile {
                source,
                destination: None,
                permissions: FilePermissions::Preserve,
            },
            RawInputFile::Object {
                source,
                destination,
                permissions,
            } => InputFile {
                source,
                destination: destination
                    .filter(|d| !matches!(d.as_str(), "" | "." | "./"))
                    .map(PathBuf::from),
                permissions,
            },
        }
    }
}

impl InputFile {
    pub fn new(
        source: PathBuf,
        destination: Option<PathBuf>,
        permissions: FilePermissions,
    ) -> Result<Self> {
        if let Some(dest) = &destination {
            if dest.is_absolute() {
                return Err(Error::invalid(format!(
                    "input file destination '{}': must be a relative path",
                    dest.display()
                )));
            }
        }
        Ok(Self {
            source,
            destination,
            permissions,
        })
    }

    pub fn file_name(&self) -> PathBuf {
        self.source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.source.clone())
    }

    /// Destination relative to the `input_files/` directory.
    pub fn relative_destination(&self) -> PathBuf {
        self.destination.clone().unwrap_or_else(|| self.file_name())
    }

    /// Destination relative to the directory the binary runs in.
    pub fn resolved_destination(&self) -> PathBuf {
        Path::new(INPUT_FILES_DIRNAME).join(self.relative_destination())
    }

    /// The mode to apply after copying, or `None` to keep the default.
    pub fn resolve_mode(&self) -> Result<Option<u32>> {
        match self.permissions {
            FilePermissions::Preserve => Ok(Some(source_mode(&self.source)?)),
            FilePermissions::Default => Ok(None),
            FilePermissions::Mode(m) => Ok(Some(m)),
        }
    }

    /// Resolve a relative source against `root` and verify it can be read.
    pub fn check_source(&mut self, root: Option<&Path>) -> Result<()> {
        if let Some(root) = root {
            if !self.source.is_absolute() {
                self.source = root.join(&self.source);
            }
        }
        fs::File::open(&self.source).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::not_found("input file", self.source.display())
            }
            _ => Error::Io(e),
        })?;
        Ok(())
    }
}

#[cfg(unix)]
fn source_mode(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn source_mode(path: &Path) -> Result<u32> {
    let readonly = fs::metadata(path)?.permissions().readonly();
    Ok(if readonly { 0o444 } else { 0o644 })
}

/// One execution scenario of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Vec<TraceArg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(default)]
    pub input_files: Vec<InputFile>,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub teardown: Vec<String>,
    #[serde(default)]
    pub match_stdout: MatchPolicy,
    #[serde(default)]
    pub match_stderr: MatchPolicy,
}

impl Trace {
    /// A new trace compares both output streams exactly.
    pub fn new(args: Vec<TraceArg>) -> Self {
        Self {
            name: None,
            args,
            stdin: None,
            input_files: Vec::new(),
            setup: Vec::new(),
            teardown: Vec::new(),
            match_stdout: MatchPolicy::Exact,
            match_stderr: MatchPolicy::Exact,
        }
    }

    pub fn named(mut self, name: Option<String>) -> Self {
        self.name = name.filter(|n| !n.is_empty());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous trace>")
    }

    pub fn command_line_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.concrete_value().to_string())
            .collect()
    }

    /// 1-based positions of the symbolic arguments.
    pub fn symbolic_indexes(&self) -> Vec<usize> {
        self.args
            .iter()
            .enumerate()
            .filter(|(_, arg)| arg.is_symbolic())
            .map(|(i, _)| i + 1)
            .collect()
    }

    /// Remove an input file by full source path, or by basename when
    /// `filename` has no directory component.
    pub fn remove_input_file(&mut self, filename: &Path) -> Result<InputFile> {
        let by_basename = !filename.to_string_lossy().contains('/');
        let found = self.input_files.iter().position(|f| {
            f.source == filename || (by_basename && f.source.file_name() == Some(filename.as_os_str()))
        });
        match found {
            Some(i) => Ok(self.input_files.remove(i)),
            None => Err(Error::not_found("input file", filename.display())),
        }
    }

    pub(crate) fn normalize(&mut self) {
        if self.stdin.as_deref() == Some("") {
            self.stdin = None;
        }
        if self.name.as_deref() == Some("") {
            self.name = None;
        }
    }
}

/// A sample binary plus the ordered traces that exercise it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub project: String,
    pub binary: PathBuf,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub teardown: Vec<String>,
    #[serde(default)]
    pub traces: Vec<Trace>,
}

impl Campaign {
    pub fn new(project: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            binary: binary.into(),
            setup: Vec::new(),
            teardown: Vec::new(),
            traces: Vec::new(),
        }
    }

    /// The trace's own setup lines, or the campaign's when it has none.
    pub fn effective_setup<'a>(&'a self, trace: &'a Trace) -> &'a [String] {
        if trace.setup.is_empty() {
            &self.setup
        } else {
            &trace.setup
        }
    }

    pub fn effective_teardown<'a>(&'a self, trace: &'a Trace) -> &'a [String] {
        if trace.teardown.is_empty() {
            &self.teardown
        } else {
            &trace.teardown
        }
    }

    /// Append a trace and return its id.
    pub fn add_trace(&mut self, trace: Trace) -> usize {
        self.traces.push(trace);
        self.traces.len() - 1
    }

    pub fn remove_trace(&mut self, reference: &TraceRef) -> Result<Trace> {
        let index = resolve_index(&self.traces, reference)?;
        Ok(self.traces.remove(index))
    }

    pub fn clear_traces(&mut self) {
        self.traces.clear();
    }

    pub fn trace(&self, reference: &TraceRef) -> Result<(usize, &Trace)> {
        let index = resolve_index(&self.traces, reference)?;
        Ok((index, &self.traces[index]))
    }

    pub fn trace_mut(&mut self, reference: &TraceRef) -> Result<(usize, &mut Trace)> {
        let index = resolve_index(&self.traces, reference)?;
        Ok((index, &mut self.traces[index]))
    }

    pub(crate) fn normalize(&mut self) {
        for trace in self.traces.iter_mut() {
            trace.normalize();
        }
    }
}
