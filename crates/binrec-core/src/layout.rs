use std::env;
use std::path::PathBuf;

pub const INPUT_FILES_DIRNAME: &str = "input_files";
pub const MERGED_DIRNAME: &str = "merged";
pub const TRACE_CONFIG_FILENAME: &str = "trace-config.sh";
pub const LOG_PREFIX: &str = "s2e-out-";

const DEFAULT_ENGINE: &str = "s2e";
const DEFAULT_SHELL: &str = "/bin/bash";

/// Where campaign records, engine projects and engine logs live on disk.
///
/// ```text
/// $BINREC_ROOT/campaigns/<project>.json
/// $BINREC_ROOT/logs/
/// $S2EDIR/projects/<project>/{binary, input_files/, s2e-out-<n>.log, merged/}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub s2e_dir: PathBuf,
    pub engine: String,
    pub shell: String,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, s2e_dir: Option<PathBuf>) -> Self {
        let root = root.into();
        let s2e_dir = s2e_dir.unwrap_or_else(|| root.join("s2e"));
        Self {
            root,
            s2e_dir,
            engine: DEFAULT_ENGINE.to_string(),
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    /// Resolve the layout from `BINREC_ROOT`, `S2EDIR`, `BINREC_ENGINE` and
    /// `BINREC_SHELL`, falling back to the current directory.
    pub fn from_env() -> std::io::Result<Self> {
        let root = match env::var_os("BINREC_ROOT") {
            Some(v) if !v.is_empty() => PathBuf::from(v),
            _ => env::current_dir()?,
        };
        let s2e_dir = env::var_os("S2EDIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let mut layout = Self::new(root, s2e_dir);
        if let Ok(engine) = env::var("BINREC_ENGINE") {
            if !engine.trim().is_empty() {
                layout.engine = engine;
            }
        }
        if let Ok(shell) = env::var("BINREC_SHELL") {
            if !shell.trim().is_empty() {
                layout.shell = shell;
            }
        }
        Ok(layout)
    }

    pub fn campaigns_dir(&self) -> PathBuf {
        self.root.join("campaigns")
    }

    pub fn campaign_file(&self, project: &str) -> PathBuf {
        self.campaigns_dir().join(format!("{}.json", project))
    }

    pub fn campaign_lock_file(&self, project: &str) -> PathBuf {
        self.campaigns_dir().join(format!(".{}.lock", project))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.s2e_dir.join("projects")
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.projects_dir().join(project)
    }

    pub fn project_binary(&self, project: &str) -> PathBuf {
        self.project_dir(project).join("binary")
    }

    pub fn input_files_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(INPUT_FILES_DIRNAME)
    }

    pub fn trace_config_file(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(TRACE_CONFIG_FILENAME)
    }

    /// The directory holding the merged lift output (`binary`, `recovered`);
    /// differential validation runs inside it.
    pub fn merged_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(MERGED_DIRNAME)
    }

    /// Numbered engine output directories (`s2e-out-<n>`) of a project.
    pub fn trace_dirs(&self, project: &str) -> std::io::Result<Vec<PathBuf>> {
        let dir = self.project_dir(project);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with(LOG_PREFIX) {
                out.push(entry.path());
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_defaults_engine_dir_under_root() {
        let layout = Layout::new("/work", None);
        assert_eq!(layout.campaign_file("cat"), PathBuf::from("/work/campaigns/cat.json"));
        assert_eq!(layout.project_dir("cat"), PathBuf::from("/work/s2e/projects/cat"));
        assert_eq!(
            layout.merged_dir("cat"),
            PathBuf::from("/work/s2e/projects/cat/merged")
        );
        assert!(layout
            .input_files_dir("cat")
            .starts_with(layout.project_dir("cat")));
    }

    #[test]
    fn layout_honors_explicit_engine_dir() {
        let layout = Layout::new("/work", Some(PathBuf::from("/opt/s2e")));
        assert_eq!(layout.project_binary("cat"), PathBuf::from("/opt/s2e/projects/cat/binary"));
        assert_eq!(layout.engine, "s2e");
        assert_eq!(layout.shell, "/bin/bash");
    }
}
