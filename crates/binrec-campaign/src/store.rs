use binrec_core::{atomic_write_json_pretty, ensure_dir, Error, Layout, Result};
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::model::Campaign;
use crate::schema::validate_campaign_document;

/// One JSON record per project under a single directory.
///
/// Mutations happen on the in-memory [`Campaign`]; nothing is persisted
/// until [`CampaignStore::save`] is called.
#[derive(Debug, Clone)]
pub struct CampaignStore {
    dir: PathBuf,
}

impl CampaignStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_layout(layout: &Layout) -> Self {
        Self::new(layout.campaigns_dir())
    }

    pub fn path(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{}.json", project))
    }

    pub fn exists(&self, project: &str) -> bool {
        self.path(project).is_file()
    }

    pub fn load(&self, project: &str) -> Result<Campaign> {
        validate_project_name(project)?;
        let path = self.path(project);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("project", project));
            }
            Err(e) => return Err(e.into()),
        };
        let document: Value = serde_json::from_slice(&bytes)?;
        let campaign = campaign_from_document(document)?;
        if campaign.project != project {
            return Err(Error::invalid(format!(
                "campaign record {}: names project '{}'",
                path.display(),
                campaign.project
            )));
        }
        debug!(project, traces = campaign.traces.len(), "loaded campaign");
        Ok(campaign)
    }

    /// Atomically replace the persisted record of `campaign.project`.
    pub fn save(&self, campaign: &Campaign) -> Result<()> {
        validate_project_name(&campaign.project)?;
        atomic_write_json_pretty(&self.path(&campaign.project), campaign)?;
        debug!(project = %campaign.project, traces = campaign.traces.len(), "saved campaign");
        Ok(())
    }

    /// Take the exclusive edit lock of a project for a load/mutate/save cycle.
    pub fn lock(&self, project: &str) -> Result<CampaignLock> {
        validate_project_name(project)?;
        CampaignLock::acquire(&self.dir.join(format!(".{}.lock", project)))
    }
}

/// Exclusive edit lock of one campaign record; released on drop.
#[derive(Debug)]
pub struct CampaignLock {
    path: PathBuf,
}

impl CampaignLock {
    fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            ensure_dir(parent)?;
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(mut file) => {
                let payload = format!(
                    "{{\"pid\":{},\"acquired_at\":\"{}\"}}\n",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                let _ = file.write_all(payload.as_bytes());
                let _ = file.sync_all();
                Ok(CampaignLock {
                    path: lock_path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::Locked {
                path: lock_path.to_path_buf(),
                holder: lock_holder(lock_path),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Describe who holds a lock from the payload written by [`CampaignLock::acquire`].
fn lock_holder(lock_path: &Path) -> String {
    let payload = fs::read(lock_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok());
    let Some(payload) = payload else {
        return "an unknown process".to_string();
    };
    let pid = payload
        .get("pid")
        .and_then(Value::as_u64)
        .map(|p| p.to_string())
        .unwrap_or_else(|| "?".to_string());
    match payload.get("acquired_at").and_then(Value::as_str) {
        Some(at) => format!("pid {} since {}", pid, at),
        None => format!("pid {}", pid),
    }
}

impl Drop for CampaignLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub fn validate_project_name(project: &str) -> Result<()> {
    let bad = project.is_empty()
        || project.starts_with('.')
        || project.contains('/')
        || project.contains('\\')
        || project.chars().any(char::is_control);
    if bad {
        return Err(Error::invalid(format!("project name '{}'", project)));
    }
    Ok(())
}

/// Schema-check and parse a campaign document.
pub fn campaign_from_document(document: Value) -> Result<Campaign> {
    validate_campaign_document(&document)?;
    let mut campaign: Campaign = serde_json::from_value(document)?;
    campaign.normalize();
    Ok(campaign)
}

/// Load a campaign file as a template for `project`. Relative input file
/// sources are resolved against the template's directory and must be
/// readable.
pub fn load_template(path: &Path, project: &str, binary: &Path) -> Result<Campaign> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::not_found("campaign file", path.display()),
        _ => Error::Io(e),
    })?;
    let mut document: Value = serde_json::from_slice(&bytes)?;
    if let Value::Object(map) = &mut document {
        map.insert("project".to_string(), Value::String(project.to_string()));
        map.insert(
            "binary".to_string(),
            Value::String(binary.to_string_lossy().to_string()),
        );
    }
    let mut campaign = campaign_from_document(document)?;
    let root = path.parent();
    for trace in campaign.traces.iter_mut() {
        for input_file in trace.input_files.iter_mut() {
            input_file.check_source(root)?;
        }
    }
    Ok(campaign)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{create_trace_args, FilePermissions, InputFile, MatchPolicy, Trace};
    use crate::resolve::TraceRef;
    use serde_json::json;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "binrec_store_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp dir");
        root
    }

    #[test]
    fn load_missing_project_is_not_found() {
        let root = temp_root("missing");
        let store = CampaignStore::new(&root);
        let err = store.load("nope").expect_err("missing record");
        assert!(matches!(err, Error::NotFound { kind: "project", .. }));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn save_then_load_reproduces_campaign() {
        let root = temp_root("roundtrip");
        let store = CampaignStore::new(&root);
        let mut campaign = Campaign::new("cat", "/bin/cat");
        campaign.setup.push("echo setup > marker".to_string());
        campaign.teardown.push("rm -f marker".to_string());

        let args = create_trace_args(&["-n".to_string(), "abc".to_string()], &[2])
            .expect("args");
        campaign.add_trace(Trace::new(args).named(Some("numbered".to_string())));
        let mut second = Trace::new(Vec::new());
        second.stdin = Some("line one\nline two\n".to_string());
        second.match_stderr = MatchPolicy::Pattern("^warn".to_string());
        second.match_stdout = MatchPolicy::Off;
        second.input_files.push(
            InputFile::new(
                PathBuf::from("/tmp/x/data.bin"),
                Some(PathBuf::from("cfg/data.bin")),
                FilePermissions::Mode(0o600),
            )
            .expect("input file"),
        );
        second.teardown.push("rm -rf cfg".to_string());
        campaign.add_trace(second);
        campaign.add_trace(Trace::new(Vec::new()).named(Some("numbered".to_string())));
        campaign
            .remove_trace(&TraceRef::ByIndex(-1))
            .expect("remove last");

        store.save(&campaign).expect("save");
        let loaded = store.load("cat").expect("load");
        assert_eq!(loaded, campaign);

        store.save(&loaded).expect("save again");
        assert_eq!(store.load("cat").expect("reload"), campaign);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn persisted_record_uses_documented_field_names() {
        let root = temp_root("fields");
        let store = CampaignStore::new(&root);
        let mut campaign = Campaign::new("cat", "/bin/cat");
        campaign.add_trace(Trace::new(
            create_trace_args(&["x".to_string()], &[1]).expect("args"),
        ));
        store.save(&campaign).expect("save");
        let raw: Value =
            serde_json::from_slice(&fs::read(store.path("cat")).expect("read")).expect("json");
        assert_eq!(raw["project"], json!("cat"));
        assert_eq!(raw["binary"], json!("/bin/cat"));
        assert_eq!(raw["traces"][0]["args"][0], json!({"kind": "symbolic", "value": "x"}));
        assert_eq!(raw["traces"][0]["match_stdout"], json!(true));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn load_rejects_schema_violations() {
        let root = temp_root("schema");
        let store = CampaignStore::new(&root);
        fs::write(
            store.path("bad"),
            r#"{"project":"bad","binary":"/bin/true","traces":[{"args":[1]}]}"#,
        )
        .expect("write");
        assert!(matches!(store.load("bad"), Err(Error::Schema(_))));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn load_normalizes_empty_stdin() {
        let root = temp_root("stdin");
        let store = CampaignStore::new(&root);
        fs::write(
            store.path("p"),
            r#"{"project":"p","binary":"/bin/true","traces":[{"stdin":"","name":""}]}"#,
        )
        .expect("write");
        let campaign = store.load("p").expect("load");
        assert_eq!(campaign.traces[0].stdin, None);
        assert_eq!(campaign.traces[0].name, None);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn edit_lock_is_exclusive() {
        let root = temp_root("lock");
        let store = CampaignStore::new(&root);
        let first = store.lock("cat").expect("first lock");
        let err = store.lock("cat").expect_err("second lock must fail");
        assert!(err.to_string().contains("operation_in_progress"), "{}", err);
        store.lock("dog").expect("other projects are independent");
        drop(first);
        store.lock("cat").expect("lock is re-acquirable");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn leftover_lock_reports_its_holder() {
        let root = temp_root("stale");
        let store = CampaignStore::new(&root);
        fs::write(
            root.join(".cat.lock"),
            r#"{"pid":4242,"acquired_at":"2026-10-19T10:00:00+00:00"}"#,
        )
        .expect("leftover lock");
        match store.lock("cat") {
            Err(Error::Locked { path, holder }) => {
                assert_eq!(path, root.join(".cat.lock"));
                assert_eq!(holder, "pid 4242 since 2026-10-19T10:00:00+00:00");
            }
            other => panic!("expected Locked, got {:?}", other.map(|_| ())),
        }

        fs::write(root.join(".cat.lock"), "garbage").expect("corrupt lock");
        let err = store.lock("cat").map(|_| ()).expect_err("still locked");
        assert!(err.to_string().contains("an unknown process"), "{}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn load_and_lock_reject_path_like_names() {
        let root = temp_root("names");
        let store = CampaignStore::new(root.join("campaigns"));
        fs::write(
            root.join("x.json"),
            r#"{"project":"../x","binary":"/bin/true","traces":[]}"#,
        )
        .expect("outside record");
        assert!(matches!(store.load("../x"), Err(Error::Invalid(_))));
        assert!(matches!(store.lock("../x").map(|_| ()), Err(Error::Invalid(_))));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn template_resolves_relative_input_files() {
        let root = temp_root("template");
        fs::write(root.join("input.txt"), "data").expect("input");
        let template = root.join("template.json");
        fs::write(
            &template,
            r#"{"setup":["true"],"traces":[{"args":["a"],"input_files":["input.txt"]}]}"#,
        )
        .expect("template");
        let campaign =
            load_template(&template, "proj", Path::new("/bin/true")).expect("load template");
        assert_eq!(campaign.project, "proj");
        assert_eq!(campaign.binary, PathBuf::from("/bin/true"));
        assert_eq!(campaign.traces[0].input_files[0].source, root.join("input.txt"));

        fs::write(
            &template,
            r#"{"traces":[{"input_files":["missing.txt"]}]}"#,
        )
        .expect("template");
        assert!(matches!(
            load_template(&template, "proj", Path::new("/bin/true")),
            Err(Error::NotFound { .. })
        ));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn project_names_must_be_plain() {
        validate_project_name("cat-1.0").expect("plain name");
        for bad in ["", ".hidden", "a/b", "a\nb"] {
            assert!(validate_project_name(bad).is_err(), "accepted {:?}", bad);
        }
    }
}
