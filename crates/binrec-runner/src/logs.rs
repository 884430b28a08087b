use binrec_core::{Result, LOG_PREFIX};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Pick the log file for the next engine run of the project in
/// `project_dir`: `s2e-out-<n>.log` with the smallest `n` not used by any
/// existing `s2e-out-*` trace directory or log.
pub fn next_log_name(project_dir: &Path) -> Result<PathBuf> {
    let mut used = BTreeSet::new();
    if project_dir.is_dir() {
        for entry in fs::read_dir(project_dir)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(n) = run_number(&name) {
                used.insert(n);
            }
        }
    }
    let mut next = 0u64;
    while used.contains(&next) {
        next += 1;
    }
    Ok(project_dir.join(format!("{}{}.log", LOG_PREFIX, next)))
}

fn run_number(name: &str) -> Option<u64> {
    if !name.starts_with(LOG_PREFIX) {
        return None;
    }
    let stem = name.strip_suffix(".log").unwrap_or(name);
    stem.rsplit('-').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrec_core::ensure_dir;
    use chrono::Utc;

    fn temp_project(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "binrec_logs_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn reuses_the_first_gap() {
        let dir = temp_project("gap");
        ensure_dir(&dir.join("s2e-out-0")).expect("run 0");
        ensure_dir(&dir.join("s2e-out-2")).expect("run 2");
        assert_eq!(
            next_log_name(&dir).expect("next"),
            dir.join("s2e-out-1.log")
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn starts_at_zero_and_skips_existing_logs() {
        let dir = temp_project("empty");
        assert_eq!(next_log_name(&dir).expect("next"), dir.join("s2e-out-0.log"));
        fs::write(dir.join("s2e-out-0.log"), "").expect("log");
        assert_eq!(next_log_name(&dir).expect("next"), dir.join("s2e-out-1.log"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn ignores_non_numeric_suffixes() {
        let dir = temp_project("junk");
        ensure_dir(&dir.join("s2e-out-latest")).expect("junk");
        ensure_dir(&dir.join("s2e-last")).expect("symlink stand-in");
        ensure_dir(&dir.join("s2e-out-0")).expect("run 0");
        assert_eq!(next_log_name(&dir).expect("next"), dir.join("s2e-out-1.log"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_project_dir_yields_zero() {
        let dir = std::env::temp_dir().join("binrec_logs_does_not_exist");
        assert_eq!(next_log_name(&dir).expect("next"), dir.join("s2e-out-0.log"));
    }
}
