use binrec_campaign::{FilePermissions, InputFile, Trace};
use binrec_core::{ensure_dir, remove_if_exists, Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copy every input file of `trace` into `sandbox`, at its resolved
/// destination, applying the file's permission policy. Later files win on
/// destination collisions.
pub fn materialize_input_files(trace: &Trace, sandbox: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(trace.input_files.len());
    for file in &trace.input_files {
        let dest = sandbox.join(file.resolved_destination());
        copy_input_file(file, &dest)?;
        debug!(source = %file.source.display(), dest = %dest.display(), "materialized input file");
        written.push(dest);
    }
    Ok(written)
}

fn copy_input_file(file: &InputFile, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    remove_if_exists(dest)?;
    let mut src = fs::File::open(&file.source).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::not_found("input file", file.source.display()),
        _ => Error::Io(e),
    })?;
    match file.permissions {
        // A freshly created file gets the process default mode.
        FilePermissions::Default => {
            let mut out = fs::File::create(dest)?;
            io::copy(&mut src, &mut out)?;
        }
        FilePermissions::Preserve | FilePermissions::Mode(_) => {
            drop(src);
            fs::copy(&file.source, dest)?;
            if let Some(mode) = file.resolve_mode()? {
                set_mode(dest, mode)?;
            }
        }
    }
    Ok(())
}

/// Stage the trace's input files by basename into the engine project's
/// host `input_files/` directory, clearing files left by a previous trace.
pub fn stage_input_files(trace: &Trace, input_files_dir: &Path) -> Result<()> {
    ensure_dir(input_files_dir)?;
    for entry in fs::read_dir(input_files_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            fs::remove_file(entry.path())?;
        }
    }
    for file in &trace.input_files {
        if !file.source.is_file() {
            return Err(Error::not_found("input file", file.source.display()));
        }
        fs::copy(&file.source, input_files_dir.join(file.file_name()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)?;
    Ok(())
}
