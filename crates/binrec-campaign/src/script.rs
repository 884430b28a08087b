//! The bash script the guest's patched `bootstrap.sh` sources before it
//! executes the sample.

use binrec_core::{shell_join, shell_quote, Result, INPUT_FILES_DIRNAME};
use std::fmt::Write as _;

use crate::model::{Campaign, InputFile, Trace};

pub const SYMBOLIC_ARGS_VAR: &str = "S2E_SYM_ARGS";
pub const CONCRETE_ARGS_VAR: &str = "TRACE_ARGS";
pub const STDIN_VAR: &str = "TRACE_STDIN";
pub const GET_INPUT_FILES_FUNCTION: &str = "get_trace_input_files";
pub const SETUP_FUNCTION: &str = "setup_trace";
pub const TEARDOWN_FUNCTION: &str = "teardown_trace";

pub fn render_trace_config(campaign: &Campaign, trace: &Trace) -> Result<String> {
    let mut out = String::from("#!/bin/bash\n");

    let symbolic = trace
        .symbolic_indexes()
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(out, "export {}={}", SYMBOLIC_ARGS_VAR, shell_quote(&symbolic));
    let _ = writeln!(
        out,
        "export {}=({})",
        CONCRETE_ARGS_VAR,
        shell_join(&trace.command_line_args())
    );
    let _ = writeln!(
        out,
        "export {}={}",
        STDIN_VAR,
        shell_quote(trace.stdin.as_deref().unwrap_or(""))
    );
    out.push('\n');

    let _ = writeln!(out, "function {}() {{", GET_INPUT_FILES_FUNCTION);
    let _ = writeln!(out, "  mkdir -p ./{}", INPUT_FILES_DIRNAME);
    let _ = writeln!(out, "  cd ./{}", INPUT_FILES_DIRNAME);
    for file in &trace.input_files {
        out.push_str(&fetch_block(file)?);
    }
    out.push_str("  cd ..\n}\n\n");

    write_function(&mut out, SETUP_FUNCTION, campaign.effective_setup(trace));
    out.push('\n');
    write_function(&mut out, TEARDOWN_FUNCTION, campaign.effective_teardown(trace));
    Ok(out)
}

fn fetch_block(file: &InputFile) -> Result<String> {
    let name = shell_quote(&file.file_name().to_string_lossy());
    let mut block = format!("  ../${{S2EGET}} {}\n", name);
    if let Some(mode) = file.resolve_mode()? {
        let _ = writeln!(block, "  chmod {:03o} {}", mode, name);
    }
    if let Some(dest) = &file.destination {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            let _ = writeln!(block, "  mkdir -p {}", shell_quote(&parent.to_string_lossy()));
        }
        let _ = writeln!(block, "  mv {} {}", name, shell_quote(&dest.to_string_lossy()));
    }
    Ok(block)
}

// Hook lines are emitted verbatim; the trailing `return` keeps an empty
// function body valid bash.
fn write_function(out: &mut String, name: &str, lines: &[String]) {
    let _ = writeln!(out, "function {}() {{", name);
    for line in lines {
        let _ = writeln!(out, "  {}", line);
    }
    out.push_str("  return\n}\n");
}
