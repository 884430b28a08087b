use binrec_core::{Error, Result};
use std::fmt;
use std::str::FromStr;

use crate::model::{Campaign, Trace};

/// A reference to a trace: a position (negative counts from the end) or a
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRef {
    ByIndex(i64),
    ByName(String),
}

impl TraceRef {
    /// A purely numeric reference is always an index, never a name.
    pub fn parse(reference: &str) -> Self {
        let trimmed = reference.trim();
        if let Ok(index) = trimmed.parse::<i64>() {
            return TraceRef::ByIndex(index);
        }
        let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            // Out of range for i64, so never a valid position.
            let index = if digits.len() < trimmed.len() {
                i64::MIN
            } else {
                i64::MAX
            };
            return TraceRef::ByIndex(index);
        }
        TraceRef::ByName(reference.to_string())
    }

    pub fn last() -> Self {
        TraceRef::ByIndex(-1)
    }
}

impl FromStr for TraceRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(TraceRef::parse(s))
    }
}

impl From<i64> for TraceRef {
    fn from(index: i64) -> Self {
        TraceRef::ByIndex(index)
    }
}

impl fmt::Display for TraceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceRef::ByIndex(i) => write!(f, "{}", i),
            TraceRef::ByName(name) => f.write_str(name),
        }
    }
}

pub fn resolve_index(traces: &[Trace], reference: &TraceRef) -> Result<usize> {
    let found = match reference {
        TraceRef::ByIndex(id) => {
            let len = traces.len() as i64;
            let effective = if *id < 0 { len + id } else { *id };
            (0..len).contains(&effective).then_some(effective as usize)
        }
        TraceRef::ByName(name) => traces
            .iter()
            .position(|t| t.name.as_deref() == Some(name.as_str())),
    };
    found.ok_or_else(|| Error::not_found("trace", reference))
}

/// Resolve `reference` to the trace's position and the trace itself.
pub fn resolve<'a>(campaign: &'a Campaign, reference: &TraceRef) -> Result<(usize, &'a Trace)> {
    campaign.trace(reference)
}
