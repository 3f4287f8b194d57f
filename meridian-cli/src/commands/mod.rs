pub mod allocate;
pub mod attribute;
pub mod batch;
pub mod config;
pub mod detect;
pub mod forecast;
pub mod segment;
pub mod simulate;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read a JSON document from disk.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

/// Results go to stdout; logs go to stderr.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn as_of(arg: Option<DateTime<Utc>>) -> DateTime<Utc> {
    arg.unwrap_or_else(Utc::now)
}
