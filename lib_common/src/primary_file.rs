//! On-disk persistence of the current primary for each failover set.
//!
//! Grounded on `original_source/go/redis.go`. Two formats share one file:
//! a bare `host:port` line for the single-system shorthand (reserved key
//! `"system"`), or one `name/host:port` line per named failover set,
//! lexicographically sorted. The file never carries a trailing newline.

use std::collections::BTreeMap;
use std::io::Write;

use regex::Regex;
use tracing::{error, info};

use crate::error::PrimaryFileError;

pub const RESERVED_SYSTEM_KEY: &str = "system";

/// Parses master-file content into a system-name -> `host:port` map.
pub fn unmarshal(content: &str) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    for line in content.split('\n') {
        if line.is_empty() {
            continue;
        }
        if let Some((name, server)) = line.split_once('/') {
            m.insert(name.to_string(), server.to_string());
        } else {
            m.insert(RESERVED_SYSTEM_KEY.to_string(), line.to_string());
        }
    }
    m
}

/// Renders a system-name -> `host:port` map back to master-file content.
/// A lone `"system"` entry collapses to the bare-line shorthand.
pub fn marshal(masters: &BTreeMap<String, String>) -> String {
    if masters.len() == 1 {
        if let Some(server) = masters.get(RESERVED_SYSTEM_KEY) {
            return server.clone();
        }
    }
    let mut s = String::new();
    for (name, server) in masters {
        s.push_str(name);
        s.push('/');
        s.push_str(server);
        s.push('\n');
    }
    s
}

/// Reads the file at `path`, stripping a trailing newline. Returns the empty
/// string (and logs) if the file cannot be read, matching the original's
/// "missing file means no known primary yet" behaviour.
pub fn read_primary_file(path: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s.trim_end_matches('\n').to_string(),
        Err(e) => {
            error!(path, error = %e, "could not read redis master file");
            String::new()
        }
    }
}

/// Writes `content` to `path`, creating or truncating it. The trailing
/// newline is always stripped before writing.
pub fn write_primary_file(path: &str, content: &str) -> Result<(), PrimaryFileError> {
    let trimmed = content.trim_end_matches('\n');
    info!(path, content = %trimmed.replace('\n', "\\n"), "writing redis master file");
    let mut f = std::fs::File::create(path).map_err(|source| PrimaryFileError::Io {
        path: path.to_string(),
        source,
    })?;
    f.write_all(trimmed.as_bytes())
        .map_err(|source| PrimaryFileError::Io {
            path: path.to_string(),
            source,
        })?;
    Ok(())
}

pub fn clear_primary_file(path: &str) -> Result<(), PrimaryFileError> {
    write_primary_file(path, "")
}

pub fn primary_file_exists(path: &str) -> bool {
    std::fs::metadata(path).is_ok()
}

/// Loads and parses the masters recorded for `path`. Empty map if the file
/// is missing or empty.
pub fn masters_from_primary_file(path: &str) -> BTreeMap<String, String> {
    unmarshal(&read_primary_file(path))
}

/// Rejects a configured path that looks like a `host:port` endpoint rather
/// than a filesystem path — a common misconfiguration.
pub fn verify_primary_file_path(path: &str) -> Result<(), PrimaryFileError> {
    let re = Regex::new(r"^[0-9a-z.]+:[0-9]+$").expect("static regex is valid");
    if re.is_match(path) {
        return Err(PrimaryFileError::PathLooksLikeEndpoint(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_system_round_trips_to_bare_line() {
        let mut m = BTreeMap::new();
        m.insert(RESERVED_SYSTEM_KEY.to_string(), "a1:5,a2:5".to_string());
        let s = marshal(&m);
        assert_eq!(s, "a1:5,a2:5");
        assert_eq!(unmarshal(&s), m);
    }

    #[test]
    fn multi_system_is_sorted_and_slash_separated() {
        let mut m = BTreeMap::new();
        m.insert("secondary".to_string(), "b1:3,b2:3".to_string());
        m.insert("primary".to_string(), "a1:5,a2:5".to_string());
        let s = marshal(&m);
        assert_eq!(s, "primary/a1:5,a2:5\nsecondary/b1:3,b2:3\n");
        assert_eq!(unmarshal(&s), m);
    }

    #[test]
    fn write_strips_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redis-master");
        let path = path.to_str().unwrap();
        write_primary_file(path, "primary/a1:5\n").unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        assert_eq!(raw, "primary/a1:5");
    }

    #[test]
    fn rejects_endpoint_looking_path() {
        assert!(verify_primary_file_path("10.0.0.1:6379").is_err());
        assert!(verify_primary_file_path("/etc/beetle/redis-master").is_ok());
    }
}
