//! JSONPath subset lookup.
//!
//! Grammar: `segment ( "." segment | "[" integer "]" )*`. Missing keys,
//! non-objects where an object is required, and out-of-range indexes all
//! fail with kind `NotFound`.

use crate::error::{EngineError, EngineResult, ErrorKind};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^.\[\]]+)|\[(\d+)\]").expect("failed to compile path regex"));

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_segments(path: &str) -> Vec<Segment> {
    SEGMENT_RE
        .captures_iter(path)
        .filter_map(|caps| {
            if let Some(key) = caps.get(1) {
                Some(Segment::Key(key.as_str().to_string()))
            } else {
                caps.get(2)
                    .and_then(|idx| idx.as_str().parse().ok())
                    .map(Segment::Index)
            }
        })
        .collect()
}

/// Resolve `path` inside `root`. An empty path returns the root itself.
pub fn lookup<'a>(root: &'a Value, path: &str) -> EngineResult<&'a Value> {
    const OP: &str = "json_path";

    let mut current = root;
    for segment in parse_segments(path) {
        match segment {
            Segment::Key(key) => {
                let obj = current.as_object().ok_or_else(|| {
                    EngineError::new(ErrorKind::NotFound, OP, "expected object")
                        .with("path", path)
                        .with("segment", key.clone())
                })?;
                current = obj.get(&key).ok_or_else(|| {
                    EngineError::new(ErrorKind::NotFound, OP, "key not found")
                        .with("path", path)
                        .with("key", key.clone())
                })?;
            }
            Segment::Index(idx) => {
                let arr = current.as_array().ok_or_else(|| {
                    EngineError::new(ErrorKind::NotFound, OP, "expected array")
                        .with("path", path)
                        .with("index", idx)
                })?;
                current = arr.get(idx).ok_or_else(|| {
                    EngineError::new(ErrorKind::NotFound, OP, "index out of range")
                        .with("path", path)
                        .with("index", idx)
                        .with("length", arr.len())
                })?;
            }
        }
    }

    Ok(current)
}
