// /////////////////////////////////////////////////////////////////////////////
// Flowline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Recursive directory listing, optionally filtered by a `*`-wildcard
//! pattern matched against the file name. Emits path strings in
//! lexicographic order (the Open Question in spec.md §9 is resolved this
//! way in SPEC_FULL.md §4.2).

use std::path::{Path, PathBuf};

use flowline_domain::{PipelineError, PipelineResult, Record, Source, Tape};

use crate::builder::{from_source_factory, Builder};

const OP_LIST_FILES: u32 = 2;

pub fn list_files(root: impl Into<PathBuf>, pattern: Option<String>) -> Builder {
    let root = root.into();
    from_source_factory(move || {
        let paths = enumerate(&root, pattern.as_deref())?;
        Ok(Box::new(ListFilesOp { paths, index: 0 }) as flowline_domain::BoxSource)
    })
}

fn enumerate(root: &Path, pattern: Option<&str>) -> PipelineResult<Vec<String>> {
    let mut paths = Vec::new();
    walk(root, pattern, &mut paths)?;
    paths.sort();
    Ok(paths)
}

fn walk(dir: &Path, pattern: Option<&str>, out: &mut Vec<String>) -> PipelineResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::operator("list_files", format!("reading {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::operator("list_files", e))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, pattern, out)?;
        } else {
            let matches = pattern
                .map(|p| glob_match(p, path.file_name().and_then(|n| n.to_str()).unwrap_or("")))
                .unwrap_or(true);
            if matches {
                out.push(path.to_string_lossy().into_owned());
            }
        }
    }
    Ok(())
}

/// Minimal glob matcher supporting a single wildcard kind, `*` (matches any
/// run of characters, including none). No `?`, `[...]`, or `**`.
fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

struct ListFilesOp {
    paths: Vec<String>,
    index: usize,
}

impl Source for ListFilesOp {
    fn next(&mut self) -> PipelineResult<Option<Record>> {
        if self.index >= self.paths.len() {
            return Ok(None);
        }
        let path = self.paths[self.index].clone();
        self.index += 1;
        Ok(Some(Record::str(path)))
    }

    fn reset(&mut self) -> PipelineResult<()> {
        self.index = 0;
        Ok(())
    }

    fn record_position(&self, tape: &mut Tape) -> PipelineResult<()> {
        tape.write_op_tag(OP_LIST_FILES);
        tape.write_primitive(self.index as u64);
        Ok(())
    }

    fn reload_position(&mut self, tape: &mut Tape) -> PipelineResult<()> {
        tape.expect_op_tag(OP_LIST_FILES)?;
        self.index = tape.read_primitive::<u64>()? as usize;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_suffix_and_prefix() {
        assert!(glob_match("*.txt", "a.txt"));
        assert!(!glob_match("*.txt", "a.csv"));
        assert!(glob_match("data_*", "data_001.bin"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("exact.txt", "exact.txt"));
    }

    #[test]
    fn lists_lexicographically() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"").unwrap();
        let mut p = list_files(dir.path(), None).and_return();
        let first = p.next().unwrap().unwrap();
        let second = p.next().unwrap().unwrap();
        assert!(first.as_list().is_none());
        assert!(matches!(first, Record::Str(ref s) if s.ends_with("a.txt")));
        assert!(matches!(second, Record::Str(ref s) if s.ends_with("b.txt")));
    }
}
