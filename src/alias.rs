//! Marker-delimited alias blocks in a shared shell startup file.
//!
//! A block looks like
//!
//! ```text
//! # >>> toolrig:git:vcs >>>
//! alias gs='git status'
//! # <<< toolrig:git:vcs <<<
//! ```
//!
//! Only the exact marker span is ever touched, so modules sharing the file cannot clobber each
//! other. A region whose begin or end marker is missing (left behind by an interrupted run) only
//! loses its stray marker line; the lines around it are kept.

use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Result, ToolrigError};

const MARKER_PREFIX: &str = "toolrig";

/// Identifies one block: the owning module and an optional category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerId {
    pub module: String,
    pub category: Option<String>,
}

impl MarkerId {
    pub fn new(module: &str, category: Option<&str>) -> Self {
        Self {
            module: module.to_string(),
            category: category.map(str::to_string),
        }
    }

    fn key(&self) -> String {
        match &self.category {
            Some(category) => format!("{MARKER_PREFIX}:{}:{}", self.module, category),
            None => format!("{MARKER_PREFIX}:{}", self.module),
        }
    }

    pub fn begin(&self) -> String {
        format!("# >>> {} >>>", self.key())
    }

    pub fn end(&self) -> String {
        format!("# <<< {} <<<", self.key())
    }
}

/// Line-index range of a well-formed region, end exclusive, markers included.
fn find_region_lines(lines: &[&str], marker: &MarkerId) -> Option<Range<usize>> {
    let begin = marker.begin();
    let end = marker.end();
    let mut start = None;
    for (index, line) in lines.iter().enumerate() {
        let line = line.trim_end();
        if line == begin {
            start = Some(index);
        } else if line == end {
            if let Some(start) = start {
                return Some(start..index + 1);
            }
        }
    }
    None
}

/// Lines with their terminators, so joining them back reproduces the text.
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Terminator for lines we write: CRLF when the file already uses it.
fn line_ending(text: &str) -> &'static str {
    if text.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Byte span of the first well-formed region for `marker`, including the trailing newline.
pub fn find_region(text: &str, marker: &MarkerId) -> Option<Range<usize>> {
    let lines = split_lines(text);
    let range = find_region_lines(&lines, marker)?;
    let start: usize = lines[..range.start].iter().map(|line| line.len()).sum();
    let len: usize = lines[range].iter().map(|line| line.len()).sum();
    Some(start..start + len)
}

/// Drops every well-formed region for `marker`, then any stray marker line left over.
fn strip_regions<'t>(mut lines: Vec<&'t str>, marker: &MarkerId) -> Vec<&'t str> {
    while let Some(range) = find_region_lines(&lines, marker) {
        let start = range.start;
        lines.drain(range);
        // blocks are always appended after a blank separator line
        if start > 0 && lines[start - 1].trim().is_empty() {
            lines.remove(start - 1);
        }
    }
    let begin = marker.begin();
    let end = marker.end();
    lines.retain(|line| {
        let line = line.trim_end();
        line != begin && line != end
    });
    lines
}

/// Removes every region for `marker` and any stray begin/end marker line of it.
pub fn delete_region(text: &str, marker: &MarkerId) -> String {
    strip_regions(split_lines(text), marker).concat()
}

/// Replaces the region for `marker` with `content`, or appends a new region.
///
/// An existing well-formed region is replaced in place. Duplicates and stray markers are dropped.
pub fn replace_region(text: &str, marker: &MarkerId, content: &str) -> String {
    let eol = line_ending(text);
    let mut block = vec![format!("{}{eol}", marker.begin())];
    block.extend(content.lines().map(|line| format!("{line}{eol}")));
    block.push(format!("{}{eol}", marker.end()));

    let lines = split_lines(text);
    if let Some(range) = find_region_lines(&lines, marker) {
        let mut out = strip_regions(lines[..range.start].to_vec(), marker);
        out.extend(block.iter().map(String::as_str));
        out.extend(strip_regions(lines[range.end..].to_vec(), marker));
        return out.concat();
    }

    let mut out = delete_region(text, marker);
    if !out.is_empty() {
        if !out.ends_with('\n') {
            out.push_str(eol);
        }
        out.push_str(eol);
    }
    out.push_str(&block.concat());
    out
}

/// Renders `alias name='command'` lines, sorted by alias name.
pub fn render_aliases(aliases: &BTreeMap<String, String>) -> String {
    aliases
        .iter()
        .map(|(name, command)| format!("alias {}='{}'", name, command.replace('\'', r"'\''")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Applies block edits to one shell startup file.
#[derive(Debug, Clone)]
pub struct AliasManager {
    path: PathBuf,
    dry_run: bool,
}

impl AliasManager {
    pub fn new<P: AsRef<Path>>(path: P, dry_run: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            dry_run,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(self.error(e.to_string())),
        }
    }

    fn error(&self, reason: String) -> ToolrigError {
        ToolrigError::Alias {
            path: self.path.clone(),
            reason,
        }
    }

    /// Writes through a temp file in the same directory, then renames over the target.
    fn write(&self, original: &str, updated: &str) -> Result<bool> {
        if original == updated {
            return Ok(false);
        }
        if self.dry_run {
            info!("[dry-run] would update {}", self.path.display());
            return Ok(false);
        }
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.error(e.to_string()))?;
        tmp.write_all(updated.as_bytes())
            .map_err(|e| self.error(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| self.error(e.error.to_string()))?;
        Ok(true)
    }

    pub fn find_block(&self, module: &str, category: Option<&str>) -> Result<Option<String>> {
        let text = self.read()?;
        let marker = MarkerId::new(module, category);
        Ok(find_region(&text, &marker).map(|span| text[span].to_string()))
    }

    /// Inserts or replaces the block of (`module`, `category`). Returns whether the file changed.
    pub fn upsert_block(&self, module: &str, category: Option<&str>, content: &str) -> Result<bool> {
        let text = self.read()?;
        let marker = MarkerId::new(module, category);
        let updated = replace_region(&text, &marker, content);
        let changed = self.write(&text, &updated)?;
        debug!("Alias block {} upserted (changed={})", marker.begin(), changed);
        Ok(changed)
    }

    /// Removes the block of (`module`, `category`). Returns whether the file changed.
    pub fn remove_block(&self, module: &str, category: Option<&str>) -> Result<bool> {
        let text = self.read()?;
        if text.is_empty() {
            return Ok(false);
        }
        let marker = MarkerId::new(module, category);
        let updated = delete_region(&text, &marker);
        self.write(&text, &updated)
    }

    /// Removes every block owned by `module`, whatever its category.
    pub fn remove_module_blocks(&self, module: &str) -> Result<bool> {
        let text = self.read()?;
        let mut updated = text.clone();
        for category in categories_in(&text, module) {
            updated = delete_region(&updated, &MarkerId::new(module, category.as_deref()));
        }
        self.write(&text, &updated)
    }

    /// Categories of the blocks `module` currently owns, in file order.
    pub fn block_categories(&self, module: &str) -> Result<Vec<Option<String>>> {
        let text = self.read()?;
        Ok(categories_in(&text, module))
    }
}

fn categories_in(text: &str, module: &str) -> Vec<Option<String>> {
    let prefix = format!("# >>> {MARKER_PREFIX}:{module}");
    let mut categories = Vec::new();
    for line in text.lines() {
        let Some(rest) = line.trim_end().strip_prefix(&prefix) else {
            continue;
        };
        let Some(rest) = rest.strip_suffix(" >>>") else {
            continue;
        };
        let category = if rest.is_empty() {
            None
        } else if let Some(category) = rest.strip_prefix(':') {
            Some(category.to_string())
        } else {
            // another module whose name starts with this one
            continue;
        };
        if !categories.contains(&category) {
            categories.push(category);
        }
    }
    categories
}
