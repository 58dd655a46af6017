//! Call-shape normalization sweep for block reductions
//!
//! Newer CUDA toolkits dropped the convenience reduction helpers of CUB
//! (`BlockReduce::Sum`, `cub::Sum()`, ...). Rather than patching every call
//! site by hand, this sweep walks a subtree and rewrites the two old call
//! shapes to one canonical shape that passes an explicit combining operation:
//!
//! ```text
//! reducer.Sum(x)                 -> reducer.Reduce(x, cuda::std::plus<>())
//! reducer.Sum(x, n)              -> reducer.Reduce(x, cuda::std::plus<>(), n)
//! reducer.Reduce(x, cub::Max())  -> reducer.Reduce(x, cuda::maximum<>())
//! ```
//!
//! The canonical shape is a fixed point, so the sweep runs on every
//! invocation and leaves already-canonical call sites byte-identical.
//!
//! Call sites are located with a small scanner rather than a regex: it skips
//! comments and string/char literals, matches parentheses, and splits
//! arguments only at the top nesting level, so nested and multi-line
//! arguments are rewritten correctly. Commas inside template argument lists
//! (`f<a, b>(x)`) are not tracked and count as argument separators.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use super::TransformOutcome;
use crate::error::{Error, Result};

const CANONICAL_METHOD: &str = "Reduce";

/// The reduction operations the sweep knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionKind {
    Sum,
    Max,
    Min,
}

impl ReductionKind {
    /// Parse a kind from its lowercase name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sum" => Some(ReductionKind::Sum),
            "max" => Some(ReductionKind::Max),
            "min" => Some(ReductionKind::Min),
            _ => None,
        }
    }
}

/// How one reduction is spelled in its old and canonical shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionOp {
    pub kind: ReductionKind,
    /// Convenience method name, e.g. `Sum`.
    pub method: String,
    /// Functor type passed to `Reduce`, e.g. `cub::Sum`.
    pub functor: String,
    /// Expression passed in the canonical shape, e.g. `cuda::std::plus<>()`.
    pub combiner: String,
}

impl ReductionOp {
    /// The CUB spelling for a reduction kind.
    pub fn cub(kind: ReductionKind) -> Self {
        let (method, functor, combiner) = match kind {
            ReductionKind::Sum => ("Sum", "cub::Sum", "cuda::std::plus<>()"),
            ReductionKind::Max => ("Max", "cub::Max", "cuda::maximum<>()"),
            ReductionKind::Min => ("Min", "cub::Min", "cuda::minimum<>()"),
        };
        Self {
            kind,
            method: method.to_string(),
            functor: functor.to_string(),
            combiner: combiner.to_string(),
        }
    }

    /// The full CUB table.
    pub fn cub_defaults() -> Vec<Self> {
        [ReductionKind::Sum, ReductionKind::Max, ReductionKind::Min]
            .into_iter()
            .map(Self::cub)
            .collect()
    }

    fn matches_functor(&self, arg: &str) -> bool {
        let functor: String = self.functor.split_whitespace().collect();
        arg == format!("{}()", functor) || arg == format!("{}{{}}", functor)
    }

    /// Whether the canonical shape would itself be rewritten again.
    pub fn is_fixed_point(&self) -> bool {
        let combiner: String = self.combiner.split_whitespace().collect();
        !self.matches_functor(&combiner) && self.method != CANONICAL_METHOD
    }
}

/// Sweep configuration: which files to scan and which table to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionSweepOp {
    /// File extensions to scan, without the leading dot.
    pub extensions: Vec<String>,
    pub ops: Vec<ReductionOp>,
}

impl ReductionSweepOp {
    /// Extensions of CUDA and C++ sources and headers.
    pub fn default_extensions() -> Vec<String> {
        ["cu", "cuh", "h", "hpp", "cpp", "cc"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn wants(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|wanted| wanted.trim_start_matches('.') == ext)
            })
            .unwrap_or(false)
    }
}

impl Default for ReductionSweepOp {
    fn default() -> Self {
        Self {
            extensions: Self::default_extensions(),
            ops: ReductionOp::cub_defaults(),
        }
    }
}

/// Run the sweep over a file or subtree.
pub fn apply(op: &ReductionSweepOp, path: &Path) -> Result<TransformOutcome> {
    if !path.exists() {
        return Ok(TransformOutcome::AnchorMissing);
    }

    let files: Vec<PathBuf> = if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && op.wants(e.path()))
            .map(|e| e.into_path())
            .collect()
    };

    let mut changed = 0;
    for file in files {
        let bytes = fs::read(&file)?;
        let Ok(source) = String::from_utf8(bytes) else {
            debug!("skipping non-UTF-8 source {}", file.display());
            continue;
        };
        if let Some(updated) = rewrite_source(&source, &op.ops) {
            fs::write(&file, updated).map_err(|e| Error::Filesystem {
                message: format!("Failed to write '{}': {}", file.display(), e),
            })?;
            debug!("normalized reduction calls in {}", file.display());
            changed += 1;
        }
    }

    if changed == 0 {
        Ok(TransformOutcome::Unchanged)
    } else {
        Ok(TransformOutcome::Changed { files: changed })
    }
}

struct Edit {
    start: usize,
    end: usize,
    text: String,
}

struct MemberCall {
    name_start: usize,
    name_end: usize,
    open: usize,
}

/// Rewrite every recognized call site in one source text.
///
/// Returns `None` when nothing needed rewriting.
pub fn rewrite_source(src: &str, ops: &[ReductionOp]) -> Option<String> {
    let bytes = src.as_bytes();
    let mut edits = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if let Some(next) = skip_non_code(bytes, i) {
            i = next;
            continue;
        }
        let member = match bytes[i] {
            b'.' => Some(i + 1),
            b'>' if i > 0 && bytes[i - 1] == b'-' => Some(i + 1),
            _ => None,
        };
        if let Some(call) = member.and_then(|after| member_call(bytes, after)) {
            collect_edits(src, &call, ops, &mut edits);
            // Arguments may hold further call sites.
            i = call.open + 1;
            continue;
        }
        i += 1;
    }

    if edits.is_empty() {
        return None;
    }
    edits.sort_by(|a, b| b.start.cmp(&a.start));
    let mut out = src.to_string();
    for edit in edits {
        out.replace_range(edit.start..edit.end, &edit.text);
    }
    Some(out)
}

fn collect_edits(src: &str, call: &MemberCall, ops: &[ReductionOp], edits: &mut Vec<Edit>) {
    let bytes = src.as_bytes();
    let name = &src[call.name_start..call.name_end];
    let Some(args) = parse_args(bytes, call.open) else {
        return;
    };

    if name == CANONICAL_METHOD {
        let Some(&(start, end)) = args.get(1) else {
            return;
        };
        let arg: String = src[start..end].split_whitespace().collect();
        if let Some(op) = ops.iter().find(|op| op.matches_functor(&arg)) {
            edits.push(Edit {
                start,
                end,
                text: op.combiner.clone(),
            });
        }
    } else if let Some(op) = ops.iter().find(|op| op.method == name) {
        let Some(&(_, first_end)) = args.first() else {
            return;
        };
        edits.push(Edit {
            start: call.name_start,
            end: call.name_end,
            text: CANONICAL_METHOD.to_string(),
        });
        edits.push(Edit {
            start: first_end,
            end: first_end,
            text: format!(", {}", op.combiner),
        });
    }
}

fn member_call(bytes: &[u8], after: usize) -> Option<MemberCall> {
    let mut j = skip_whitespace(bytes, after);
    if !bytes.get(j).is_some_and(|c| c.is_ascii_alphabetic() || *c == b'_') {
        return None;
    }
    let name_start = j;
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    let name_end = j;
    j = skip_whitespace(bytes, j);
    if bytes.get(j) != Some(&b'(') {
        return None;
    }
    Some(MemberCall {
        name_start,
        name_end,
        open: j,
    })
}

/// Split the argument list opening at `open` into trimmed top-level spans.
fn parse_args(bytes: &[u8], open: usize) -> Option<Vec<(usize, usize)>> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = open + 1;
    let mut i = open + 1;

    while i < bytes.len() {
        if let Some(next) = skip_non_code(bytes, i) {
            i = next;
            continue;
        }
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' if depth > 0 => depth -= 1,
            b')' => {
                let last = trim(bytes, start, i);
                if !(args.is_empty() && last.0 == last.1) {
                    args.push(last);
                }
                return Some(args);
            }
            b']' | b'}' => return None,
            b',' if depth == 0 => {
                args.push(trim(bytes, start, i));
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn trim(bytes: &[u8], mut start: usize, mut end: usize) -> (usize, usize) {
    while start < end && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    while end > start && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    (start, end)
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Index just past the comment or literal starting at `i`, if one does.
fn skip_non_code(bytes: &[u8], i: usize) -> Option<usize> {
    match bytes[i] {
        b'/' if bytes.get(i + 1) == Some(&b'/') => Some(
            bytes[i..]
                .iter()
                .position(|&c| c == b'\n')
                .map_or(bytes.len(), |p| i + p),
        ),
        b'/' if bytes.get(i + 1) == Some(&b'*') => Some(
            bytes[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map_or(bytes.len(), |p| i + 2 + p + 2),
        ),
        b'"' => Some(end_of_literal(bytes, i, b'"')),
        b'\'' if !is_digit_separator(bytes, i) => Some(end_of_literal(bytes, i, b'\'')),
        _ => None,
    }
}

fn end_of_literal(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return j,
            c if c == quote => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

/// C++14 digit separators such as `1'000'000`.
fn is_digit_separator(bytes: &[u8], i: usize) -> bool {
    i > 0
        && bytes[i - 1].is_ascii_hexdigit()
        && bytes.get(i + 1).is_some_and(|c| c.is_ascii_hexdigit())
        && bytes[..i]
            .iter()
            .rev()
            .take_while(|c| c.is_ascii_alphanumeric() || **c == b'\'')
            .last()
            .is_some_and(|c| c.is_ascii_digit())
}
