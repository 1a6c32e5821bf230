//! Source map (revision 3) parsing.
//!
//! Only the fields needed for position lookup are kept: `sources`,
//! `sourceRoot`, `names` and the decoded `mappings`.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const VLQ_SHIFT: u32 = 5;
const VLQ_CONTINUATION: i64 = 1 << VLQ_SHIFT;
const VLQ_MASK: i64 = VLQ_CONTINUATION - 1;

// ============================================================================
// Raw JSON
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    version: u32,
    #[serde(default)]
    sources: Vec<Option<String>>,
    #[serde(default)]
    source_root: Option<String>,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    mappings: String,
}

// ============================================================================
// Segment
// ============================================================================

/// Original position of a generated location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    /// Index into [`SourceMap::sources`].
    pub source: usize,
    /// Zero-based line.
    pub line: u32,
    /// Zero-based column.
    pub column: u32,
    /// Index into [`SourceMap::names`].
    pub name: Option<usize>,
}

/// One mapping segment on a generated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Zero-based generated column.
    pub column: u32,
    /// Original position, `None` for unmapped code.
    pub original: Option<SourcePosition>,
}

// ============================================================================
// SourceMap
// ============================================================================

/// A parsed source map.
#[derive(Debug, Clone)]
pub struct SourceMap {
    sources: Vec<String>,
    names: Vec<String>,
    /// Segments per generated line, sorted by column.
    lines: Vec<Vec<Segment>>,
}

impl SourceMap {
    /// Parses a source map from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceMap`] for unsupported versions or malformed mappings.
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawSourceMap = serde_json::from_str(json)
            .map_err(|e| Error::source_map(format!("invalid JSON: {e}")))?;

        if raw.version != 3 {
            return Err(Error::source_map(format!(
                "unsupported version {}",
                raw.version
            )));
        }

        let root = raw.source_root.unwrap_or_default();
        let sources = raw
            .sources
            .into_iter()
            .map(|source| match source {
                Some(source) if !root.is_empty() => join_root(&root, &source),
                Some(source) => source,
                None => String::new(),
            })
            .collect::<Vec<_>>();

        let lines = decode_mappings(&raw.mappings, sources.len(), raw.names.len())?;

        Ok(Self {
            sources,
            names: raw.names,
            lines,
        })
    }

    /// Returns the source URLs, with `sourceRoot` applied.
    #[inline]
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Returns the symbol names.
    #[inline]
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the number of generated lines with mapping data.
    #[inline]
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Finds the segment covering a zero-based generated position.
    ///
    /// This is the last segment on `line` starting at or before `column`.
    #[must_use]
    pub fn lookup(&self, line: u32, column: u32) -> Option<&Segment> {
        let segments = self.lines.get(line as usize)?;
        let index = segments.partition_point(|segment| segment.column <= column);
        index.checked_sub(1).map(|i| &segments[i])
    }
}

fn join_root(root: &str, source: &str) -> String {
    if root.ends_with('/') {
        format!("{root}{source}")
    } else {
        format!("{root}/{source}")
    }
}

// ============================================================================
// Mappings
// ============================================================================

fn decode_mappings(mappings: &str, source_count: usize, name_count: usize) -> Result<Vec<Vec<Segment>>> {
    let mut lines = Vec::new();
    let mut source = 0i64;
    let mut source_line = 0i64;
    let mut source_column = 0i64;
    let mut name = 0i64;

    for line in mappings.split(';') {
        let mut column = 0i64;
        let mut segments = Vec::new();

        for text in line.split(',').filter(|s| !s.is_empty()) {
            let fields = decode_vlq(text)?;
            let original = match fields.as_slice() {
                [delta] => {
                    column += delta;
                    None
                }
                [delta, src, src_line, src_col, rest @ ..] if rest.len() <= 1 => {
                    column += delta;
                    source += src;
                    source_line += src_line;
                    source_column += src_col;
                    let name_index = match rest.first() {
                        Some(delta) => {
                            name += delta;
                            Some(index(name, name_count, "name")?)
                        }
                        None => None,
                    };
                    Some(SourcePosition {
                        source: index(source, source_count, "source")?,
                        line: non_negative(source_line)?,
                        column: non_negative(source_column)?,
                        name: name_index,
                    })
                }
                _ => {
                    return Err(Error::source_map(format!(
                        "segment \"{text}\" has {} fields",
                        fields.len()
                    )));
                }
            };

            segments.push(Segment {
                column: non_negative(column)?,
                original,
            });
        }

        segments.sort_by_key(|segment| segment.column);
        lines.push(segments);
    }

    Ok(lines)
}

fn index(value: i64, len: usize, what: &str) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| Error::source_map(format!("{what} index {value} out of range")))
}

fn non_negative(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::source_map(format!("negative position {value}")))
}

// ============================================================================
// VLQ
// ============================================================================

/// Decodes a base64 VLQ segment into its signed fields.
///
/// # Errors
///
/// Returns [`Error::SourceMap`] for characters outside the base64 alphabet,
/// truncated values or overflow.
pub fn decode_vlq(text: &str) -> Result<Vec<i64>> {
    let mut values = Vec::new();
    let mut value = 0i64;
    let mut shift = 0u32;

    for byte in text.bytes() {
        let digit = BASE64_ALPHABET
            .iter()
            .position(|&c| c == byte)
            .ok_or_else(|| Error::source_map(format!("invalid VLQ character {:?}", byte as char)))?
            as i64;

        if shift > 60 {
            return Err(Error::source_map("VLQ value overflow"));
        }
        value += (digit & VLQ_MASK) << shift;

        if digit & VLQ_CONTINUATION != 0 {
            shift += VLQ_SHIFT;
        } else {
            let negative = value & 1 == 1;
            let magnitude = value >> 1;
            values.push(if negative { -magnitude } else { magnitude });
            value = 0;
            shift = 0;
        }
    }

    if shift != 0 {
        return Err(Error::source_map(format!("truncated VLQ \"{text}\"")));
    }

    Ok(values)
}

/// Encodes signed fields as a base64 VLQ segment.
#[must_use]
pub fn encode_vlq(values: &[i64]) -> String {
    let mut out = String::new();
    for &value in values {
        let mut vlq = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
        loop {
            let mut digit = vlq & VLQ_MASK;
            vlq >>= VLQ_SHIFT;
            if vlq > 0 {
                digit |= VLQ_CONTINUATION;
            }
            out.push(BASE64_ALPHABET[digit as usize] as char);
            if vlq == 0 {
                break;
            }
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
