//! Mutable source-map builder.
//!
//! Holds decoded mappings as per-line segment lists with deduplicated,
//! indexed source and name tables. Processors add mappings as they rewrite
//! content; composition with an upstream map replaces each segment's origin
//! with the upstream origin.

use rustc_hash::FxHashMap;

use super::vlq;
use super::SourceMapObject;
use crate::Result;

/// One decoded mapping segment. All positions are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub gen_col: u32,
    pub source: Option<u32>,
    pub orig_line: u32,
    pub orig_col: u32,
    pub name: Option<u32>,
}

/// Original position resolved through a map.
///
/// `path` is `None` when the generated position had no mapping, in which
/// case `line`/`column` echo the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub path: Option<String>,
    pub content: Option<String>,
    pub line: u32,
    pub column: u32,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceMapBuilder {
    pub file: Option<String>,
    pub source_root: Option<String>,
    sources: Vec<String>,
    source_index: FxHashMap<String, u32>,
    sources_content: Vec<Option<String>>,
    names: Vec<String>,
    name_index: FxHashMap<String, u32>,
    /// Segments per generated line, kept sorted by generated column.
    lines: Vec<Vec<Segment>>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Intern a source path, returning its index.
    pub fn add_source(&mut self, source: &str) -> u32 {
        if let Some(&i) = self.source_index.get(source) {
            return i;
        }
        let i = self.sources.len() as u32;
        self.sources.push(source.to_string());
        self.sources_content.push(None);
        self.source_index.insert(source.to_string(), i);
        i
    }

    /// Attach original content for an interned source.
    pub fn set_source_content(&mut self, index: u32, content: impl Into<String>) {
        if let Some(slot) = self.sources_content.get_mut(index as usize) {
            *slot = Some(content.into());
        }
    }

    pub fn source_content(&self, index: u32) -> Option<&str> {
        self.sources_content
            .get(index as usize)
            .and_then(|c| c.as_deref())
    }

    /// Intern a name, returning its index.
    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(&i) = self.name_index.get(name) {
            return i;
        }
        let i = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_index.insert(name.to_string(), i);
        i
    }

    /// Record a mapping from a generated position to an original one.
    ///
    /// `original` is `(source, line, column)`; pass `None` for a segment
    /// that marks generated content with no origin.
    pub fn add_mapping(
        &mut self,
        gen_line: u32,
        gen_col: u32,
        original: Option<(&str, u32, u32)>,
        name: Option<&str>,
    ) {
        let (source, orig_line, orig_col) = match original {
            Some((src, line, col)) => (Some(self.add_source(src)), line, col),
            None => (None, 0, 0),
        };
        let name = name.map(|n| self.add_name(n));
        let segment = Segment {
            gen_col,
            source,
            orig_line,
            orig_col,
            name,
        };
        while self.lines.len() <= gen_line as usize {
            self.lines.push(Vec::new());
        }
        let line = &mut self.lines[gen_line as usize];
        let at = line.partition_point(|s| s.gen_col <= gen_col);
        line.insert(at, segment);
    }

    /// The greatest segment at or before `col` on `line`, if any.
    fn lookup(&self, line: u32, col: u32) -> Option<&Segment> {
        let segments = self.lines.get(line as usize)?;
        let at = segments.partition_point(|s| s.gen_col <= col);
        if at == 0 {
            None
        } else {
            Some(&segments[at - 1])
        }
    }

    /// Resolve a generated position to its original source position.
    pub fn get_source(&self, line: u32, column: u32) -> SourceLocation {
        let fallthrough = SourceLocation {
            path: None,
            content: None,
            line,
            column,
            name: None,
        };
        let Some(segment) = self.lookup(line, column) else {
            return fallthrough;
        };
        let Some(source) = segment.source else {
            return fallthrough;
        };
        SourceLocation {
            path: self.sources.get(source as usize).cloned(),
            content: self.source_content(source).map(str::to_string),
            line: segment.orig_line,
            column: segment.orig_col,
            name: segment
                .name
                .and_then(|n| self.names.get(n as usize).cloned()),
        }
    }

    /// Compose with `inner`, the map produced by the previous
    /// transformation step.
    ///
    /// Every segment whose origin falls inside `inner`'s generated space is
    /// redirected to `inner`'s origin; segments `inner` does not cover are
    /// left unchanged. `inner`'s sources and names are absorbed.
    pub fn apply_source_map(&mut self, inner: &SourceMapBuilder) {
        let mut lines = std::mem::take(&mut self.lines);
        for segments in &mut lines {
            for segment in segments.iter_mut() {
                if segment.source.is_none() {
                    continue;
                }
                let Some(inner_seg) = inner.lookup(segment.orig_line, segment.orig_col) else {
                    continue;
                };
                let Some(inner_source) = inner_seg.source else {
                    continue;
                };
                let Some(source_path) = inner.sources.get(inner_source as usize) else {
                    continue;
                };
                let new_index = self.add_source(source_path);
                if let Some(content) = inner.source_content(inner_source) {
                    if self.source_content(new_index).is_none() {
                        let content = content.to_string();
                        self.set_source_content(new_index, content);
                    }
                }
                segment.source = Some(new_index);
                segment.orig_line = inner_seg.orig_line;
                segment.orig_col = inner_seg.orig_col;
                if let Some(inner_name) = inner_seg.name {
                    if let Some(name) = inner.names.get(inner_name as usize) {
                        let name = name.clone();
                        segment.name = Some(self.add_name(&name));
                    }
                }
            }
        }
        self.lines = lines;
    }

    /// Serialize to a raw V3 object.
    pub fn to_object(&self) -> SourceMapObject {
        let mut mappings = String::new();
        let mut prev_source: i64 = 0;
        let mut prev_orig_line: i64 = 0;
        let mut prev_orig_col: i64 = 0;
        let mut prev_name: i64 = 0;

        for (line_no, segments) in self.lines.iter().enumerate() {
            if line_no > 0 {
                mappings.push(';');
            }
            let mut prev_gen_col: i64 = 0;
            for (i, segment) in segments.iter().enumerate() {
                if i > 0 {
                    mappings.push(',');
                }
                vlq::encode(segment.gen_col as i64 - prev_gen_col, &mut mappings);
                prev_gen_col = segment.gen_col as i64;
                if let Some(source) = segment.source {
                    vlq::encode(source as i64 - prev_source, &mut mappings);
                    prev_source = source as i64;
                    vlq::encode(segment.orig_line as i64 - prev_orig_line, &mut mappings);
                    prev_orig_line = segment.orig_line as i64;
                    vlq::encode(segment.orig_col as i64 - prev_orig_col, &mut mappings);
                    prev_orig_col = segment.orig_col as i64;
                    if let Some(name) = segment.name {
                        vlq::encode(name as i64 - prev_name, &mut mappings);
                        prev_name = name as i64;
                    }
                }
            }
        }

        let sources_content = if self.sources_content.iter().any(Option::is_some) {
            Some(self.sources_content.clone())
        } else {
            None
        };
        let names = if self.names.is_empty() {
            None
        } else {
            Some(self.names.clone())
        };

        SourceMapObject {
            version: 3,
            file: self.file.clone(),
            source_root: self.source_root.clone(),
            sources: self.sources.clone(),
            sources_content,
            names,
            mappings,
        }
    }

    /// Parse a raw V3 object back into builder form.
    pub fn from_object(object: &SourceMapObject) -> Result<Self> {
        let mut builder = SourceMapBuilder {
            file: object.file.clone(),
            source_root: object.source_root.clone(),
            ..Default::default()
        };
        // Tables are copied positionally; decoded indices refer to the
        // object's ordering, duplicates included.
        builder.sources = object.sources.clone();
        builder.sources_content = match &object.sources_content {
            Some(content) => {
                let mut content = content.clone();
                content.resize(builder.sources.len(), None);
                content
            }
            None => vec![None; builder.sources.len()],
        };
        for (i, source) in builder.sources.iter().enumerate() {
            builder.source_index.entry(source.clone()).or_insert(i as u32);
        }
        builder.names = object.names.clone().unwrap_or_default();
        for (i, name) in builder.names.iter().enumerate() {
            builder.name_index.entry(name.clone()).or_insert(i as u32);
        }

        let bytes = object.mappings.as_bytes();
        let mut pos = 0usize;
        let mut line = 0u32;
        let mut segments: Vec<Segment> = Vec::new();
        let mut gen_col: i64 = 0;
        let mut source: i64 = 0;
        let mut orig_line: i64 = 0;
        let mut orig_col: i64 = 0;
        let mut name: i64 = 0;

        loop {
            match bytes.get(pos) {
                None | Some(b';') => {
                    segments.sort_by_key(|s| s.gen_col);
                    while builder.lines.len() <= line as usize {
                        builder.lines.push(Vec::new());
                    }
                    builder.lines[line as usize] = std::mem::take(&mut segments);
                    if bytes.get(pos).is_none() {
                        break;
                    }
                    pos += 1;
                    line += 1;
                    gen_col = 0;
                }
                Some(b',') => {
                    pos += 1;
                }
                Some(_) => {
                    gen_col += vlq::decode(bytes, &mut pos)?;
                    let mut segment = Segment {
                        gen_col: gen_col.max(0) as u32,
                        source: None,
                        orig_line: 0,
                        orig_col: 0,
                        name: None,
                    };
                    if !matches!(bytes.get(pos), None | Some(b';') | Some(b',')) {
                        source += vlq::decode(bytes, &mut pos)?;
                        orig_line += vlq::decode(bytes, &mut pos)?;
                        orig_col += vlq::decode(bytes, &mut pos)?;
                        segment.source = Some(source.max(0) as u32);
                        segment.orig_line = orig_line.max(0) as u32;
                        segment.orig_col = orig_col.max(0) as u32;
                        if !matches!(bytes.get(pos), None | Some(b';') | Some(b',')) {
                            name += vlq::decode(bytes, &mut pos)?;
                            segment.name = Some(name.max(0) as u32);
                        }
                    }
                    segments.push(segment);
                }
            }
        }

        // Drop trailing empty lines introduced by the final flush so that
        // an empty mappings string round-trips to an empty builder.
        while builder.lines.last().is_some_and(Vec::is_empty) {
            builder.lines.pop();
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_mapping_and_lookup() {
        let mut b = SourceMapBuilder::new();
        b.add_mapping(0, 0, Some(("a.js", 0, 0)), None);
        b.add_mapping(0, 10, Some(("a.js", 0, 5)), Some("foo"));

        let loc = b.get_source(0, 12);
        assert_eq!(loc.path.as_deref(), Some("a.js"));
        assert_eq!((loc.line, loc.column), (0, 5));
        assert_eq!(loc.name.as_deref(), Some("foo"));

        let exact = b.get_source(0, 10);
        assert_eq!((exact.line, exact.column), (0, 5));
    }

    #[test]
    fn test_get_source_fallthrough() {
        let mut b = SourceMapBuilder::new();
        b.add_mapping(1, 4, Some(("a.js", 0, 0)), None);

        // No segment on the queried line: position echoes back.
        let loc = b.get_source(0, 7);
        assert!(loc.path.is_none());
        assert_eq!((loc.line, loc.column), (0, 7));

        // Segment exists but starts after the queried column.
        let loc = b.get_source(1, 2);
        assert!(loc.path.is_none());
        assert_eq!((loc.line, loc.column), (1, 2));
    }

    #[test]
    fn test_object_roundtrip() {
        let mut b = SourceMapBuilder::new();
        b.add_mapping(0, 0, Some(("src/a.js", 0, 0)), None);
        b.add_mapping(0, 8, Some(("src/a.js", 0, 8)), Some("x"));
        b.add_mapping(2, 4, Some(("src/b.js", 1, 0)), None);
        let index = b.add_source("src/a.js");
        b.set_source_content(index, "var x = 1;");

        let object = b.to_object();
        assert_eq!(object.version, 3);
        let reparsed = SourceMapBuilder::from_object(&object).unwrap();
        assert_eq!(reparsed.to_object(), object);
    }

    #[test]
    fn test_composition() {
        // inner: intermediate -> original
        let mut inner = SourceMapBuilder::new();
        inner.add_mapping(0, 0, Some(("orig.js", 3, 2)), Some("answer"));

        // outer: final -> intermediate
        let mut outer = SourceMapBuilder::new();
        outer.add_mapping(0, 5, Some(("mid.js", 0, 0)), None);
        outer.add_mapping(0, 9, Some(("other.js", 7, 7)), None);

        outer.apply_source_map(&inner);

        let loc = outer.get_source(0, 5);
        assert_eq!(loc.path.as_deref(), Some("orig.js"));
        assert_eq!((loc.line, loc.column), (3, 2));
        assert_eq!(loc.name.as_deref(), Some("answer"));

        // Not covered by inner: left unchanged.
        let loc = outer.get_source(0, 9);
        assert_eq!(loc.path.as_deref(), Some("other.js"));
        assert_eq!((loc.line, loc.column), (7, 7));
    }

    #[test]
    fn test_empty_mappings_roundtrip() {
        let b = SourceMapBuilder::from_object(&SourceMapObject {
            version: 3,
            mappings: String::new(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(b.to_object().mappings, "");
    }
}
