//! The file object.
//!
//! A [`File`] is one logical artifact flowing through a pipeline: source
//! path, mutable target path, lazily materialized content in either text or
//! binary form, source-map data, and diagnostic counters. Processors
//! mutate the file in place; `save` writes the artifact (and its map) with
//! the semantics of the engine's working mode.
//!
//! Content lives in four slots. The source pair (`src_buffer`,
//! `src_content`) is lifted from disk on first access; the dest pair holds
//! what processors produced. Writing one dest slot clears the other;
//! reading either derives it from whichever sibling is present, using the
//! file's encoding.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::diagnostic::{LogEntry, Severity};
use crate::engine::{Engine, WorkMode};
use crate::matcher::Matcher;
use crate::sourcemap::SourceMapData;
use crate::{fsx, pathx, urlx, Error, Result};

/// Files are shared between pipeline stages; the stage currently handling
/// a file is the only mutator.
pub type SharedFile = Arc<Mutex<File>>;

/// Text encoding used to move between the text and binary content slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    #[default]
    Utf8,
    /// UTF-8 with invalid sequences replaced instead of rejected.
    Utf8Lossy,
    Latin1,
}

impl Encoding {
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| Error::Encoding(e.to_string())),
            Encoding::Utf8Lossy => Ok(String::from_utf8_lossy(bytes).into_owned()),
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Utf8 | Encoding::Utf8Lossy => Ok(text.as_bytes().to_vec()),
            Encoding::Latin1 => text
                .chars()
                .map(|c| {
                    let v = c as u32;
                    if v <= 0xFF {
                        Ok(v as u8)
                    } else {
                        Err(Error::Encoding(format!(
                            "character {:?} is not representable in latin1",
                            c
                        )))
                    }
                })
                .collect(),
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "utf8-lossy" | "utf-8-lossy" => Ok(Encoding::Utf8Lossy),
            "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            other => Err(format!("unknown encoding: {}", other)),
        }
    }
}

/// File content in whichever form the caller produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum FileData {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<String> for FileData {
    fn from(s: String) -> Self {
        FileData::Text(s)
    }
}

impl From<&str> for FileData {
    fn from(s: &str) -> Self {
        FileData::Text(s.to_string())
    }
}

impl From<Vec<u8>> for FileData {
    fn from(b: Vec<u8>) -> Self {
        FileData::Bytes(b)
    }
}

/// Zero-based line/column position in a file's current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// Per-file overrides for source-map emission; unset fields fall back to
/// the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct SourceMapOverrides {
    pub enabled: Option<bool>,
    pub inline: Option<bool>,
    pub url_comment: Option<bool>,
    pub include_sources_content: Option<bool>,
    pub include_names: Option<bool>,
    pub source_root: Option<String>,
}

pub struct File {
    engine: Engine,
    /// Absolute source path; `None` for synthesized files. Immutable after
    /// construction.
    src_path: Option<PathBuf>,
    /// Current target path, relative to the working directory unless a
    /// processor made it absolute.
    path: PathBuf,
    src_buffer: Option<Vec<u8>>,
    src_content: Option<String>,
    dest_buffer: Option<Vec<u8>>,
    dest_content: Option<String>,
    encoding: Option<Encoding>,
    source_map: Option<SourceMapData>,
    map_overrides: SourceMapOverrides,
    error_count: u32,
    warning_count: u32,
    /// Byte offset of each line start in the current content.
    indexes: Option<Vec<usize>>,
}

impl File {
    /// Construct a file. Paths resolve against the engine's working
    /// directory; a file without `src_path` is *generated*. `data`, when
    /// given, populates a dest slot and marks the file modified.
    pub fn new(
        engine: Engine,
        src_path: Option<PathBuf>,
        path: Option<PathBuf>,
        data: Option<FileData>,
    ) -> Self {
        let src_path = src_path.map(|p| pathx::resolve_path(engine.cwd(), p));
        let path = path
            .or_else(|| {
                src_path
                    .as_ref()
                    .map(|s| pathx::relative_path(engine.cwd(), s))
            })
            .unwrap_or_else(|| PathBuf::from("generated"));
        let mut file = Self {
            engine,
            src_path,
            path,
            src_buffer: None,
            src_content: None,
            dest_buffer: None,
            dest_content: None,
            encoding: None,
            source_map: None,
            map_overrides: SourceMapOverrides::default(),
            error_count: 0,
            warning_count: 0,
            indexes: None,
        };
        if let Some(data) = data {
            file.set_data(data);
        }
        file
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn src_path(&self) -> Option<&Path> {
        self.src_path.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Retarget the file; processors use this to rename or move outputs.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// True iff the file was synthesized rather than scanned from disk.
    pub fn generated(&self) -> bool {
        self.src_path.is_none()
    }

    /// True once a processor produced output content or attached a map.
    pub fn modified(&self) -> bool {
        self.dest_buffer.is_some() || self.dest_content.is_some() || self.source_map.is_some()
    }

    pub fn exists(&self) -> bool {
        self.src_path.as_deref().is_some_and(Path::exists)
    }

    pub fn stats(&self) -> std::io::Result<std::fs::Metadata> {
        match &self.src_path {
            Some(src) => std::fs::metadata(src),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "generated file has no source",
            )),
        }
    }

    /// Extension of the target path, with the leading dot.
    pub fn ext(&self) -> String {
        pathx::get_ext(&self.path)
    }

    pub fn src_dir(&self) -> Option<PathBuf> {
        self.src_path.as_deref().map(pathx::get_dir)
    }

    /// Absolute target path, resolved against the working directory.
    pub fn dest_path(&self) -> PathBuf {
        self.engine.resolve(&self.path)
    }

    pub fn dest_dir(&self) -> PathBuf {
        pathx::get_dir(&self.dest_path())
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding.unwrap_or_else(|| self.engine.default_encoding())
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = Some(encoding);
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn warning_count(&self) -> u32 {
        self.warning_count
    }

    // --- content slots --------------------------------------------------

    /// Source bytes, lifted from disk on first access. Empty for generated
    /// files and in clean mode.
    pub fn src_buffer(&mut self) -> Result<&[u8]> {
        if self.src_buffer.is_none() {
            if let Some(text) = &self.src_content {
                self.src_buffer = Some(self.encoding().encode(text)?);
            } else if let Some(src) = self.src_path.clone() {
                if self.engine.mode() == WorkMode::Clean {
                    self.src_buffer = Some(Vec::new());
                } else {
                    self.src_buffer = Some(fsx::read_file_sync(&src)?);
                }
            } else {
                self.src_buffer = Some(Vec::new());
            }
        }
        Ok(self.src_buffer.as_deref().unwrap())
    }

    /// Source text, decoded from [`File::src_buffer`] on first access.
    pub fn src_content(&mut self) -> Result<&str> {
        if self.src_content.is_none() {
            let encoding = self.encoding();
            let bytes = self.src_buffer()?.to_vec();
            self.src_content = Some(encoding.decode(&bytes)?);
        }
        Ok(self.src_content.as_deref().unwrap())
    }

    /// Current bytes: the dest slot when modified, the source otherwise.
    pub fn buffer(&mut self) -> Result<&[u8]> {
        if self.dest_buffer.is_none() {
            if let Some(text) = &self.dest_content {
                self.dest_buffer = Some(self.encoding().encode(text)?);
            }
        }
        if self.dest_buffer.is_some() {
            return Ok(self.dest_buffer.as_deref().unwrap());
        }
        self.src_buffer()
    }

    /// Current text: the dest slot when modified, the source otherwise.
    pub fn content(&mut self) -> Result<&str> {
        if self.dest_content.is_none() {
            if let Some(bytes) = self.dest_buffer.clone() {
                self.dest_content = Some(self.encoding().decode(&bytes)?);
            }
        }
        if self.dest_content.is_some() {
            return Ok(self.dest_content.as_deref().unwrap());
        }
        self.src_content()
    }

    /// Current content in whichever form is already materialized, text
    /// preferred.
    pub fn data(&mut self) -> Result<FileData> {
        if let Some(text) = &self.dest_content {
            return Ok(FileData::Text(text.clone()));
        }
        if let Some(bytes) = &self.dest_buffer {
            return Ok(FileData::Bytes(bytes.clone()));
        }
        if self.src_content.is_some() {
            return Ok(FileData::Text(self.src_content.as_ref().unwrap().clone()));
        }
        Ok(FileData::Bytes(self.src_buffer()?.to_vec()))
    }

    /// Replace the output bytes; clears the text dest slot.
    pub fn set_buffer(&mut self, bytes: Vec<u8>) {
        self.dest_buffer = Some(bytes);
        self.dest_content = None;
        self.set_modified();
    }

    /// Replace the output text; clears the binary dest slot.
    pub fn set_content(&mut self, text: impl Into<String>) {
        self.dest_content = Some(text.into());
        self.dest_buffer = None;
        self.set_modified();
    }

    pub fn set_data(&mut self, data: FileData) {
        match data {
            FileData::Text(t) => self.set_content(t),
            FileData::Bytes(b) => self.set_buffer(b),
        }
    }

    /// Drop position caches after a content mutation.
    pub fn set_modified(&mut self) {
        self.indexes = None;
    }

    // --- positions ------------------------------------------------------

    fn ensure_indexes(&mut self) -> Result<()> {
        if self.indexes.is_some() {
            return Ok(());
        }
        let content = self.content()?;
        let mut starts = vec![0usize];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        self.indexes = Some(starts);
        Ok(())
    }

    /// Map a byte index in the current content to a line/column position.
    pub fn index_to_location(&mut self, index: usize) -> Result<Location> {
        self.ensure_indexes()?;
        let starts = self.indexes.as_ref().unwrap();
        let line = starts.partition_point(|&s| s <= index) - 1;
        Ok(Location {
            line,
            column: index - starts[line],
        })
    }

    /// Map a line/column position back to a byte index.
    pub fn location_to_index(&mut self, location: Location) -> Result<usize> {
        self.ensure_indexes()?;
        let starts = self.indexes.as_ref().unwrap();
        let line = location.line.min(starts.len() - 1);
        Ok(starts[line] + location.column)
    }

    // --- source maps ----------------------------------------------------

    pub fn source_map(&self) -> Option<&SourceMapData> {
        self.source_map.as_ref()
    }

    pub fn set_source_map(&mut self, map: impl Into<SourceMapData>) {
        self.source_map = Some(map.into());
    }

    pub fn map_overrides(&self) -> &SourceMapOverrides {
        &self.map_overrides
    }

    pub fn map_overrides_mut(&mut self) -> &mut SourceMapOverrides {
        &mut self.map_overrides
    }

    fn map_enabled(&self) -> bool {
        self.map_overrides
            .enabled
            .unwrap_or(self.engine.map_options().enabled)
    }

    fn map_inline(&self) -> bool {
        self.map_overrides
            .inline
            .unwrap_or(self.engine.map_options().inline)
    }

    fn map_url_comment(&self) -> bool {
        self.map_overrides
            .url_comment
            .unwrap_or(self.engine.map_options().url_comment)
    }

    fn map_include_sources_content(&self) -> bool {
        self.map_overrides
            .include_sources_content
            .unwrap_or(self.engine.map_options().include_sources_content)
    }

    fn map_include_names(&self) -> bool {
        self.map_overrides
            .include_names
            .unwrap_or(self.engine.map_options().include_names)
    }

    fn effective_source_root(&self) -> Option<String> {
        self.map_overrides
            .source_root
            .clone()
            .or_else(|| self.engine.map_options().source_root.clone())
    }

    /// Merge a newer map into the file's accumulated map.
    ///
    /// The newer map describes the latest transformation; composition
    /// redirects its origins through the accumulated map. A composition
    /// failure is demoted to a warning and the accumulated map is kept.
    pub fn apply_source_map(&mut self, map: impl Into<SourceMapData>) {
        let map = map.into();
        let Some(existing) = &self.source_map else {
            self.source_map = Some(map);
            return;
        };
        let composed = existing.to_builder().and_then(|inner| {
            let mut outer = map.to_builder()?;
            outer.apply_source_map(&inner);
            Ok(outer)
        });
        match composed {
            Ok(builder) => self.source_map = Some(SourceMapData::Builder(builder)),
            Err(e) => {
                self.warning(LogEntry::warning(format!("cannot compose source maps: {}", e)))
            }
        }
    }

    // --- diagnostics ----------------------------------------------------

    /// Attach an error to this file and report it. The pipeline continues.
    pub fn error(&mut self, entry: LogEntry) {
        let mut entry = entry;
        entry.severity = Severity::Error;
        self.localize_entry(&mut entry);
        self.error_count += 1;
        self.engine.record_error();
        entry.emit();
    }

    /// Attach a warning to this file and report it.
    pub fn warning(&mut self, entry: LogEntry) {
        let mut entry = entry;
        entry.severity = Severity::Warning;
        self.localize_entry(&mut entry);
        self.warning_count += 1;
        self.engine.record_warning();
        entry.emit();
    }

    /// Fill in path and content, and rewrite positions to the original
    /// source when a map is attached. An end position landing in a
    /// different source than the start is dropped.
    fn localize_entry(&mut self, entry: &mut LogEntry) {
        if entry.path.is_none() {
            entry.path = self.src_path.clone().or_else(|| Some(self.dest_path()));
        }
        let (Some(line), Some(column)) = (entry.start_line, entry.start_column) else {
            return;
        };
        if let Some(map) = &self.source_map {
            let Ok(builder) = map.to_builder() else {
                return;
            };
            let start = builder.get_source(line, column);
            let Some(source) = start.path.clone() else {
                return;
            };
            entry.path = Some(self.engine.resolve(&source));
            entry.start_line = Some(start.line);
            entry.start_column = Some(start.column);
            if let Some(content) = &start.content {
                entry.content = content.lines().nth(start.line as usize).map(str::to_string);
            }
            if let (Some(el), Some(ec)) = (entry.end_line, entry.end_column) {
                let end = builder.get_source(el, ec);
                if end.path.as_deref() == Some(source.as_str()) {
                    entry.end_line = Some(end.line);
                    entry.end_column = Some(end.column);
                } else {
                    entry.end_line = None;
                    entry.end_column = None;
                }
            }
        } else if entry.content.is_none() {
            if let Ok(content) = self.content() {
                entry.content = content.lines().nth(line as usize).map(str::to_string);
            }
        }
    }

    // --- dependencies ---------------------------------------------------

    /// Record that this file must be rebuilt when `target` changes.
    /// No-op for generated files.
    pub fn dep(&self, target: impl AsRef<Path>, log: Option<LogEntry>) {
        if let Some(src) = &self.src_path {
            let target = self.engine.resolve(target);
            self.engine.add_dep(src, &target, log);
        }
    }

    /// Record a reference edge: `target` changes only refresh this file's
    /// content. No-op for generated files.
    pub fn reference(&self, target: impl AsRef<Path>, log: Option<LogEntry>) {
        if let Some(src) = &self.src_path {
            let target = self.engine.resolve(target);
            self.engine.add_ref(src, &target, log);
        }
    }

    // --- misc -----------------------------------------------------------

    /// Copy paths, current data, and map into a new file with fresh
    /// diagnostic counters.
    pub fn clone_file(&self) -> File {
        let mut file = File::new(
            self.engine.clone(),
            self.src_path.clone(),
            Some(self.path.clone()),
            None,
        );
        file.encoding = self.encoding;
        file.src_buffer = self.src_buffer.clone();
        file.src_content = self.src_content.clone();
        file.dest_buffer = self.dest_buffer.clone();
        file.dest_content = self.dest_content.clone();
        file.source_map = self.source_map.clone();
        file.map_overrides = self.map_overrides.clone();
        file
    }

    /// Test the target path against a matcher.
    pub fn matches(&self, matcher: &Matcher) -> bool {
        matcher.matches_path(&self.path)
    }

    /// Resolve a URL against this file's target path, preserving query and
    /// fragment.
    pub fn resolve_url(&self, url: &str) -> String {
        urlx::resolve_url(&pathx::to_slash_string(&self.path), url)
    }

    /// URL of `to` relative to this file's target path.
    pub fn relative_url(&self, to: &str) -> String {
        urlx::relative_url(&pathx::to_slash_string(&self.path), to)
    }

    // --- async operations ----------------------------------------------

    /// Read the source into the buffer slot, unless content is already
    /// present, the file is generated, or the mode is clean. Read failures
    /// attach to the file; the pipeline continues.
    pub async fn load(this: &SharedFile) -> Result<()> {
        let (engine, src, needed) = {
            let file = this.lock();
            (
                file.engine.clone(),
                file.src_path.clone(),
                file.src_buffer.is_none() && file.src_content.is_none(),
            )
        };
        let Some(src) = src else {
            return Ok(());
        };
        if !needed || engine.mode() == WorkMode::Clean {
            return Ok(());
        }
        match fsx::read_file(&src).await {
            Ok(bytes) => {
                this.lock().src_buffer = Some(bytes);
            }
            Err(e) => {
                this.lock().error(LogEntry::error(format!(
                    "cannot read {}: {}",
                    src.display(),
                    e
                )));
            }
        }
        Ok(())
    }

    /// Save the artifact under `dir` (resolved against the working
    /// directory) with the semantics of the engine's working mode. See the
    /// module docs for the full sequence: save filter, overwrite guard,
    /// mode dispatch, map assembly, and emission.
    pub async fn save(this: &SharedFile, dir: Option<&Path>) -> Result<()> {
        let engine = this.lock().engine.clone();

        let save_path = {
            let file = this.lock();
            let base = pathx::resolve_path(engine.cwd(), dir.unwrap_or(Path::new(".")));
            pathx::resolve_path(&base, &file.path)
        };

        if let Some(filter) = &engine.hooks().save_filter {
            let file = this.lock();
            if !filter(&file, &save_path) {
                return Ok(());
            }
        }

        let (src_path, modified, will_emit_map) = {
            let file = this.lock();
            (
                file.src_path.clone(),
                file.dest_buffer.is_some() || file.dest_content.is_some(),
                file.map_enabled() && file.source_map.is_some(),
            )
        };

        // Overwrite guard: saving a file onto its own source.
        if let Some(src) = &src_path {
            if pathx::path_equals(src, &save_path) {
                if !modified && !will_emit_map {
                    return Ok(());
                }
                if !engine.overwrite() {
                    this.lock().error(LogEntry::error(format!(
                        "EEXIST: refusing to overwrite source {}",
                        save_path.display()
                    )));
                    return Ok(());
                }
            }
        }

        let map_path = map_sibling(&save_path);

        match engine.mode() {
            WorkMode::Clean => {
                fsx::delete_file(&save_path).await?;
                fsx::delete_file(&map_path).await?;
                fsx::delete_parent_dir_if_empty(&save_path, Some(engine.cwd())).await?;
                engine.add_processed();
                return Ok(());
            }
            WorkMode::Preview => {
                engine.add_processed();
                return Ok(());
            }
            WorkMode::Build | WorkMode::Watch => {}
        }

        let map_json = if will_emit_map {
            let mut file = this.lock();
            match file.assemble_map(&save_path, &map_path) {
                Ok(json) => Some(json),
                Err(e) => {
                    file.warning(LogEntry::warning(format!("skipping source map: {}", e)));
                    None
                }
            }
        } else {
            None
        };

        // Unmodified content with no map goes straight through the file
        // capability as a copy.
        if !modified && map_json.is_none() {
            if let Some(src) = &src_path {
                match fsx::copy_file(src, &save_path).await {
                    Ok(()) => {
                        engine.record_output(src, &save_path);
                        engine.add_processed();
                    }
                    Err(e) => this.lock().error(LogEntry::error(format!(
                        "cannot write {}: {}",
                        save_path.display(),
                        e
                    ))),
                }
                return Ok(());
            }
        }

        let (bytes, inline, url_comment) = {
            let mut file = this.lock();
            let bytes = file.buffer().map(|b| b.to_vec());
            (bytes, file.map_inline(), file.map_url_comment())
        };
        let mut bytes = match bytes {
            Ok(b) => b,
            Err(e) => {
                this.lock().error(LogEntry::error(format!(
                    "cannot read content for {}: {}",
                    save_path.display(),
                    e
                )));
                return Ok(());
            }
        };

        if let Some(json) = &map_json {
            if url_comment {
                let url = if inline {
                    urlx::base64_uri("application/json", json.as_bytes())
                } else {
                    engine
                        .hooks()
                        .source_map_url
                        .as_ref()
                        .and_then(|hook| hook(&map_path))
                        .unwrap_or_else(|| default_map_url(&save_path, &map_path))
                };
                let comment = if is_line_comment_path(&save_path) {
                    format!("\n//# sourceMappingURL={}", url)
                } else {
                    format!("\n/*# sourceMappingURL={} */", url)
                };
                bytes.extend_from_slice(comment.as_bytes());
            }
        }

        match fsx::write_file(&save_path, &bytes).await {
            Ok(()) => {
                let mut wrote_map = false;
                if let Some(json) = &map_json {
                    if !inline {
                        match fsx::write_file(&map_path, json.as_bytes()).await {
                            Ok(()) => wrote_map = true,
                            Err(e) => this.lock().error(LogEntry::error(format!(
                                "cannot write {}: {}",
                                map_path.display(),
                                e
                            ))),
                        }
                    }
                }
                let key = src_path.clone().unwrap_or_else(|| save_path.clone());
                engine.record_output(&key, &save_path);
                if wrote_map {
                    engine.record_output(&key, &map_path);
                }
                engine.add_processed();
            }
            Err(e) => this.lock().error(LogEntry::error(format!(
                "cannot write {}: {}",
                save_path.display(),
                e
            ))),
        }
        Ok(())
    }

    /// Remove the source file, optionally pruning parent directories that
    /// become empty.
    pub async fn delete(this: &SharedFile, remove_empty_dirs: bool) -> Result<()> {
        let (engine, src) = {
            let file = this.lock();
            (file.engine.clone(), file.src_path.clone())
        };
        let Some(src) = src else {
            engine.add_processed();
            return Ok(());
        };
        if engine.mode() != WorkMode::Preview {
            match fsx::delete_file(&src).await {
                Ok(removed) => {
                    if removed && remove_empty_dirs {
                        fsx::delete_parent_dir_if_empty(&src, Some(engine.cwd())).await?;
                    }
                }
                Err(e) => this.lock().error(LogEntry::error(format!(
                    "cannot delete {}: {}",
                    src.display(),
                    e
                ))),
            }
        }
        engine.add_processed();
        Ok(())
    }

    /// Produce the serialized map for emission: rewritten sources, content
    /// embedding per the effective flags, and the validation hook's final
    /// say.
    fn assemble_map(&mut self, save_path: &Path, map_path: &Path) -> Result<String> {
        let engine = self.engine.clone();
        let builder = self
            .source_map
            .as_ref()
            .ok_or_else(|| Error::SourceMap("no source map attached".to_string()))?
            .to_builder()?;
        let mut object = builder.to_object();
        object.version = 3;
        object.file = save_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());

        let source_root = self.effective_source_root();
        let map_dir = pathx::get_dir(map_path);
        let abs_sources: Vec<PathBuf> =
            object.sources.iter().map(|s| engine.resolve(s)).collect();

        object.sources = abs_sources
            .iter()
            .map(|abs| {
                engine
                    .hooks()
                    .source_map_source
                    .as_ref()
                    .and_then(|hook| hook(abs))
                    .unwrap_or_else(|| {
                        let base = match &source_root {
                            Some(root) => engine.resolve(root),
                            None => map_dir.clone(),
                        };
                        pathx::to_slash_string(&pathx::relative_path(&base, abs))
                    })
            })
            .collect();
        object.source_root = source_root;

        if self.map_include_sources_content() {
            let contents: Vec<Option<String>> = abs_sources
                .iter()
                .enumerate()
                .map(|(i, abs)| {
                    engine
                        .hooks()
                        .source_map_source_content
                        .as_ref()
                        .and_then(|hook| hook(abs))
                        .or_else(|| builder.source_content(i as u32).map(str::to_string))
                        .or_else(|| {
                            fsx::read_file_sync(abs)
                                .ok()
                                .map(|b| String::from_utf8_lossy(&b).into_owned())
                        })
                })
                .collect();
            if contents.iter().any(Option::is_some) {
                object.sources_content = Some(contents);
            }
        } else {
            object.sources_content = None;
        }

        if !self.map_include_names() {
            object.names = None;
        }

        if let Some(hook) = &engine.hooks().source_map_validate {
            hook(self, &mut object);
        }

        Ok(serde_json::to_string(&object)?)
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("src_path", &self.src_path)
            .field("path", &self.path)
            .field("modified", &self.modified())
            .field("errors", &self.error_count)
            .finish()
    }
}

/// The sibling map path: `<output>.map`.
fn map_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".map");
    PathBuf::from(os)
}

/// Line comments only work where the output syntax has them.
fn is_line_comment_path(path: &Path) -> bool {
    matches!(pathx::get_ext(path).as_str(), ".js" | ".mjs" | ".cjs" | ".jsx")
}

fn default_map_url(save_path: &Path, map_path: &Path) -> String {
    pathx::to_slash_string(&pathx::relative_path(&pathx::get_dir(save_path), map_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use tempfile::TempDir;

    fn test_engine(dir: &TempDir) -> Engine {
        Engine::new(EngineOptions {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
    }

    #[test]
    fn test_content_buffer_roundtrip() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let mut file = File::new(engine, None, Some(PathBuf::from("a.txt")), None);

        file.set_content("héllo");
        assert_eq!(file.buffer().unwrap(), "héllo".as_bytes());

        file.set_buffer(b"bye".to_vec());
        assert_eq!(file.content().unwrap(), "bye");
    }

    #[test]
    fn test_binary_buffer_preserved() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let mut file = File::new(engine, None, Some(PathBuf::from("blob.bin")), None);

        let bytes = vec![0u8, 159, 146, 150, 255];
        file.set_buffer(bytes.clone());
        assert_eq!(file.buffer().unwrap(), bytes.as_slice());
        // Invalid UTF-8 refuses to decode rather than corrupting bytes.
        assert!(file.content().is_err());
        assert_eq!(file.buffer().unwrap(), bytes.as_slice());
    }

    #[test]
    fn test_latin1_roundtrip() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let mut file = File::new(engine, None, Some(PathBuf::from("a.txt")), None);
        file.set_encoding(Encoding::Latin1);
        file.set_buffer(vec![0xE9, 0x21]);
        assert_eq!(file.content().unwrap(), "é!");
    }

    #[test]
    fn test_modified_tracks_dest_slots() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let mut file = File::new(
            engine,
            Some(dir.path().join("a.txt")),
            None,
            None,
        );
        assert!(!file.modified());
        // Reading source content does not mark the file modified.
        assert_eq!(file.content().unwrap(), "hi");
        assert!(!file.modified());
        file.set_content("HI");
        assert!(file.modified());
    }

    #[test]
    fn test_generated_file_boundaries() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let mut file = File::new(engine, None, Some(PathBuf::from("synth.txt")), None);
        assert!(file.generated());
        assert!(!file.exists());
        assert!(file.stats().is_err());
        assert_eq!(file.src_buffer().unwrap(), b"");
    }

    #[test]
    fn test_data_constructor_marks_modified() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let file = File::new(
            engine,
            None,
            Some(PathBuf::from("a.txt")),
            Some(FileData::Text("x".to_string())),
        );
        assert!(file.modified());
    }

    #[test]
    fn test_lazy_load_from_disk() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        std::fs::write(dir.path().join("lazy.txt"), "lazy").unwrap();
        let mut file = File::new(engine, Some(dir.path().join("lazy.txt")), None, None);
        assert_eq!(file.content().unwrap(), "lazy");
        assert_eq!(file.path(), Path::new("lazy.txt"));
    }

    #[test]
    fn test_index_location_roundtrip() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let mut file = File::new(
            engine,
            None,
            Some(PathBuf::from("a.txt")),
            Some(FileData::Text("ab\ncd\ne".to_string())),
        );
        assert_eq!(file.index_to_location(0).unwrap(), Location { line: 0, column: 0 });
        assert_eq!(file.index_to_location(4).unwrap(), Location { line: 1, column: 1 });
        assert_eq!(file.location_to_index(Location { line: 2, column: 0 }).unwrap(), 6);
    }

    #[test]
    fn test_set_modified_invalidates_indexes() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let mut file = File::new(
            engine,
            None,
            Some(PathBuf::from("a.txt")),
            Some(FileData::Text("one\ntwo".to_string())),
        );
        assert_eq!(file.index_to_location(4).unwrap().line, 1);
        file.set_content("onetwo");
        assert_eq!(file.index_to_location(4).unwrap().line, 0);
    }

    #[test]
    fn test_apply_source_map_composes() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let mut file = File::new(engine, None, Some(PathBuf::from("a.js")), None);

        let mut first = crate::sourcemap::SourceMapBuilder::new();
        first.add_mapping(0, 0, Some(("a.js", 4, 2)), None);
        file.apply_source_map(first);

        let mut second = crate::sourcemap::SourceMapBuilder::new();
        second.add_mapping(0, 6, Some(("intermediate", 0, 0)), None);
        file.apply_source_map(second);

        let builder = file.source_map().unwrap().to_builder().unwrap();
        let loc = builder.get_source(0, 6);
        assert_eq!(loc.path.as_deref(), Some("a.js"));
        assert_eq!((loc.line, loc.column), (4, 2));
    }

    #[test]
    fn test_error_localizes_through_map() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let mut file = File::new(engine.clone(), None, Some(PathBuf::from("a.js")), None);

        let mut map = crate::sourcemap::SourceMapBuilder::new();
        map.add_mapping(0, 0, Some(("orig.js", 9, 3)), None);
        file.set_source_map(map);

        // Capture localization through a copy of the entry flow.
        let mut entry = LogEntry::error("boom").with_start(0, 5);
        file.localize_entry(&mut entry);
        assert_eq!(entry.path, Some(engine.resolve("orig.js")));
        assert_eq!(entry.start_line, Some(9));
        assert_eq!(entry.start_column, Some(3));

        file.error(LogEntry::error("boom"));
        assert_eq!(file.error_count(), 1);
        assert_eq!(engine.error_count(), 1);
    }

    #[test]
    fn test_end_position_dropped_across_sources() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let mut file = File::new(engine, None, Some(PathBuf::from("bundle.js")), None);

        let mut map = crate::sourcemap::SourceMapBuilder::new();
        map.add_mapping(0, 0, Some(("a.js", 0, 0)), None);
        map.add_mapping(1, 0, Some(("b.js", 0, 0)), None);
        file.set_source_map(map);

        let mut entry = LogEntry::error("spans files").with_start(0, 2).with_end(1, 2);
        file.localize_entry(&mut entry);
        assert_eq!(entry.start_line, Some(0));
        assert!(entry.end_line.is_none());
        assert!(entry.end_column.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_source_attaches_error() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let file = engine.file(Some(dir.path().join("absent.txt")), None, None);
        File::load(&file).await.unwrap();
        assert_eq!(file.lock().error_count(), 1);
    }

    #[tokio::test]
    async fn test_load_generated_is_noop() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let file = engine.file(None, Some(PathBuf::from("synth.txt")), None);
        File::load(&file).await.unwrap();
        assert_eq!(file.lock().error_count(), 0);
    }
}
