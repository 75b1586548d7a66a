//! Source-map data model.
//!
//! A map travels with a file in one of three interchangeable forms: the raw
//! V3 object, its JSON serialization, or a [`SourceMapBuilder`] holding
//! decoded segments. Conversions are idempotent and lossless, except that
//! string↔object round-trips go through JSON.

mod builder;
mod vlq;

pub use builder::{Segment, SourceLocation, SourceMapBuilder};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A raw Source Map V3 object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMapObject {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(rename = "sourceRoot", skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    pub sources: Vec<String>,
    #[serde(rename = "sourcesContent", skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    pub mappings: String,
}

/// Source-map data in whichever form it last took.
#[derive(Debug, Clone)]
pub enum SourceMapData {
    Object(SourceMapObject),
    Json(String),
    Builder(SourceMapBuilder),
}

impl SourceMapData {
    /// Coerce to the raw object form.
    pub fn to_object(&self) -> Result<SourceMapObject> {
        match self {
            SourceMapData::Object(o) => Ok(o.clone()),
            SourceMapData::Json(s) => {
                serde_json::from_str(s).map_err(|e| Error::SourceMap(e.to_string()))
            }
            SourceMapData::Builder(b) => Ok(b.to_object()),
        }
    }

    /// Coerce to the JSON string form.
    pub fn to_json(&self) -> Result<String> {
        match self {
            SourceMapData::Json(s) => Ok(s.clone()),
            other => {
                serde_json::to_string(&other.to_object()?).map_err(|e| Error::SourceMap(e.to_string()))
            }
        }
    }

    /// Coerce to the builder form.
    pub fn to_builder(&self) -> Result<SourceMapBuilder> {
        match self {
            SourceMapData::Builder(b) => Ok(b.clone()),
            other => SourceMapBuilder::from_object(&other.to_object()?),
        }
    }
}

impl From<SourceMapObject> for SourceMapData {
    fn from(o: SourceMapObject) -> Self {
        SourceMapData::Object(o)
    }
}

impl From<SourceMapBuilder> for SourceMapData {
    fn from(b: SourceMapBuilder) -> Self {
        SourceMapData::Builder(b)
    }
}

impl From<String> for SourceMapData {
    fn from(s: String) -> Self {
        SourceMapData::Json(s)
    }
}
