//! Bulk-load metadata JSON descriptor (spec.md §6 "Metadata JSON"), as a
//! `serde`-derived document rather than hand-rolled parsing.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{GraphError, Result};
use crate::loader::csv_reader::CsvSpecialChars;
use crate::types::Multiplicity;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsvSpecialCharsDoc {
    #[serde(default = "default_sep")]
    token_separator: String,
    #[serde(default = "default_quote")]
    quote_char: String,
    #[serde(default = "default_escape")]
    escape_char: String,
}

fn default_sep() -> String {
    ",".to_string()
}
fn default_quote() -> String {
    "\"".to_string()
}
fn default_escape() -> String {
    "\"".to_string()
}

impl CsvSpecialCharsDoc {
    fn resolve(&self) -> Result<CsvSpecialChars> {
        Ok(CsvSpecialChars {
            token_separator: one_byte(&self.token_separator)?,
            quote_char: one_byte(&self.quote_char)?,
            escape_char: one_byte(&self.escape_char)?,
        })
    }
}

fn one_byte(s: &str) -> Result<u8> {
    let bytes = s.as_bytes();
    if bytes.len() != 1 {
        return Err(GraphError::Parser(format!(
            "csvSpecialChars value '{s}' must be exactly one byte"
        )));
    }
    Ok(bytes[0])
}

impl Default for CsvSpecialCharsDoc {
    fn default() -> Self {
        Self {
            token_separator: default_sep(),
            quote_char: default_quote(),
            escape_char: default_escape(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeFileDescriptionDoc {
    file_path: String,
    label_name: String,
    primary_key_property_name: String,
    #[serde(default)]
    csv_special_chars: CsvSpecialCharsDoc,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelFileDescriptionDoc {
    file_path: String,
    label_name: String,
    rel_multiplicity: String,
    src_node_label_names: Vec<String>,
    dst_node_label_names: Vec<String>,
    #[serde(default)]
    csv_special_chars: CsvSpecialCharsDoc,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetMetadataDoc {
    #[serde(default)]
    node_file_descriptions: Vec<NodeFileDescriptionDoc>,
    #[serde(default)]
    rel_file_descriptions: Vec<RelFileDescriptionDoc>,
}

/// Resolved `(fwd, bwd)` multiplicity pair for the source-document's
/// `"ONE_ONE" | "ONE_MANY" | "MANY_ONE" | "MANY_MANY"` token. Read as
/// `<FWD>_<BWD>`: `ONE_MANY` means one source node relates to many
/// destination nodes, so FWD (walking from source) is single-valued
/// (ONE) and BWD (walking from destination back to source) is
/// multi-valued (MANY). This direction of the Open Question is recorded
/// in DESIGN.md.
fn parse_multiplicity(raw: &str) -> Result<(Multiplicity, Multiplicity)> {
    match raw {
        "ONE_ONE" => Ok((Multiplicity::One, Multiplicity::One)),
        "ONE_MANY" => Ok((Multiplicity::One, Multiplicity::Many)),
        "MANY_ONE" => Ok((Multiplicity::Many, Multiplicity::One)),
        "MANY_MANY" => Ok((Multiplicity::Many, Multiplicity::Many)),
        other => Err(GraphError::Parser(format!(
            "unknown relMultiplicity '{other}'"
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct NodeFileDescription {
    pub file_path: PathBuf,
    pub label_name: String,
    pub primary_key_property_name: String,
    pub csv_special_chars: CsvSpecialChars,
}

#[derive(Debug, Clone)]
pub struct RelFileDescription {
    pub file_path: PathBuf,
    pub label_name: String,
    pub fwd_multiplicity: Multiplicity,
    pub bwd_multiplicity: Multiplicity,
    pub src_node_label_names: Vec<String>,
    pub dst_node_label_names: Vec<String>,
    pub csv_special_chars: CsvSpecialChars,
}

#[derive(Debug, Clone, Default)]
pub struct DatasetMetadata {
    pub node_file_descriptions: Vec<NodeFileDescription>,
    pub rel_file_descriptions: Vec<RelFileDescription>,
}

impl DatasetMetadata {
    /// Reads and parses `metadata.json` under `input_dir`
    /// (spec.md §6, §4.6 Pass 1). Relative `filePath` entries resolve
    /// against `input_dir`.
    pub fn load(input_dir: &Path) -> Result<Self> {
        let path = input_dir.join("metadata.json");
        let text = std::fs::read_to_string(&path).map_err(|e| {
            GraphError::Parser(format!("cannot read {}: {e}", path.display()))
        })?;
        let doc: DatasetMetadataDoc = serde_json::from_str(&text)
            .map_err(|e| GraphError::Parser(format!("metadata.json parse error: {e}")))?;

        let mut node_file_descriptions = Vec::with_capacity(doc.node_file_descriptions.len());
        for n in doc.node_file_descriptions {
            node_file_descriptions.push(NodeFileDescription {
                file_path: input_dir.join(&n.file_path),
                label_name: n.label_name,
                primary_key_property_name: n.primary_key_property_name,
                csv_special_chars: n.csv_special_chars.resolve()?,
            });
        }

        let mut rel_file_descriptions = Vec::with_capacity(doc.rel_file_descriptions.len());
        for r in doc.rel_file_descriptions {
            let (fwd_multiplicity, bwd_multiplicity) = parse_multiplicity(&r.rel_multiplicity)?;
            rel_file_descriptions.push(RelFileDescription {
                file_path: input_dir.join(&r.file_path),
                label_name: r.label_name,
                fwd_multiplicity,
                bwd_multiplicity,
                src_node_label_names: r.src_node_label_names,
                dst_node_label_names: r.dst_node_label_names,
                csv_special_chars: r.csv_special_chars.resolve()?,
            });
        }

        Ok(Self {
            node_file_descriptions,
            rel_file_descriptions,
        })
    }
}
