//! CSV header parsing (spec.md §4.6 Pass 1, §6 "Column header syntax is
//! `name:type`"). Duplicate names and missing types are fatal
//! `ParserError`s.

use crate::catalog::PropertySchema;
use crate::error::{GraphError, Result};
use crate::types::PropertyType;

pub const ID_COLUMN: &str = "ID";
pub const START_ID_COLUMN: &str = "START_ID";
pub const END_ID_COLUMN: &str = "END_ID";
pub const START_ID_LABEL_COLUMN: &str = "START_ID_LABEL";
pub const END_ID_LABEL_COLUMN: &str = "END_ID_LABEL";

/// One `name:type` header token, tagged with whether it is a structured
/// property or one of the structural columns spec.md §6 calls mandatory.
#[derive(Debug, Clone)]
pub enum HeaderColumn {
    Property(PropertySchema),
    Structural { name: String, property_type: PropertyType },
}

impl HeaderColumn {
    pub fn name(&self) -> &str {
        match self {
            HeaderColumn::Property(p) => &p.name,
            HeaderColumn::Structural { name, .. } => name,
        }
    }
}

/// Splits `header` on `token_separator` and parses each `name:type`
/// token, rejecting duplicate names and missing types. Columns named
/// `ID`/`START_ID`/`END_ID`/`START_ID_LABEL`/`END_ID_LABEL` are returned
/// as `Structural` rather than `Property` (spec.md §6): they carry
/// identity/endpoint information the loader consumes directly instead of
/// persisting as a property column.
pub fn parse_header(header: &str, token_separator: u8) -> Result<Vec<HeaderColumn>> {
    let sep = token_separator as char;
    let mut seen = std::collections::HashSet::new();
    let mut columns = Vec::new();
    for token in header.split(sep) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (name, ty_str) = token
            .split_once(':')
            .ok_or_else(|| GraphError::Parser(format!("column '{token}' is missing a ':type' suffix")))?;
        let name = name.trim();
        let ty_str = ty_str.trim();
        if !seen.insert(name.to_string()) {
            return Err(GraphError::Parser(format!("duplicate column name '{name}'")));
        }
        let property_type = PropertyType::parse(ty_str)
            .ok_or_else(|| GraphError::Parser(format!("unknown column type '{ty_str}' for '{name}'")))?;

        let is_structural = matches!(
            name,
            ID_COLUMN | START_ID_COLUMN | END_ID_COLUMN | START_ID_LABEL_COLUMN | END_ID_LABEL_COLUMN
        );
        if is_structural {
            columns.push(HeaderColumn::Structural {
                name: name.to_string(),
                property_type,
            });
        } else {
            columns.push(HeaderColumn::Property(PropertySchema {
                name: name.to_string(),
                property_type,
            }));
        }
    }
    Ok(columns)
}

/// Structured properties only, in header order, with their index within
/// that slice (used both as the catalog's property list and as the
/// per-row parse order).
pub fn structured_properties(columns: &[HeaderColumn]) -> Vec<PropertySchema> {
    columns
        .iter()
        .filter_map(|c| match c {
            HeaderColumn::Property(p) => Some(p.clone()),
            HeaderColumn::Structural { .. } => None,
        })
        .collect()
}

pub fn find_structural<'a>(columns: &'a [HeaderColumn], name: &str) -> Option<(usize, &'a HeaderColumn)> {
    columns.iter().enumerate().find(|(_, c)| c.name() == name)
}
