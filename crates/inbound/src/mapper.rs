//! Column description mapping between source and destination type systems

use inbound_common::{InboundError, Result};
use std::collections::HashMap;

use crate::models::Description;
use crate::sdk::Mapper;

/// Precision used when the source reports none (or zero).
pub const DEFAULT_PRECISION: i64 = 38;

/// Scale used when the source reports none (or a negative scale).
pub const DEFAULT_SCALE: i64 = 5;

/// What to do with a source type that has no entry in the type table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownTypePolicy {
    /// Map to this destination type
    Fallback(String),
    /// Fail with `UnsupportedType`
    Strict,
}

/// Table-driven [`Mapper`].
///
/// By default unknown types map to `varchar` and names, precision and scale
/// pass through untouched; the normalizations are opt-in.
#[derive(Debug, Clone)]
pub struct DescriptionMapper {
    types: HashMap<String, String>,
    unknown: UnknownTypePolicy,
    normalize_names: bool,
    default_precision: bool,
    default_scale: bool,
}

impl Default for DescriptionMapper {
    fn default() -> Self {
        Self {
            types: HashMap::new(),
            unknown: UnknownTypePolicy::Fallback("varchar".to_string()),
            normalize_names: false,
            default_precision: false,
            default_scale: false,
        }
    }
}

impl DescriptionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source type tag and the destination type it maps to
    pub fn with_type(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.types.insert(source.into(), destination.into());
        self
    }

    pub fn with_fallback(mut self, destination: impl Into<String>) -> Self {
        self.unknown = UnknownTypePolicy::Fallback(destination.into());
        self
    }

    /// Reject unregistered source types instead of falling back
    pub fn strict(mut self) -> Self {
        self.unknown = UnknownTypePolicy::Strict;
        self
    }

    /// Lowercase names and transliterate Norwegian letters
    pub fn with_name_normalization(mut self) -> Self {
        self.normalize_names = true;
        self
    }

    /// Replace missing precision/scale with [`DEFAULT_PRECISION`]/[`DEFAULT_SCALE`]
    pub fn with_numeric_defaults(mut self) -> Self {
        self.default_precision = true;
        self.default_scale = true;
        self
    }

    fn map_type(&self, source_type: &str) -> Result<String> {
        match (self.types.get(source_type), &self.unknown) {
            (Some(mapped), _) => Ok(mapped.clone()),
            (None, UnknownTypePolicy::Fallback(fallback)) => Ok(fallback.clone()),
            (None, UnknownTypePolicy::Strict) => Err(InboundError::UnsupportedType {
                source_type: source_type.to_string(),
            }),
        }
    }

    fn map_precision(&self, precision: Option<i64>) -> Option<i64> {
        match precision {
            None | Some(0) if self.default_precision => Some(DEFAULT_PRECISION),
            other => other,
        }
    }

    fn map_scale(&self, scale: Option<i64>) -> Option<i64> {
        match scale {
            None if self.default_scale => Some(DEFAULT_SCALE),
            Some(s) if s < 0 && self.default_scale => Some(DEFAULT_SCALE),
            other => other,
        }
    }
}

impl Mapper for DescriptionMapper {
    fn map(&self, column: &Description) -> Result<Description> {
        let name = if self.normalize_names {
            normalize_name(&column.name)?
        } else {
            column.name.clone()
        };

        Ok(Description {
            name,
            data_type: self.map_type(&column.data_type)?,
            precision: self.map_precision(column.precision),
            scale: self.map_scale(column.scale),
            nullable: column.nullable,
        })
    }
}

fn is_ascii_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        _ => false,
    }
}

/// Lowercase a column name and make it a plain ASCII identifier.
pub fn normalize_name(name: &str) -> Result<String> {
    let lowered = name.to_lowercase();
    if is_ascii_identifier(&lowered) {
        return Ok(lowered);
    }

    let transliterated = lowered
        .replace('æ', "ae")
        .replace('ø', "o")
        .replace('å', "a");

    if is_ascii_identifier(&transliterated) {
        Ok(transliterated)
    } else {
        Err(InboundError::InvalidColumnName(name.to_string()))
    }
}

/// Oracle cursor types to Snowflake, falling back to varchar.
///
/// Oracle `DATE` carries a time part, hence `datetime`.
pub fn oracle_to_snowflake() -> DescriptionMapper {
    DescriptionMapper::new()
        .with_type("<DbType DB_TYPE_NUMBER>", "number")
        .with_type("<DbType DB_TYPE_VARCHAR>", "varchar")
        .with_type("<DbType DB_TYPE_DATE>", "datetime")
        .with_fallback("varchar")
        .with_name_normalization()
        .with_numeric_defaults()
}

pub fn mssql_to_snowflake() -> DescriptionMapper {
    DescriptionMapper::new()
        .with_type("bool", "boolean")
        .with_type("bit", "boolean")
        .with_type("datetime", "datetime")
        .with_type("int", "number")
        .with_type("decimal", "number")
        .with_type("str", "varchar")
        .strict()
}

/// Anaplan exports everything as text
pub fn anaplan_to_snowflake() -> DescriptionMapper {
    DescriptionMapper::new()
        .with_type("TEXT", "varchar")
        .with_type("NUMBER", "varchar")
        .with_type("BOOLEAN", "varchar")
        .strict()
}
