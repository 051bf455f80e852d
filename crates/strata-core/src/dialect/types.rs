//! Logical column types and their per-dialect encodings.

use std::fmt;

use super::Dialect;
use crate::migration::MigrationError;

/// Dialect-independent column type taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LogicalType {
    /// Variable-length character data with a maximum length in characters.
    String(u32),
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    BigInt,
    /// Boolean flag.
    Boolean,
    /// Timestamp without time zone.
    Timestamp,
    /// Unbounded character data.
    Clob,
    /// Fixed-precision decimal.
    Decimal {
        /// Total number of digits.
        precision: u8,
        /// Number of digits after the decimal point.
        scale: u8,
    },
}

impl LogicalType {
    /// Render the type as it appears in DDL for `dialect`.
    pub fn sql_type(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (LogicalType::String(len), Dialect::Oracle) => format!("VARCHAR2({len} CHAR)"),
            (LogicalType::String(len), Dialect::MsSql) => format!("NVARCHAR({len})"),
            (LogicalType::String(len), _) => format!("VARCHAR({len})"),

            (LogicalType::Integer, Dialect::Oracle) => "NUMBER(9)".to_string(),
            (LogicalType::Integer, Dialect::MsSql) => "INT".to_string(),
            (LogicalType::Integer, _) => "INTEGER".to_string(),

            (LogicalType::BigInt, Dialect::Oracle) => "NUMBER(38)".to_string(),
            (LogicalType::BigInt, _) => "BIGINT".to_string(),

            (LogicalType::Boolean, Dialect::Oracle) => "NUMBER(1)".to_string(),
            (LogicalType::Boolean, Dialect::MsSql) => "BIT".to_string(),
            (LogicalType::Boolean, Dialect::MySql) => "TINYINT(1)".to_string(),
            (LogicalType::Boolean, _) => "BOOLEAN".to_string(),

            (LogicalType::Timestamp, Dialect::Oracle) => "TIMESTAMP(6)".to_string(),
            (LogicalType::Timestamp, Dialect::MsSql) => "DATETIME2".to_string(),
            (LogicalType::Timestamp, Dialect::MySql) => "DATETIME".to_string(),
            (LogicalType::Timestamp, _) => "TIMESTAMP".to_string(),

            (LogicalType::Clob, Dialect::PostgreSql | Dialect::Sqlite) => "TEXT".to_string(),
            (LogicalType::Clob, Dialect::MsSql) => "NVARCHAR(MAX)".to_string(),
            (LogicalType::Clob, Dialect::MySql) => "LONGTEXT".to_string(),
            (LogicalType::Clob, Dialect::Oracle | Dialect::H2) => "CLOB".to_string(),

            (LogicalType::Decimal { precision, scale }, Dialect::Oracle) => {
                format!("NUMBER({precision},{scale})")
            }
            (LogicalType::Decimal { precision, scale }, Dialect::PostgreSql) => {
                format!("NUMERIC({precision},{scale})")
            }
            (LogicalType::Decimal { precision, scale }, _) => {
                format!("DECIMAL({precision},{scale})")
            }
        }
    }

    /// Check that the type can be expressed on `dialect`.
    pub fn validate(&self, dialect: Dialect) -> Result<(), MigrationError> {
        match *self {
            LogicalType::String(len) if len == 0 || len > dialect.max_string_length() => {
                Err(MigrationError::UnsupportedDialectFeature {
                    dialect,
                    operation: format!(
                        "string column of length {len} (allowed 1..={})",
                        dialect.max_string_length()
                    ),
                })
            }
            LogicalType::Decimal { precision, scale }
                if precision == 0 || precision > 38 || scale > precision =>
            {
                Err(MigrationError::UnsupportedDialectFeature {
                    dialect,
                    operation: format!("decimal({precision},{scale})"),
                })
            }
            // NUMBER(p,0) reads back from the catalog as an integer type.
            LogicalType::Decimal { precision, scale: 0 } if dialect == Dialect::Oracle => {
                Err(MigrationError::UnsupportedDialectFeature {
                    dialect,
                    operation: format!(
                        "decimal({precision},0) (indistinguishable from an integer column)"
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Character length for string types.
    pub fn length(&self) -> Option<u32> {
        match self {
            LogicalType::String(len) => Some(*len),
            _ => None,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::String(len) => write!(f, "STRING({len})"),
            LogicalType::Integer => write!(f, "INTEGER"),
            LogicalType::BigInt => write!(f, "BIGINT"),
            LogicalType::Boolean => write!(f, "BOOLEAN"),
            LogicalType::Timestamp => write!(f, "TIMESTAMP"),
            LogicalType::Clob => write!(f, "CLOB"),
            LogicalType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
        }
    }
}

/// Raw type metadata as reported by a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogType {
    /// Type name, possibly with a parenthesised argument list (`VARCHAR(40)`).
    pub type_name: String,
    /// Maximum character length, `-1` for `MAX` on SQL Server.
    pub char_length: Option<i64>,
    /// Numeric precision.
    pub numeric_precision: Option<i64>,
    /// Numeric scale.
    pub numeric_scale: Option<i64>,
}

impl CatalogType {
    /// Build from a declared type string such as `VARCHAR(40)` or `decimal(10,2)`.
    ///
    /// Arguments are assigned to `char_length` for character types and to
    /// precision/scale otherwise.
    pub fn from_declared(declared: &str) -> Self {
        let mut catalog_type = CatalogType {
            type_name: declared.trim().to_string(),
            ..Default::default()
        };
        catalog_type.absorb_arguments();
        catalog_type
    }

    /// Split `name(a,b)` into the base name and fill missing metadata from the arguments.
    fn absorb_arguments(&mut self) {
        let Some(open) = self.type_name.find('(') else {
            return;
        };
        let close = self.type_name.rfind(')').unwrap_or(self.type_name.len());
        let args: Vec<String> = self.type_name[open + 1..close.max(open + 1)]
            .split(',')
            .map(|a| a.trim().to_ascii_lowercase())
            .collect();
        let base = format!(
            "{}{}",
            self.type_name[..open].trim(),
            self.type_name.get(close + 1..).unwrap_or("")
        )
        .trim()
        .to_string();

        let first = args.first().map(String::as_str).unwrap_or("");
        let first = first.trim_end_matches(" char").trim_end_matches(" byte");
        let first_num = if first == "max" { Some(-1) } else { first.parse::<i64>().ok() };
        let second_num = args.get(1).and_then(|a| a.parse::<i64>().ok());

        if is_character_type(&base.to_ascii_lowercase()) {
            self.char_length = self.char_length.or(first_num);
        } else {
            self.numeric_precision = self.numeric_precision.or(first_num);
            self.numeric_scale = self.numeric_scale.or(second_num);
        }
        self.type_name = base;
    }

    /// Map catalog metadata onto the logical taxonomy.
    ///
    /// Returns `None` when the type has no logical counterpart.
    pub fn normalize(&self) -> Option<LogicalType> {
        let mut this = self.clone();
        this.absorb_arguments();
        let name = this.type_name.trim().to_ascii_lowercase();

        match name.as_str() {
            n if is_character_type(n) => match this.char_length {
                Some(-1) => Some(LogicalType::Clob),
                Some(len) if len > 0 => u32::try_from(len).ok().map(LogicalType::String),
                _ => None,
            },
            "int" | "integer" | "int4" => Some(LogicalType::Integer),
            "bigint" | "int8" => Some(LogicalType::BigInt),
            "boolean" | "bool" | "bit" => Some(LogicalType::Boolean),
            "tinyint" if this.numeric_precision == Some(1) => Some(LogicalType::Boolean),
            "timestamp" | "timestamp without time zone" | "datetime" | "datetime2" => {
                Some(LogicalType::Timestamp)
            }
            "text" | "clob" | "nclob" | "ntext" | "longtext" | "mediumtext"
            | "character large object" => Some(LogicalType::Clob),
            "number" => match (this.numeric_precision, this.numeric_scale.unwrap_or(0)) {
                (Some(1), 0) => Some(LogicalType::Boolean),
                (Some(p), 0) if p <= 9 => Some(LogicalType::Integer),
                (Some(p), 0) if p <= 38 => Some(LogicalType::BigInt),
                (Some(p), s) => decimal(p, s),
                (None, _) => None,
            },
            "numeric" | "decimal" => match this.numeric_precision {
                Some(p) => decimal(p, this.numeric_scale.unwrap_or(0)),
                None => None,
            },
            _ => None,
        }
    }
}

fn is_character_type(name: &str) -> bool {
    matches!(
        name,
        "varchar"
            | "nvarchar"
            | "varchar2"
            | "nvarchar2"
            | "character varying"
            | "char varying"
            | "national character varying"
    )
}

fn decimal(precision: i64, scale: i64) -> Option<LogicalType> {
    Some(LogicalType::Decimal {
        precision: u8::try_from(precision).ok()?,
        scale: u8::try_from(scale).ok()?,
    })
}
