//! Logical DDL intents and their rendering.
//!
//! Each intent renders to one or more statements for a given [`Dialect`].
//! Rendering is pure; executing the statements is the caller's concern.

use super::{Dialect, LogicalType};
use crate::migration::MigrationError;

/// Longest identifier accepted on every supported dialect (Oracle pre-12.2).
pub const MAX_IDENTIFIER_LENGTH: usize = 30;

/// A logical DDL operation that can be rendered for any dialect.
pub trait Ddl {
    /// Short human-readable description, used in logs and errors.
    fn describe(&self) -> String;

    /// Render the statements implementing this operation on `dialect`.
    fn render(&self, dialect: Dialect) -> Result<Vec<String>, MigrationError>;
}

/// Column definition used by DDL intents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub logical_type: LogicalType,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Default value as a SQL literal.
    pub default: Option<String>,
}

impl ColumnDef {
    /// Create a NOT NULL column.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: false,
            default: None,
        }
    }

    /// Create a nullable column.
    pub fn nullable(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, logical_type)
        }
    }

    /// Set a default value (raw SQL literal, e.g. `'MAJOR'` or `0`).
    pub fn with_default(mut self, literal: impl Into<String>) -> Self {
        self.default = Some(literal.into());
        self
    }

    /// Render `name TYPE [DEFAULT x] [NOT] NULL`.
    fn render(&self, dialect: Dialect) -> Result<String, MigrationError> {
        validate_identifier(dialect, &self.name)?;
        self.logical_type.validate(dialect)?;

        let mut sql = format!("{} {}", self.name, self.logical_type.sql_type(dialect));
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql.push_str(if self.nullable { " NULL" } else { " NOT NULL" });
        Ok(sql)
    }
}

/// `CREATE TABLE` with an optional primary key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Primary key columns (empty for none).
    pub primary_key: Vec<String>,
}

impl CreateTable {
    /// Start a table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key columns.
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the generated primary key constraint.
    pub fn primary_key_name(&self) -> String {
        format!("pk_{}", self.name)
    }
}

impl Ddl for CreateTable {
    fn describe(&self) -> String {
        format!("create table {}", self.name)
    }

    fn render(&self, dialect: Dialect) -> Result<Vec<String>, MigrationError> {
        validate_identifier(dialect, &self.name)?;
        if self.columns.is_empty() {
            return Err(unsupported(dialect, format!("{} without columns", self.describe())));
        }

        let mut parts = self
            .columns
            .iter()
            .map(|c| c.render(dialect))
            .collect::<Result<Vec<_>, _>>()?;

        if !self.primary_key.is_empty() {
            // Constraint names share one namespace per schema; never truncate them.
            validate_identifier(dialect, &self.primary_key_name())?;
            for column in &self.primary_key {
                if !self.columns.iter().any(|c| &c.name == column) {
                    return Err(unsupported(
                        dialect,
                        format!("primary key on unknown column {}.{}", self.name, column),
                    ));
                }
            }
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.primary_key_name(),
                self.primary_key.join(", ")
            ));
        }

        Ok(vec![format!("CREATE TABLE {} ({})", self.name, parts.join(", "))])
    }
}

/// `ALTER TABLE ... ADD` a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddColumn {
    /// Target table.
    pub table: String,
    /// Column to add.
    pub column: ColumnDef,
}

impl AddColumn {
    /// Create an add-column intent.
    pub fn new(table: impl Into<String>, column: ColumnDef) -> Self {
        Self {
            table: table.into(),
            column,
        }
    }
}

impl Ddl for AddColumn {
    fn describe(&self) -> String {
        format!("add column {}.{}", self.table, self.column.name)
    }

    fn render(&self, dialect: Dialect) -> Result<Vec<String>, MigrationError> {
        validate_identifier(dialect, &self.table)?;
        if !self.column.nullable && self.column.default.is_none() {
            // Existing rows would violate the constraint.
            return Err(unsupported(
                dialect,
                format!("{} as NOT NULL without a default value", self.describe()),
            ));
        }

        let column = self.column.render(dialect)?;
        let sql = match dialect {
            Dialect::Oracle => format!("ALTER TABLE {} ADD ({})", self.table, column),
            Dialect::MsSql => format!("ALTER TABLE {} ADD {}", self.table, column),
            _ => format!("ALTER TABLE {} ADD COLUMN {}", self.table, column),
        };
        Ok(vec![sql])
    }
}

/// `CREATE [UNIQUE] INDEX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIndex {
    /// Index name.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Whether the index must be built without blocking writes.
    pub online: bool,
}

impl CreateIndex {
    /// Create a non-unique index definition.
    pub fn new<I, S>(name: impl Into<String>, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            online: false,
        }
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Require online (non-blocking) creation.
    pub fn online(mut self) -> Self {
        self.online = true;
        self
    }
}

impl Ddl for CreateIndex {
    fn describe(&self) -> String {
        format!("create index {} on {}", self.name, self.table)
    }

    fn render(&self, dialect: Dialect) -> Result<Vec<String>, MigrationError> {
        validate_identifier(dialect, &self.name)?;
        validate_identifier(dialect, &self.table)?;
        if self.columns.is_empty() {
            return Err(unsupported(dialect, format!("{} without columns", self.describe())));
        }
        for column in &self.columns {
            validate_identifier(dialect, column)?;
        }
        if self.online && !dialect.supports_online_index() {
            return Err(unsupported(dialect, format!("online {}", self.describe())));
        }

        let unique = if self.unique { "UNIQUE " } else { "" };
        let columns = self.columns.join(", ");
        let sql = match (dialect, self.online) {
            (Dialect::PostgreSql, true) => format!(
                "CREATE {unique}INDEX CONCURRENTLY {} ON {} ({columns})",
                self.name, self.table
            ),
            (Dialect::MsSql, true) => format!(
                "CREATE {unique}INDEX {} ON {} ({columns}) WITH (ONLINE = ON)",
                self.name, self.table
            ),
            (Dialect::Oracle, true) => format!(
                "CREATE {unique}INDEX {} ON {} ({columns}) ONLINE",
                self.name, self.table
            ),
            (Dialect::MySql, true) => format!(
                "CREATE {unique}INDEX {} ON {} ({columns}) ALGORITHM=INPLACE LOCK=NONE",
                self.name, self.table
            ),
            _ => format!("CREATE {unique}INDEX {} ON {} ({columns})", self.name, self.table),
        };
        Ok(vec![sql])
    }
}

/// Change the nullability of an existing column.
///
/// The full column definition is needed because some dialects restate the
/// type when modifying a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterNullability {
    /// Target table.
    pub table: String,
    /// Column with the desired nullability.
    pub column: ColumnDef,
}

impl AlterNullability {
    /// Create an alter-nullability intent.
    pub fn new(table: impl Into<String>, column: ColumnDef) -> Self {
        Self {
            table: table.into(),
            column,
        }
    }
}

impl Ddl for AlterNullability {
    fn describe(&self) -> String {
        let target = if self.column.nullable { "nullable" } else { "not nullable" };
        format!("make {}.{} {}", self.table, self.column.name, target)
    }

    fn render(&self, dialect: Dialect) -> Result<Vec<String>, MigrationError> {
        validate_identifier(dialect, &self.table)?;
        validate_identifier(dialect, &self.column.name)?;
        self.column.logical_type.validate(dialect)?;
        if !dialect.supports_alter_nullability() {
            return Err(unsupported(dialect, self.describe()));
        }

        let table = &self.table;
        let name = &self.column.name;
        let null = if self.column.nullable { "NULL" } else { "NOT NULL" };
        let sql_type = self.column.logical_type.sql_type(dialect);

        let sql = match dialect {
            Dialect::PostgreSql => {
                let action = if self.column.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
                format!("ALTER TABLE {table} ALTER COLUMN {name} {action}")
            }
            Dialect::H2 => format!("ALTER TABLE {table} ALTER COLUMN {name} SET {null}"),
            Dialect::MySql => format!("ALTER TABLE {table} MODIFY {name} {sql_type} {null}"),
            Dialect::MsSql => format!("ALTER TABLE {table} ALTER COLUMN {name} {sql_type} {null}"),
            Dialect::Oracle => format!("ALTER TABLE {table} MODIFY ({name} {null})"),
            Dialect::Sqlite => return Err(unsupported(dialect, self.describe())),
        };
        Ok(vec![sql])
    }
}

/// Reject identifiers that would need quoting or exceed the portable length.
pub fn validate_identifier(dialect: Dialect, identifier: &str) -> Result<(), MigrationError> {
    let valid_chars = identifier
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    let starts_with_letter = identifier
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase());

    if !valid_chars || !starts_with_letter {
        return Err(unsupported(
            dialect,
            format!("identifier '{identifier}' (expected lowercase letters, digits and '_')"),
        ));
    }
    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(unsupported(
            dialect,
            format!("identifier '{identifier}' longer than {MAX_IDENTIFIER_LENGTH} characters"),
        ));
    }
    Ok(())
}

fn unsupported(dialect: Dialect, operation: String) -> MigrationError {
    MigrationError::UnsupportedDialectFeature { dialect, operation }
}
