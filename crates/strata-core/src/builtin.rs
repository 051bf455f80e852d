//! Built-in migration catalog for the rules domain.

use crate::dialect::{AddColumn, ColumnDef, CreateIndex, CreateTable, LogicalType};
use crate::migration::{actions, MigrationError, MigrationRegistry};

/// Rules table.
pub const RULES_TABLE: &str = "rules";

/// Default impacts of a rule, one row per software quality.
pub const RULES_DEFAULT_IMPACTS_TABLE: &str = "rules_default_impacts";

/// Column added to `rules` by migration 2.
pub const CLEAN_CODE_ATTRIBUTE_COLUMN: &str = "clean_code_attribute";

/// Unique index over `(rule_uuid, software_quality)`.
pub const RULES_DEFAULT_IMPACTS_INDEX: &str = "uniq_rul_uuid_sof_qual";

const UUID_SIZE: u32 = 40;

/// The built-in registry.
pub fn registry() -> Result<MigrationRegistry, MigrationError> {
    MigrationRegistry::builder()
        .add(1, "Create table rules", |ctx| {
            actions::create_table(ctx, &rules_table())
        })
        .add(2, "Add clean_code_attribute to rules", |ctx| {
            actions::add_column(ctx, &clean_code_attribute())
        })
        .add(3, "Create table rules_default_impacts", |ctx| {
            actions::create_table(ctx, &rules_default_impacts_table())
        })
        .add(4, "Create unique index on rules_default_impacts", |ctx| {
            actions::create_index(ctx, &rules_default_impacts_index())
        })
        .build()
}

/// Definition of `rules` as created by migration 1.
pub fn rules_table() -> CreateTable {
    CreateTable::new(RULES_TABLE)
        .with_column(ColumnDef::new("uuid", LogicalType::String(UUID_SIZE)))
        .with_column(ColumnDef::new("plugin_rule_key", LogicalType::String(200)))
        .with_column(ColumnDef::new("plugin_name", LogicalType::String(255)))
        .with_column(ColumnDef::nullable("name", LogicalType::String(200)))
        .with_column(ColumnDef::nullable("description", LogicalType::Clob))
        .with_column(ColumnDef::nullable("priority", LogicalType::Integer))
        .with_column(ColumnDef::nullable("status", LogicalType::String(40)))
        .with_column(ColumnDef::new("is_template", LogicalType::Boolean))
        .with_column(ColumnDef::new("created_at", LogicalType::BigInt))
        .with_column(ColumnDef::new("updated_at", LogicalType::BigInt))
        .with_primary_key(["uuid"])
}

/// `rules.clean_code_attribute VARCHAR(40) NULL`.
pub fn clean_code_attribute() -> AddColumn {
    AddColumn::new(
        RULES_TABLE,
        ColumnDef::nullable(CLEAN_CODE_ATTRIBUTE_COLUMN, LogicalType::String(40)),
    )
}

/// Definition of `rules_default_impacts`.
pub fn rules_default_impacts_table() -> CreateTable {
    CreateTable::new(RULES_DEFAULT_IMPACTS_TABLE)
        .with_column(ColumnDef::new("uuid", LogicalType::String(UUID_SIZE)))
        .with_column(ColumnDef::new("rule_uuid", LogicalType::String(UUID_SIZE)))
        .with_column(ColumnDef::new("software_quality", LogicalType::String(40)))
        .with_column(ColumnDef::new("severity", LogicalType::String(40)))
        .with_primary_key(["uuid"])
}

/// Unique index preventing two impacts of the same quality on one rule.
pub fn rules_default_impacts_index() -> CreateIndex {
    CreateIndex::new(
        RULES_DEFAULT_IMPACTS_INDEX,
        RULES_DEFAULT_IMPACTS_TABLE,
        ["rule_uuid", "software_quality"],
    )
    .unique()
}
