//! Reusable idempotent step actions.
//!
//! Each action inspects the live schema first and branches three ways:
//!
//! - target absent: issue the DDL, report [`StepOutcome::Applied`]
//! - target present with the expected definition: issue nothing, report
//!   [`StepOutcome::AlreadyPresent`]
//! - target present with a different definition: fail with
//!   [`MigrationError::SchemaConflict`]
//!
//! DDL is rendered before the catalog is consulted, so an operation the
//! dialect cannot express fails the same way on fresh and upgraded databases.
//! When a creation statement loses a race against a concurrent migrator, the
//! catalog is read again and the step succeeds if the winner produced the
//! expected definition.

use tracing::{debug, info};

use super::error::MigrationError;
use super::step::{MigrationContext, StepOutcome};
use crate::dialect::{AddColumn, AlterNullability, ColumnDef, CreateIndex, CreateTable};
use crate::introspect::{describe_expected, ColumnDefinition, IndexState};

const ABSENT: &str = "absent";

/// Create `table` unless it already exists with every declared column.
///
/// Extra live columns are tolerated since later steps may add them.
pub fn create_table(
    ctx: &mut MigrationContext<'_>,
    table: &CreateTable,
) -> Result<StepOutcome, MigrationError> {
    ctx.render(table)?;

    if ctx.introspector().table_exists(&table.name)? {
        verify_table(ctx, table)?;
        debug!(table = %table.name, "table already present");
        return Ok(StepOutcome::AlreadyPresent);
    }

    match ctx.apply(table) {
        Ok(()) => {
            info!(table = %table.name, "created table");
            Ok(StepOutcome::Applied)
        }
        Err(err) if lost_race(&err) && ctx.introspector().table_exists(&table.name)? => {
            verify_table(ctx, table)?;
            debug!(table = %table.name, "table created concurrently");
            Ok(StepOutcome::AlreadyPresent)
        }
        Err(err) => Err(err),
    }
}

/// Add a column unless it already exists with the expected definition.
pub fn add_column(
    ctx: &mut MigrationContext<'_>,
    add: &AddColumn,
) -> Result<StepOutcome, MigrationError> {
    ctx.render(add)?;

    if let Some(live) = ctx.introspector().column(&add.table, &add.column.name)? {
        verify_column(&add.table, &add.column, &live)?;
        debug!(table = %add.table, column = %add.column.name, "column already present");
        return Ok(StepOutcome::AlreadyPresent);
    }

    match ctx.apply(add) {
        Ok(()) => {
            info!(table = %add.table, column = %add.column.name, "added column");
            Ok(StepOutcome::Applied)
        }
        Err(err) if lost_race(&err) => {
            let Some(live) = ctx.introspector().column(&add.table, &add.column.name)? else {
                return Err(err);
            };
            verify_column(&add.table, &add.column, &live)?;
            Ok(StepOutcome::AlreadyPresent)
        }
        Err(err) => Err(err),
    }
}

/// Create an index unless one with the same name exists on the table.
///
/// Only the index name is compared; column lists are not read back from the
/// catalog.
pub fn create_index(
    ctx: &mut MigrationContext<'_>,
    index: &CreateIndex,
) -> Result<StepOutcome, MigrationError> {
    ctx.render(index)?;

    match ctx.introspector().index_state(&index.table, &index.name)? {
        IndexState::Valid => {
            debug!(table = %index.table, index = %index.name, "index already present");
            return Ok(StepOutcome::AlreadyPresent);
        }
        IndexState::Invalid => return Err(invalid_index(index)),
        IndexState::Absent => {}
    }

    match ctx.apply(index) {
        Ok(()) => {
            info!(
                table = %index.table,
                index = %index.name,
                online = index.online,
                "created index"
            );
            Ok(StepOutcome::Applied)
        }
        Err(err) if lost_race(&err) => {
            match ctx.introspector().index_state(&index.table, &index.name)? {
                IndexState::Valid => Ok(StepOutcome::AlreadyPresent),
                IndexState::Invalid => Err(invalid_index(index)),
                IndexState::Absent => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

/// An index left unusable by an interrupted build must be dropped by hand.
fn invalid_index(index: &CreateIndex) -> MigrationError {
    MigrationError::SchemaConflict {
        table: index.table.clone(),
        column: index.name.clone(),
        expected: "valid index".to_string(),
        actual: "invalid index (drop it and re-run)".to_string(),
    }
}

/// Bring an existing column to the requested nullability.
///
/// The column must exist with the expected type; only nullability is changed.
pub fn alter_nullability(
    ctx: &mut MigrationContext<'_>,
    alter: &AlterNullability,
) -> Result<StepOutcome, MigrationError> {
    ctx.render(alter)?;

    let expected = &alter.column;
    let Some(live) = ctx.introspector().column(&alter.table, &expected.name)? else {
        return Err(conflict(&alter.table, expected, ABSENT.to_string()));
    };
    if live.sql_type != Some(expected.logical_type) {
        return Err(conflict(&alter.table, expected, live.describe()));
    }
    if live.nullable == expected.nullable {
        debug!(table = %alter.table, column = %expected.name, "nullability already set");
        return Ok(StepOutcome::AlreadyPresent);
    }

    ctx.apply(alter)?;
    info!(
        table = %alter.table,
        column = %expected.name,
        nullable = expected.nullable,
        "changed nullability"
    );
    Ok(StepOutcome::Applied)
}

fn verify_table(ctx: &mut MigrationContext<'_>, table: &CreateTable) -> Result<(), MigrationError> {
    for column in &table.columns {
        match ctx.introspector().column(&table.name, &column.name)? {
            Some(live) => verify_column(&table.name, column, &live)?,
            None => return Err(conflict(&table.name, column, ABSENT.to_string())),
        }
    }
    Ok(())
}

fn verify_column(
    table: &str,
    expected: &ColumnDef,
    live: &ColumnDefinition,
) -> Result<(), MigrationError> {
    if live.matches(expected) {
        Ok(())
    } else {
        Err(conflict(table, expected, live.describe()))
    }
}

fn conflict(table: &str, expected: &ColumnDef, actual: String) -> MigrationError {
    MigrationError::SchemaConflict {
        table: table.to_string(),
        column: expected.name.clone(),
        expected: describe_expected(expected),
        actual,
    }
}

fn lost_race(err: &MigrationError) -> bool {
    matches!(err, MigrationError::StepExecutionFailure { source, .. } if source.is_already_exists())
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::connection::{Connection, SqliteConnection};
    use crate::dialect::LogicalType;

    fn rules_table() -> CreateTable {
        CreateTable::new("rules")
            .with_column(ColumnDef::new("uuid", LogicalType::String(40)))
            .with_column(ColumnDef::new("plugin_rule_key", LogicalType::String(200)))
            .with_column(ColumnDef::nullable("description", LogicalType::Clob))
            .with_primary_key(["uuid"])
    }

    fn clean_code_attribute() -> AddColumn {
        AddColumn::new(
            "rules",
            ColumnDef::nullable("clean_code_attribute", LogicalType::String(40)),
        )
    }

    #[test]
    fn test_create_table_twice() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut ctx = MigrationContext::new(&mut conn);

        assert_eq!(create_table(&mut ctx, &rules_table()).unwrap(), StepOutcome::Applied);
        assert_eq!(ctx.statements().len(), 1);

        assert_eq!(
            create_table(&mut ctx, &rules_table()).unwrap(),
            StepOutcome::AlreadyPresent
        );
        assert_eq!(ctx.statements().len(), 1);
    }

    #[test]
    fn test_create_table_conflict_on_missing_column() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE rules (uuid VARCHAR(40) NOT NULL)").unwrap();
        let mut ctx = MigrationContext::new(&mut conn);

        let err = create_table(&mut ctx, &rules_table()).unwrap_err();
        match err {
            MigrationError::SchemaConflict { table, column, actual, .. } => {
                assert_eq!(table, "rules");
                assert_eq!(column, "plugin_rule_key");
                assert_eq!(actual, "absent");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_add_column_twice() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut ctx = MigrationContext::new(&mut conn);
        create_table(&mut ctx, &rules_table()).unwrap();

        assert_eq!(add_column(&mut ctx, &clean_code_attribute()).unwrap(), StepOutcome::Applied);
        assert_eq!(
            add_column(&mut ctx, &clean_code_attribute()).unwrap(),
            StepOutcome::AlreadyPresent
        );

        let live = ctx
            .introspector()
            .column("rules", "clean_code_attribute")
            .unwrap()
            .unwrap();
        assert_eq!(live.sql_type, Some(LogicalType::String(40)));
        assert!(live.nullable);
    }

    #[test]
    fn test_add_column_conflicting_definition() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE rules (uuid VARCHAR(40) NOT NULL, clean_code_attribute INTEGER)")
            .unwrap();
        let mut ctx = MigrationContext::new(&mut conn);

        let err = add_column(&mut ctx, &clean_code_attribute()).unwrap_err();
        match err {
            MigrationError::SchemaConflict { expected, actual, .. } => {
                assert_eq!(expected, "STRING(40) NULL");
                assert_eq!(actual, "INTEGER NULL");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(ctx.statements().is_empty());
    }

    #[test]
    fn test_add_column_to_missing_table_fails() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut ctx = MigrationContext::new(&mut conn);
        let err = add_column(&mut ctx, &clean_code_attribute()).unwrap_err();
        assert!(matches!(err, MigrationError::StepExecutionFailure { .. }));
    }

    #[test]
    fn test_create_index_twice() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut ctx = MigrationContext::new(&mut conn);
        create_table(&mut ctx, &rules_table()).unwrap();

        let index = CreateIndex::new("rules_repo_key", "rules", ["plugin_rule_key"]).unique();
        assert_eq!(create_index(&mut ctx, &index).unwrap(), StepOutcome::Applied);
        assert_eq!(create_index(&mut ctx, &index).unwrap(), StepOutcome::AlreadyPresent);
    }

    #[test]
    fn test_online_index_unsupported_even_when_present() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut ctx = MigrationContext::new(&mut conn);
        create_table(&mut ctx, &rules_table()).unwrap();

        let index = CreateIndex::new("rules_repo_key", "rules", ["plugin_rule_key"]);
        create_index(&mut ctx, &index).unwrap();

        let err = create_index(&mut ctx, &index.online()).unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedDialectFeature { .. }));
    }

    fn scripted_index(found: i64, invalid: i64) -> crate::testing::ScriptedConnection {
        use crate::connection::{Row, SqlValue};

        crate::testing::ScriptedConnection::new(crate::dialect::Dialect::PostgreSql).respond(
            "indisvalid",
            vec![Row(vec![SqlValue::Integer(found), SqlValue::Integer(invalid)])],
        )
    }

    #[test]
    fn test_invalid_concurrent_index_is_a_conflict() {
        let index =
            CreateIndex::new("uniq_rul_uuid_sof_qual", "rules_default_impacts", ["rule_uuid"])
                .unique()
                .online();

        // A failed CONCURRENTLY build leaves the index behind, marked invalid.
        let mut conn = scripted_index(1, 1);
        let mut ctx = MigrationContext::new(&mut conn);
        match create_index(&mut ctx, &index).unwrap_err() {
            MigrationError::SchemaConflict { table, column, actual, .. } => {
                assert_eq!(table, "rules_default_impacts");
                assert_eq!(column, "uniq_rul_uuid_sof_qual");
                assert!(actual.starts_with("invalid index"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(conn.executed().is_empty());

        let mut conn = scripted_index(1, 0);
        let mut ctx = MigrationContext::new(&mut conn);
        assert_eq!(create_index(&mut ctx, &index).unwrap(), StepOutcome::AlreadyPresent);
        assert!(conn.executed().is_empty());

        let mut conn = scripted_index(0, 0);
        let mut ctx = MigrationContext::new(&mut conn);
        assert_eq!(create_index(&mut ctx, &index).unwrap(), StepOutcome::Applied);
        assert_eq!(conn.executed().len(), 1);
        assert_eq!(
            conn.executed()[0],
            "CREATE UNIQUE INDEX CONCURRENTLY uniq_rul_uuid_sof_qual \
             ON rules_default_impacts (rule_uuid)"
        );
    }

    #[test]
    fn test_alter_nullability_unsupported_on_sqlite() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut ctx = MigrationContext::new(&mut conn);
        create_table(&mut ctx, &rules_table()).unwrap();

        let alter = AlterNullability::new(
            "rules",
            ColumnDef::nullable("plugin_rule_key", LogicalType::String(200)),
        );
        let err = alter_nullability(&mut ctx, &alter).unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedDialectFeature { .. }));
    }

    fn scripted_column(nullable: &str) -> crate::testing::ScriptedConnection {
        use crate::connection::{Row, SqlValue};

        let row = Row(vec![
            SqlValue::Text("character varying".to_string()),
            SqlValue::Integer(200),
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Text(nullable.to_string()),
        ]);
        crate::testing::ScriptedConnection::new(crate::dialect::Dialect::PostgreSql)
            .respond("information_schema.columns", vec![row])
    }

    #[test]
    fn test_alter_nullability_on_postgres() {
        let alter = AlterNullability::new(
            "rules",
            ColumnDef::nullable("plugin_rule_key", LogicalType::String(200)),
        );

        let mut conn = scripted_column("NO");
        let mut ctx = MigrationContext::new(&mut conn);
        assert_eq!(alter_nullability(&mut ctx, &alter).unwrap(), StepOutcome::Applied);
        assert_eq!(conn.executed().len(), 1);
        assert_eq!(
            conn.executed()[0],
            "ALTER TABLE rules ALTER COLUMN plugin_rule_key DROP NOT NULL"
        );

        let mut conn = scripted_column("YES");
        let mut ctx = MigrationContext::new(&mut conn);
        assert_eq!(
            alter_nullability(&mut ctx, &alter).unwrap(),
            StepOutcome::AlreadyPresent
        );
        assert!(conn.executed().is_empty());
    }

    #[test]
    fn test_alter_nullability_type_mismatch() {
        let alter = AlterNullability::new(
            "rules",
            ColumnDef::nullable("plugin_rule_key", LogicalType::String(40)),
        );
        let mut conn = scripted_column("NO");
        let mut ctx = MigrationContext::new(&mut conn);
        match alter_nullability(&mut ctx, &alter).unwrap_err() {
            MigrationError::SchemaConflict { expected, actual, .. } => {
                assert_eq!(expected, "STRING(40) NULL");
                assert_eq!(actual, "STRING(200) NOT NULL");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
