use anyhow::{bail, Result};
use rusqlite::{params, types::Type, Connection};

/// Offset applied to `PRAGMA user_version` so an eventhou database is never
/// mistaken for some other sqlite file lying around.
pub const BASE_DB_VERSION: usize = 77000;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // unused_mut: the variable is only mutated when optional field
            // assignments are passed (e.g. `is_primary_key = true`)
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<S>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    /// Composite primary key columns; empty means per-column `is_primary_key`.
    pub primary_key: &'static [&'static str],
    pub indices: &'static [(&'static str, &'static str)],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut create_sql = format!("CREATE TABLE {} (", self.name);
        for (column_index, column) in self.columns.iter().enumerate() {
            if column_index > 0 {
                create_sql.push_str(", ");
            }
            create_sql.push_str(&format!(
                "{} {}",
                column.name,
                match column.sql_type {
                    SqlType::Text => "TEXT",
                    SqlType::Integer => "INTEGER",
                    SqlType::Real => "REAL",
                }
            ));
            if column.is_primary_key {
                create_sql.push_str(" PRIMARY KEY");
            }
            if column.non_null {
                create_sql.push_str(" NOT NULL");
            }
            if let Some(default_value) = column.default_value {
                create_sql.push_str(&format!(" DEFAULT {}", default_value));
            }
        }
        if !self.primary_key.is_empty() {
            create_sql.push_str(&format!(", PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        create_sql.push_str(");");
        conn.execute(&create_sql, params![])?;

        for (index_name, column_names) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, column_names
                ),
                params![],
            )?;
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Check that the live database matches this schema: same columns with
    /// the same types and nullability, and all expected indices present.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table.name))?;
            let actual_columns: Vec<(String, String, bool, bool)> = stmt
                .query_map(params![], |row| {
                    Ok((
                        row.get::<_, String>(1)?,          // name
                        row.get::<_, String>(2)?,          // type
                        row.get::<_, i32>(3)? == 1,        // notnull
                        row.get::<_, i32>(5)? >= 1,        // pk (ordinal for composite keys)
                    ))
                })?
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| {
                    rusqlite::Error::InvalidColumnType(2, table.name.to_string(), Type::Text)
                })?;

            if actual_columns.len() != table.columns.len() {
                bail!(
                    "Table {} has {} columns, expected {} ({})",
                    table.name,
                    actual_columns.len(),
                    table.columns.len(),
                    table
                        .columns
                        .iter()
                        .map(|c| c.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }

            for ((name, type_str, non_null, is_pk), expected) in
                actual_columns.iter().zip(table.columns.iter())
            {
                if name != expected.name {
                    bail!(
                        "Table {} column name mismatch: expected {}, got {}",
                        table.name,
                        expected.name,
                        name
                    );
                }
                let expected_type = match expected.sql_type {
                    SqlType::Text => "TEXT",
                    SqlType::Integer => "INTEGER",
                    SqlType::Real => "REAL",
                };
                if type_str != expected_type {
                    bail!(
                        "Table {} column {} type mismatch: expected {}, got {}",
                        table.name,
                        expected.name,
                        expected_type,
                        type_str
                    );
                }
                if *non_null != expected.non_null {
                    bail!(
                        "Table {} column {} non-null mismatch",
                        table.name,
                        expected.name
                    );
                }
                let expected_pk =
                    expected.is_primary_key || table.primary_key.contains(&expected.name);
                if *is_pk != expected_pk {
                    bail!(
                        "Table {} column {} primary key mismatch",
                        table.name,
                        expected.name
                    );
                }
            }

            for (index_name, _columns) in table.indices {
                let index_exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                        params![index_name, table.name],
                        |_| Ok(true),
                    )
                    .unwrap_or(false);
                if !index_exists {
                    bail!("Table {} is missing index '{}'", table.name, index_name);
                }
            }
        }
        Ok(())
    }
}

/// Open a database file against a list of versioned schemas: create the
/// latest schema on a fresh file, otherwise validate the stored version and
/// run any forward migrations.
pub fn open_versioned(
    conn: &mut Connection,
    schemas: &[VersionedSchema],
    is_new_db: bool,
) -> Result<()> {
    let latest = schemas
        .last()
        .ok_or_else(|| anyhow::anyhow!("No schema versions defined"))?;

    if is_new_db {
        latest.create(conn)?;
        return Ok(());
    }

    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 1 {
        bail!("Database version {} is invalid (expected >= 1)", db_version);
    }

    let version_index = schemas
        .iter()
        .position(|s| s.version == db_version as usize)
        .ok_or_else(|| anyhow::anyhow!("Unknown database version {}", db_version))?;
    schemas[version_index].validate(conn)?;

    if (db_version as usize) < latest.version {
        let tx = conn.transaction()?;
        let mut latest_applied = db_version as usize;
        for schema in schemas.iter().filter(|s| s.version > db_version as usize) {
            if let Some(migration_fn) = schema.migration {
                migration_fn(&tx)?;
            }
            latest_applied = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_applied),
            [],
        )?;
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TABLE: Table = Table {
        name: "test_table",
        columns: &[
            Column {
                name: "id",
                sql_type: &SqlType::Integer,
                is_primary_key: true,
                non_null: false,
                default_value: None,
            },
            Column {
                name: "name",
                sql_type: &SqlType::Text,
                is_primary_key: false,
                non_null: true,
                default_value: None,
            },
        ],
        primary_key: &[],
        indices: &[("idx_test_name", "name")],
    };

    const TEST_SCHEMA: VersionedSchema = VersionedSchema {
        version: 1,
        tables: &[TEST_TABLE],
        migration: None,
    };

    #[test]
    fn test_create_then_validate_round_trips() {
        let conn = Connection::open_in_memory().unwrap();
        TEST_SCHEMA.create(&conn).unwrap();
        TEST_SCHEMA.validate(&conn).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, (BASE_DB_VERSION + 1) as i64);
    }

    #[test]
    fn test_validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE test_table (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            [],
        )
        .unwrap();

        let result = TEST_SCHEMA.validate(&conn);
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("missing index"));
        assert!(err_msg.contains("idx_test_name"));
    }

    #[test]
    fn test_validate_detects_wrong_column_type() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE test_table (id INTEGER PRIMARY KEY, name INTEGER NOT NULL)",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_test_name ON test_table(name)", [])
            .unwrap();

        let result = TEST_SCHEMA.validate(&conn);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("type mismatch"));
    }

    #[test]
    fn test_composite_primary_key() {
        const COMPOSITE_TABLE: Table = Table {
            name: "composite_table",
            columns: &[
                Column {
                    name: "part_a",
                    sql_type: &SqlType::Text,
                    is_primary_key: false,
                    non_null: true,
                    default_value: None,
                },
                Column {
                    name: "part_b",
                    sql_type: &SqlType::Text,
                    is_primary_key: false,
                    non_null: true,
                    default_value: None,
                },
                Column {
                    name: "value",
                    sql_type: &SqlType::Integer,
                    is_primary_key: false,
                    non_null: true,
                    default_value: Some("0"),
                },
            ],
            primary_key: &["part_a", "part_b"],
            indices: &[],
        };
        const COMPOSITE_SCHEMA: VersionedSchema = VersionedSchema {
            version: 1,
            tables: &[COMPOSITE_TABLE],
            migration: None,
        };

        let conn = Connection::open_in_memory().unwrap();
        COMPOSITE_SCHEMA.create(&conn).unwrap();
        COMPOSITE_SCHEMA.validate(&conn).unwrap();
    }
}
