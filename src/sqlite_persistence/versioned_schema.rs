use anyhow::{bail, Result};
use rusqlite::Connection;

/// Offset added to the schema version stored in `PRAGMA user_version`, so that
/// a quill database is not mistaken for some other application's SQLite file.
pub const BASE_DB_VERSION: usize = 74000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn parse(s: &str) -> Option<SqlType> {
        match s {
            "TEXT" => Some(SqlType::Text),
            "INTEGER" => Some(SqlType::Integer),
            "REAL" => Some(SqlType::Real),
            "BLOB" => Some(SqlType::Blob),
            _ => None,
        }
    }
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default_value: Option<&'static str>,
    /// (foreign table, foreign column); deletes cascade.
    pub references: Option<(&'static str, &'static str)>,
}

impl Column {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Column {
        Column {
            name,
            sql_type,
            primary_key: false,
            not_null: false,
            unique: false,
            default_value: None,
            references: None,
        }
    }

    pub const fn primary_key(mut self) -> Column {
        self.primary_key = true;
        self
    }

    pub const fn not_null(mut self) -> Column {
        self.not_null = true;
        self
    }

    pub const fn unique(mut self) -> Column {
        self.unique = true;
        self
    }

    pub const fn default(mut self, value: &'static str) -> Column {
        self.default_value = Some(value);
        self
    }

    pub const fn references(mut self, table: &'static str, column: &'static str) -> Column {
        self.references = Some((table, column));
        self
    }
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    /// (index name, indexed column expression)
    pub indices: &'static [(&'static str, &'static str)],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut sql = format!("CREATE TABLE {} (", self.name);
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(column.name);
            sql.push(' ');
            sql.push_str(column.sql_type.as_sql());
            if column.primary_key {
                sql.push_str(" PRIMARY KEY");
            }
            if column.not_null {
                sql.push_str(" NOT NULL");
            }
            if column.unique {
                sql.push_str(" UNIQUE");
            }
            if let Some(default_value) = column.default_value {
                sql.push_str(&format!(" DEFAULT {}", default_value));
            }
            if let Some((table, col)) = column.references {
                sql.push_str(&format!(" REFERENCES {}({}) ON DELETE CASCADE", table, col));
            }
        }
        sql.push_str(");");
        conn.execute(&sql, [])?;

        for (index_name, column_expr) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, column_expr),
                [],
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
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Checks that every declared table exists with the declared columns and
    /// indices. Column order must match the declaration.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table.name))?;
            let actual: Vec<(String, Option<SqlType>, bool, bool)> = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(1)?,
                        SqlType::parse(&row.get::<_, String>(2)?),
                        row.get::<_, i32>(3)? == 1,
                        row.get::<_, i32>(5)? == 1,
                    ))
                })?
                .collect::<rusqlite::Result<_>>()?;

            if actual.len() != table.columns.len() {
                bail!(
                    "Table {} has {} columns, expected {} ({})",
                    table.name,
                    actual.len(),
                    table.columns.len(),
                    table
                        .columns
                        .iter()
                        .map(|c| c.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }

            for ((name, sql_type, not_null, primary_key), expected) in
                actual.iter().zip(table.columns.iter())
            {
                if name != expected.name {
                    bail!(
                        "Table {} column name mismatch: expected {}, got {}",
                        table.name,
                        expected.name,
                        name
                    );
                }
                if *sql_type != Some(expected.sql_type) {
                    bail!(
                        "Table {} column {} type mismatch: expected {:?}, got {:?}",
                        table.name,
                        expected.name,
                        expected.sql_type,
                        sql_type
                    );
                }
                if *not_null != expected.not_null {
                    bail!(
                        "Table {} column {} non-null mismatch: expected {}, got {}",
                        table.name,
                        expected.name,
                        expected.not_null,
                        not_null
                    );
                }
                if *primary_key != expected.primary_key {
                    bail!(
                        "Table {} column {} primary key mismatch: expected {}, got {}",
                        table.name,
                        expected.name,
                        expected.primary_key,
                        primary_key
                    );
                }
            }

            for (index_name, _) in table.indices {
                let exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                        rusqlite::params![index_name, table.name],
                        |_| Ok(true),
                    )
                    .unwrap_or(false);
                if !exists {
                    bail!("Table {} is missing index '{}'", table.name, index_name);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_TABLE: Table = Table {
        name: "things",
        columns: &[
            Column::new("id", SqlType::Integer).primary_key(),
            Column::new("label", SqlType::Text).not_null(),
        ],
        indices: &[("idx_things_label", "label")],
    };

    #[test]
    fn test_create_then_validate() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = VersionedSchema {
            version: 1,
            tables: &[],
            migration: None,
        };
        schema.create(&conn).unwrap();
        TEST_TABLE.create(&conn).unwrap();

        let schema = VersionedSchema {
            version: 1,
            tables: std::slice::from_ref(&TEST_TABLE),
            migration: None,
        };
        schema.validate(&conn).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, (BASE_DB_VERSION + 1) as i64);
    }

    #[test]
    fn test_validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE things (id INTEGER PRIMARY KEY, label TEXT NOT NULL)",
            [],
        )
        .unwrap();

        let schema = VersionedSchema {
            version: 1,
            tables: std::slice::from_ref(&TEST_TABLE),
            migration: None,
        };
        let err = schema.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing index"));
    }

    #[test]
    fn test_validate_detects_wrong_column_type() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE things (id INTEGER PRIMARY KEY, label INTEGER NOT NULL)",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_things_label ON things(label)", [])
            .unwrap();

        let schema = VersionedSchema {
            version: 1,
            tables: std::slice::from_ref(&TEST_TABLE),
            migration: None,
        };
        let err = schema.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("type mismatch"));
    }
}
