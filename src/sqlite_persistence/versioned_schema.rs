use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection, TransactionBehavior};
use tracing::info;

pub const BASE_DB_VERSION: usize = 99999;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // only mutated when optional fields are passed (e.g. `non_null = true`)
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

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }

    fn parse(s: &str) -> Option<&'static SqlType> {
        match s {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            _ => None,
        }
    }
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<S>,
}

/// A named index over one or more comma separated columns.
pub struct Index {
    pub name: &'static str,
    pub columns: &'static str,
    pub unique: bool,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [Index],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let columns_sql = self
            .columns
            .iter()
            .map(|column| {
                let mut sql = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    sql.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    sql.push_str(" NOT NULL");
                }
                if let Some(default_value) = column.default_value {
                    sql.push_str(&format!(" DEFAULT {}", default_value));
                }
                sql
            })
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute(
            &format!("CREATE TABLE {} ({});", self.name, columns_sql),
            params![],
        )?;

        for index in self.indices {
            conn.execute(
                &format!(
                    "CREATE {}INDEX {} ON {}({});",
                    if index.unique { "UNIQUE " } else { "" },
                    index.name,
                    self.name,
                    index.columns
                ),
                params![],
            )?;
        }
        Ok(())
    }

    fn validate_columns(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual_columns = stmt
            .query_map(params![], |row| {
                let type_name = row.get::<_, String>(2)?;
                let sql_type = SqlType::parse(&type_name).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(2, type_name.clone(), Type::Text)
                })?;
                Ok(Column {
                    name: row.get::<_, String>(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get::<_, Option<String>>(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                })
            })?
            .collect::<rusqlite::Result<Vec<Column<'_, String>>>>()
            .with_context(|| format!("Failed to read columns of table {}", self.name))?;

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}. Found: {}, expected: {}",
                self.name,
                actual_columns.len(),
                self.columns.len(),
                actual_columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in actual_columns.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != expected.sql_type
                || actual.non_null != expected.non_null
                || actual.is_primary_key != expected.is_primary_key
            {
                bail!(
                    "Table {} column {} definition mismatch: expected {:?} non_null={} pk={}, got {:?} non_null={} pk={}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    expected.non_null,
                    expected.is_primary_key,
                    actual.sql_type,
                    actual.non_null,
                    actual.is_primary_key
                );
            }
            // sqlite may report defaults wrapped in parentheses
            let actual_default = actual.default_value.as_deref().map(strip_parentheses);
            let expected_default = expected.default_value.map(strip_parentheses);
            if actual_default != expected_default {
                bail!(
                    "Table {} column {} default value mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
        }
        Ok(())
    }

    fn validate_indices(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA index_list({});", self.name))?;
        let actual: Vec<(String, bool)> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)? == 1))
            })?
            .collect::<rusqlite::Result<_>>()?;

        for index in self.indices {
            match actual.iter().find(|(name, _)| name == index.name) {
                None => bail!("Table {} is missing index '{}'", self.name, index.name),
                Some((_, unique)) if *unique != index.unique => bail!(
                    "Table {} index '{}' unique mismatch: expected {}, got {}",
                    self.name,
                    index.name,
                    index.unique,
                    unique
                ),
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn strip_parentheses(s: &str) -> String {
    if s.starts_with('(') && s.ends_with(')') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
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

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate_columns(conn)?;
            table.validate_indices(conn)?;
        }
        Ok(())
    }
}

/// Brings `conn` to the latest of `schemas`.
///
/// An empty database (user_version 0) gets the latest schema created. An
/// existing one is validated against the schema of its recorded version and
/// then migrated forward. Runs inside an immediate transaction so several
/// processes opening the same fresh file do not race on table creation.
pub fn open_versioned(conn: &mut Connection, schemas: &[VersionedSchema], label: &str) -> Result<()> {
    let latest = schemas.last().context("No schemas defined")?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let raw_version: i64 = tx
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .context("Failed to read database version")?;

    if raw_version == 0 {
        latest.create(&tx)?;
        tx.commit()?;
        info!("Created {} database at schema version {}", label, latest.version);
        return Ok(());
    }

    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 0 {
        bail!(
            "{} database version {} does not contain base db version {}",
            label,
            raw_version,
            BASE_DB_VERSION
        );
    }
    let version = db_version as usize;
    if version > latest.version {
        bail!(
            "{} database version {} is too new (max supported: {})",
            label,
            version,
            latest.version
        );
    }

    schemas
        .iter()
        .find(|s| s.version == version)
        .with_context(|| format!("Unknown {} schema version {}", label, version))?
        .validate(&tx)?;

    if version < latest.version {
        info!(
            "Migrating {} database from version {} to {}",
            label, version, latest.version
        );
        for schema in schemas.iter().filter(|s| s.version > version) {
            if let Some(migration) = schema.migration {
                info!("Running {} migration to version {}", label, schema.version);
                migration(&tx)?;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest.version),
            [],
        )?;
    }
    tx.commit()?;
    Ok(())
}
