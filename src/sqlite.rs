use rusqlite::{Connection, OpenFlags, Result};
use std::{fmt::Write as _, path::PathBuf, time::Duration};

/// Name of the table holding recorded runs.
pub const RUNS_TABLE: &str = "runs";
/// Name of the table holding per-user goals.
pub const GOALS_TABLE: &str = "goals";

/// Schema definition for the SQLite database
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }
    pub fn add_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }

    /// Render every table and index as idempotent DDL, one statement per line.
    pub fn to_ddl(&self) -> String {
        let mut ddl = String::new();
        for table in &self.tables {
            ddl.push_str(&table.create_statement());
            ddl.push('\n');
            for index in &table.indexes {
                ddl.push_str(&index.create_statement(&table.name));
                ddl.push('\n');
            }
        }
        ddl
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }
    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    fn create_statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(ColumnDefinition::to_sql)
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({});", self.name, columns)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            constraints: Vec::new(),
            default_value: None,
        }
    }
    pub fn constraint(mut self, constraint: ColumnConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.data_type.as_sql());
        for constraint in &self.constraints {
            sql.push(' ');
            sql.push_str(&constraint.to_sql());
        }
        if let Some(default) = &self.default_value {
            // Writing into a String cannot fail.
            let _ = write!(sql, " DEFAULT {}", default.to_sql());
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
}

impl DataType {
    fn as_sql(self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Text => "TEXT",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnConstraint {
    PrimaryKey,
    /// `PRIMARY KEY AUTOINCREMENT`: rowids are never reused, even after deletes.
    PrimaryKeyAutoIncrement,
    NotNull,
    Unique,
    Check(String),
}

impl ColumnConstraint {
    fn to_sql(&self) -> String {
        match self {
            ColumnConstraint::PrimaryKey => "PRIMARY KEY".to_string(),
            ColumnConstraint::PrimaryKeyAutoIncrement => "PRIMARY KEY AUTOINCREMENT".to_string(),
            ColumnConstraint::NotNull => "NOT NULL".to_string(),
            ColumnConstraint::Unique => "UNIQUE".to_string(),
            ColumnConstraint::Check(expr) => format!("CHECK ({expr})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Null,
}

impl DefaultValue {
    fn to_sql(&self) -> String {
        match self {
            DefaultValue::Integer(value) => value.to_string(),
            DefaultValue::Text(value) => format!("'{}'", value.replace('\'', "''")),
            DefaultValue::Real(value) => value.to_string(),
            DefaultValue::Null => "NULL".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    fn create_statement(&self, table: &str) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            table,
            self.columns.join(", ")
        )
    }
}

/// Tables backing the run service.
///
/// `runs.time_created` holds the completion time as unix seconds and
/// `runs.weight` is NULL when no weight was recorded. A `goals` row is
/// optional per user and each of its columns is independently nullable.
pub fn run_schema() -> Schema {
    Schema::new()
        .add_table(
            TableDefinition::new(RUNS_TABLE)
                .column(
                    ColumnDefinition::new("id", DataType::Integer)
                        .constraint(ColumnConstraint::PrimaryKeyAutoIncrement),
                )
                .column(
                    ColumnDefinition::new("user_id", DataType::Integer)
                        .constraint(ColumnConstraint::NotNull),
                )
                .column(
                    ColumnDefinition::new("time_created", DataType::Integer)
                        .constraint(ColumnConstraint::NotNull),
                )
                .column(
                    ColumnDefinition::new("distance", DataType::Integer)
                        .constraint(ColumnConstraint::NotNull)
                        .constraint(ColumnConstraint::Check("distance >= 0".to_string())),
                )
                .column(
                    ColumnDefinition::new("time", DataType::Integer)
                        .constraint(ColumnConstraint::NotNull)
                        .constraint(ColumnConstraint::Check("time >= 0".to_string())),
                )
                .column(
                    ColumnDefinition::new("weight", DataType::Real)
                        .default_value(DefaultValue::Null),
                )
                .index(IndexDefinition::new(
                    "idx_runs_user_time",
                    &["user_id", "time_created"],
                )),
        )
        .add_table(
            TableDefinition::new(GOALS_TABLE)
                .column(
                    ColumnDefinition::new("user_id", DataType::Integer)
                        .constraint(ColumnConstraint::PrimaryKey),
                )
                .column(ColumnDefinition::new("distance", DataType::Integer))
                .column(ColumnDefinition::new("weight", DataType::Real)),
        )
}

/// SQLite connection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: PathBuf,
    /// Schema definition for the database
    pub schema: Schema,
    /// Upper bound on simultaneously open connections
    pub max_connections: usize,
    /// How long a connection waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl SqliteConfig {
    /// Path understood by SQLite as a private in-memory database.
    pub const MEMORY_PATH: &'static str = ":memory:";

    /// Create a new SQLite config with path and schema
    pub fn new(db_path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            db_path: db_path.into(),
            schema,
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// In-memory database with the run schema, for tests and throwaway servers.
    pub fn in_memory() -> Self {
        Self::new(Self::MEMORY_PATH, run_schema())
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn is_memory(&self) -> bool {
        self.db_path.as_os_str() == Self::MEMORY_PATH
    }

    /// Each connection to `:memory:` opens a distinct database, so the pool
    /// must hand out the same single connection.
    pub fn pool_size(&self) -> usize {
        if self.is_memory() {
            1
        } else {
            self.max_connections.max(1)
        }
    }

    /// Open a connection with the pragmas every pooled connection shares.
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = if self.is_memory() {
            Connection::open_in_memory()?
        } else {
            Connection::open_with_flags(
                &self.db_path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        };
        conn.busy_timeout(self.busy_timeout)?;
        if !self.is_memory() {
            // WAL lets readers proceed while another connection writes.
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        }
        Ok(conn)
    }

    /// Apply the configured schema. Safe to run against an existing database.
    pub fn initialize_schema(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&self.schema.to_ddl())
    }
}
