use crate::config::{DBSettings, SqliteConfigSerde};
use log::debug;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, SqlitePool,
};
use std::{
    hash::{DefaultHasher, Hash, Hasher},
    time::Duration as StdDuration,
};

static LEADERBOARDS_MIGRATOR: sqlx::migrate::Migrator =
    sqlx::migrate!("./migrations/leaderboards");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteMode {
    ReadWriteCreate,
    ReadWrite,
    ReadOnly,
    /// Shared-cache in-memory database, visible to both pools of one connection
    Memory,
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub mode: SqliteMode,
    pub shared_cache: bool,
    pub busy_timeout_ms: u32,
    pub journal_mode: String,
    pub synchronous: String,
    pub cache_size: i32,
    pub wal_autocheckpoint: Option<u32>,
    pub temp_store: String,
    pub mmap_size: Option<u64>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfigSerde::default().into()
    }
}

impl SqliteConfig {
    pub fn testing() -> Self {
        SqliteConfigSerde::testing().into()
    }

    fn read_only(&self) -> Self {
        Self {
            mode: SqliteMode::ReadOnly,
            synchronous: String::from("OFF"),
            cache_size: self.cache_size * 2,
            ..self.clone()
        }
    }

    pub fn build_connect_options(&self, database_path: &str) -> SqliteConnectOptions {
        let options = SqliteConnectOptions::new();

        let options = match self.mode {
            SqliteMode::Memory => {
                // one named in-memory database per path so the read and write pools share tables
                let mut hasher = DefaultHasher::new();
                database_path.hash(&mut hasher);
                let memory_uri = format!("file:memdb_{}?mode=memory&cache=shared", hasher.finish());
                return options
                    .filename(&memory_uri)
                    .shared_cache(true)
                    .busy_timeout(StdDuration::from_millis(u64::from(self.busy_timeout_ms)))
                    .pragma("journal_mode", "MEMORY")
                    .pragma("synchronous", "OFF");
            }
            SqliteMode::ReadOnly => {
                return options
                    .filename(database_path)
                    .read_only(true)
                    .shared_cache(self.shared_cache)
                    .busy_timeout(StdDuration::from_millis(u64::from(self.busy_timeout_ms)));
            }
            SqliteMode::ReadWrite => options.filename(database_path).read_only(false),
            SqliteMode::ReadWriteCreate => options
                .filename(database_path)
                .read_only(false)
                .create_if_missing(true),
        };

        let mut options = options
            .shared_cache(self.shared_cache)
            .busy_timeout(StdDuration::from_millis(u64::from(self.busy_timeout_ms)))
            .pragma("journal_mode", self.journal_mode.clone())
            .pragma("synchronous", self.synchronous.clone())
            .pragma("cache_size", self.cache_size.to_string())
            .pragma("temp_store", self.temp_store.to_lowercase());

        if let Some(checkpoint) = self.wal_autocheckpoint {
            options = options.pragma("wal_autocheckpoint", checkpoint.to_string());
        }
        if let Some(mmap_size) = self.mmap_size {
            options = options.pragma("mmap_size", mmap_size.to_string());
        }

        options
    }
}

impl From<SqliteConfigSerde> for SqliteConfig {
    fn from(config: SqliteConfigSerde) -> Self {
        Self {
            mode: match config.mode.as_str() {
                "ReadWrite" => SqliteMode::ReadWrite,
                "ReadOnly" => SqliteMode::ReadOnly,
                "Memory" => SqliteMode::Memory,
                _ => SqliteMode::ReadWriteCreate,
            },
            shared_cache: config.cache != "Private",
            busy_timeout_ms: config.busy_timeout_ms,
            journal_mode: config.journal_mode.to_uppercase(),
            synchronous: config.synchronous.to_uppercase(),
            cache_size: config.cache_size,
            wal_autocheckpoint: config.wal_autocheckpoint,
            temp_store: config.temp_store,
            mmap_size: config.mmap_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub read_max_connections: u32,
    pub read_min_connections: u32,
    pub write_max_connections: u32,
    pub write_min_connections: u32,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub sqlite_config: SqliteConfig,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        DBSettings::default().into()
    }
}

impl DatabasePoolConfig {
    pub fn testing() -> Self {
        Self {
            read_max_connections: 2,
            read_min_connections: 1,
            write_max_connections: 1,
            write_min_connections: 1,
            acquire_timeout_secs: 5,
            sqlite_config: SqliteConfig::testing(),
            ..Default::default()
        }
    }
}

impl From<DBSettings> for DatabasePoolConfig {
    fn from(config: DBSettings) -> Self {
        Self {
            read_max_connections: config.read_max_connections,
            read_min_connections: config.read_min_connections,
            write_max_connections: config.write_max_connections,
            write_min_connections: config.write_min_connections,
            idle_timeout_secs: config.idle_timeout_secs,
            acquire_timeout_secs: config.acquire_timeout_secs,
            sqlite_config: config.sqlite_config.into(),
        }
    }
}

/// Read and write pools over one leaderboards database.
///
/// SQLite allows a single writer, so writes go through a small dedicated pool while reads
/// fan out over a larger read-only one.
#[derive(Clone, Debug)]
pub struct DBConnection {
    pub database_name: String,
    pub database_path: String,
    read_pool: SqlitePool,
    write_pool: SqlitePool,
}

impl DBConnection {
    pub async fn new(
        path: &str,
        db_name: &str,
        database_pool_config: DatabasePoolConfig,
    ) -> Result<Self, sqlx::Error> {
        let database_path = format!("{}/{}.db", path, db_name);

        if database_pool_config.sqlite_config.mode != SqliteMode::Memory {
            let database_url = format!("sqlite:{}", database_path);
            if !Sqlite::database_exists(&database_url).await? {
                Sqlite::create_database(&database_url).await?;
            }
        }

        // the write pool has to exist (and hold the in-memory database open) before reads
        let write_pool = Self::create_pool(
            &database_path,
            &database_pool_config,
            Self::write_config(&database_pool_config.sqlite_config),
            database_pool_config.write_max_connections,
            database_pool_config.write_min_connections,
        )
        .await?;

        LEADERBOARDS_MIGRATOR
            .run(&write_pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;

        let read_config = match database_pool_config.sqlite_config.mode {
            SqliteMode::Memory => database_pool_config.sqlite_config.clone(),
            _ => database_pool_config.sqlite_config.read_only(),
        };
        let read_pool = Self::create_pool(
            &database_path,
            &database_pool_config,
            read_config,
            database_pool_config.read_max_connections,
            database_pool_config.read_min_connections,
        )
        .await?;

        Ok(Self {
            database_name: db_name.to_string(),
            database_path,
            read_pool,
            write_pool,
        })
    }

    /// Wrap a single pool, used by `sqlx::test` where the harness owns the database
    pub fn new_with_pool(database_name: &str, pool: SqlitePool) -> Self {
        Self {
            database_name: database_name.to_string(),
            database_path: String::from(":memory:"),
            read_pool: pool.clone(),
            write_pool: pool,
        }
    }

    fn write_config(config: &SqliteConfig) -> SqliteConfig {
        match config.mode {
            SqliteMode::Memory => config.clone(),
            _ => SqliteConfig {
                mode: SqliteMode::ReadWrite,
                ..config.clone()
            },
        }
    }

    async fn create_pool(
        database_path: &str,
        database_pool_config: &DatabasePoolConfig,
        sqlite_config: SqliteConfig,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<SqlitePool, sqlx::Error> {
        let connection = sqlite_config.build_connect_options(database_path);
        debug!("{:?} connection: {:?}", sqlite_config.mode, connection);

        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(StdDuration::from_secs(
                database_pool_config.acquire_timeout_secs,
            ))
            .idle_timeout(StdDuration::from_secs(
                database_pool_config.idle_timeout_secs,
            ))
            .connect_with(connection)
            .await
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.read_pool)
            .await?;
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.write_pool)
            .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.read_pool.close().await;
        self.write_pool.close().await;
    }

    pub fn read(&self) -> &SqlitePool {
        &self.read_pool
    }

    pub fn write(&self) -> &SqlitePool {
        &self.write_pool
    }
}

pub fn parse_optional_json<T>(row: &SqliteRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: serde::de::DeserializeOwned,
{
    row.try_get::<Option<String>, _>(column)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}
