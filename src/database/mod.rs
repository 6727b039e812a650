//!
//! # Database Module for Reviewgate
//!
//! This module provides database management functionality for the abuse report store.
//! It handles database initialization, connection management, and schema migrations.
//!
//! ## Features
//!
//! - **Database Initialization**: Creates the SQLite database file and migrations table if needed.
//! - **Connection Management**: Provides database connection pool management.
//! - **Migration Control**: Tracks migrations in a `migrations` table; new databases get every
//!   migration applied, existing ones only report what is pending.
//! - **CLI Support**: Commands to list and apply migrations.
//!
//! ## Migration System
//!
//! Migrations are stored in code as `Migration` structs, tracked in a `migrations` table.

pub mod queries;

use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePool, Row, Sqlite};
use std::collections::HashMap;
use tracing::{error, info, warn};

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Database manager that handles initialization and migrations
pub struct DatabaseManager {
    pool: SqlitePool,
}

/// Represents a database migration with version and SQL
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: String,
    pub sql: String,
}

impl DatabaseManager {
    /// Create a new manager with a connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database, creating the file if it doesn't exist
    pub async fn connect_with_file_creation(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("Opening abuse report database: {}", database_url);

        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            info!("Database does not exist at {}, creating it", database_url);
            Sqlite::create_database(database_url).await?;

            let pool = SqlitePool::connect(database_url).await?;
            sqlx::query("SELECT 1").execute(&pool).await?;
            info!("Database created successfully at {}", database_url);

            let db_manager = Self::new(pool);
            db_manager.create_migrations_table().await?;
            db_manager.apply_pending_migrations().await?;
            info!("Initial migrations applied successfully.");
            return Ok(db_manager);
        }

        let pool = SqlitePool::connect(database_url).await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Initialize the database by creating the migrations table if needed
    pub async fn initialize(&self) -> Result<(), sqlx::Error> {
        info!("Initializing database...");
        self.create_migrations_table().await?;
        let (_applied, pending) = self.migration_status().await?;
        if !pending.is_empty() {
            warn!("Pending migrations: {:?}", pending);
        } else {
            info!("No pending migrations.");
        }
        Ok(())
    }

    /// Create the migrations tracking table
    async fn create_migrations_table(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get all available migrations in order
    fn get_migrations(&self) -> Vec<Migration> {
        vec![Migration {
            version: 1,
            name: "abuse_reports".to_string(),
            sql: r#"
                CREATE TABLE IF NOT EXISTS abuse_reports (
                    anonymized_id TEXT PRIMARY KEY NOT NULL,
                    coarse_address TEXT NOT NULL,
                    target_product_id INTEGER NOT NULL DEFAULT 0,
                    target_button_id INTEGER NOT NULL DEFAULT 0,
                    total_attempts INTEGER NOT NULL,
                    first_attempt TEXT NOT NULL,
                    last_attempt TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_abuse_reports_last_attempt ON abuse_reports(last_attempt);
                CREATE INDEX IF NOT EXISTS idx_abuse_reports_product ON abuse_reports(target_product_id);
            "#
            .to_string(),
        }]
    }

    /// Get applied migrations as a map (version -> name)
    async fn get_applied_migrations(&self) -> Result<HashMap<u32, String>, sqlx::Error> {
        let rows = sqlx::query("SELECT version, name FROM migrations ORDER BY version")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("version"), row.get("name")))
            .collect())
    }

    /// Check migration status: returns (applied, pending) versions
    pub async fn migration_status(&self) -> Result<(Vec<u32>, Vec<u32>), sqlx::Error> {
        let applied_migrations = self.get_applied_migrations().await?;
        let (mut applied, mut pending): (Vec<u32>, Vec<u32>) = self
            .get_migrations()
            .into_iter()
            .map(|m| m.version)
            .partition(|version| applied_migrations.contains_key(version));

        applied.sort();
        pending.sort();
        Ok((applied, pending))
    }

    /// Apply all pending migrations in order
    pub async fn apply_pending_migrations(&self) -> Result<Vec<u32>, sqlx::Error> {
        self.create_migrations_table().await?;
        let applied_migrations = self.get_applied_migrations().await?;
        let mut newly_applied = Vec::new();

        for migration in self.get_migrations() {
            if applied_migrations.contains_key(&migration.version) {
                continue;
            }
            info!("Applying migration {}: {}", migration.version, migration.name);
            sqlx::raw_sql(&migration.sql)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to apply migration {}: {}", migration.version, e);
                    e
                })?;
            sqlx::query("INSERT INTO migrations (version, name) VALUES (?, ?)")
                .bind(migration.version)
                .bind(&migration.name)
                .execute(&self.pool)
                .await?;
            info!("Applied migration {}: {}", migration.version, migration.name);
            newly_applied.push(migration.version);
        }
        Ok(newly_applied)
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn into_pool(self) -> SqlitePool {
        self.pool
    }
}

/// CLI command implementations for migrations.
pub struct MigrationCli {
    db_manager: DatabaseManager,
}

impl MigrationCli {
    pub fn new(db_manager: DatabaseManager) -> Self {
        Self { db_manager }
    }

    /// CLI command: List migration status
    pub async fn list_migrations(&self) -> Result<(), sqlx::Error> {
        let (applied, pending) = self.db_manager.migration_status().await?;
        println!("Applied migrations: {:?}", applied);
        println!("Pending migrations: {:?}", pending);
        Ok(())
    }

    /// CLI command: Apply all pending migrations
    pub async fn apply_migrations(&self) -> Result<(), sqlx::Error> {
        let applied = self.db_manager.apply_pending_migrations().await?;
        if applied.is_empty() {
            println!("No pending migrations.");
        } else {
            println!("Applied migrations: {:?}", applied);
        }
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Open the database for serving: create it if needed and make sure the schema is current
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let db_manager = DatabaseManager::connect_with_file_creation(database_url).await?;
    db_manager.initialize().await?;
    db_manager.apply_pending_migrations().await?;
    Ok(db_manager.into_pool())
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
