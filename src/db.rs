use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::migrator::Migrator;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for a database connection pool.
pub type DbPool = DatabaseConnection;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

/// Establishes a connection pool to the database.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };
    establish_connection_with_config(&config).await
}

/// Establishes a connection pool with explicit pool settings.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(effective_max_connections(config))
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    info!(
        max_connections = effective_max_connections(config),
        "Connecting to database"
    );

    let pool = Database::connect(opt).await.map_err(ServiceError::db_error)?;
    Ok(pool)
}

/// Builds the pool from the application configuration.
pub async fn establish_connection_from_app_config(
    app_config: &AppConfig,
) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: app_config.database_url.clone(),
        max_connections: app_config.database.max_connections,
        min_connections: app_config.database.min_connections,
        acquire_timeout: Duration::from_secs(app_config.database.acquire_timeout_secs),
        idle_timeout: Duration::from_secs(app_config.database.idle_timeout_secs),
        ..Default::default()
    };
    let pool = establish_connection_with_config(&config).await?;
    if app_config.auto_migrate {
        run_migrations(&pool).await?;
    }
    Ok(pool)
}

/// A shared-nothing `sqlite::memory:` URL gives every pooled connection its
/// own empty database; cap the pool at one connection so tests and embedded
/// use see a single store.
fn effective_max_connections(config: &DbConfig) -> u32 {
    if config.url.starts_with("sqlite::memory:") {
        1
    } else {
        config.max_connections
    }
}

/// Runs all pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    Migrator::up(pool, None)
        .await
        .map_err(ServiceError::db_error)?;
    info!("Migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sqlite_pools_are_capped_at_one() {
        let config = DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 10,
            ..Default::default()
        };
        assert_eq!(effective_max_connections(&config), 1);
    }
}
