pub mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::payments::LicenseGateway;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Shared per-request state. Everything a handler needs is injected here.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub gateway: Arc<dyn LicenseGateway>,
    pub webhook_secret: String,
    pub activation_instance_name: String,
}

/// Open a pooled SQLite database at `path` and make sure the schema exists.
pub fn create_pool(path: &str) -> crate::error::Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    init_db(&conn)?;

    Ok(pool)
}
