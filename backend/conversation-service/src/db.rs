use crate::config::SERVICE_NAME;
use crate::error::{ConversationError, ConversationResult};
use db_pool::{create_pool, DbConfig};
use sqlx::migrate::Migrator;
use sqlx::PgPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Build the pool from `DATABASE_URL` and `DB_*` settings, then apply migrations
pub async fn init_pool() -> ConversationResult<PgPool> {
    let cfg = DbConfig::from_env(SERVICE_NAME).map_err(ConversationError::Config)?;
    cfg.log_config();
    let pool = create_pool(cfg).await?;
    MIGRATOR.run(&pool).await.map_err(sqlx::Error::from)?;
    Ok(pool)
}
