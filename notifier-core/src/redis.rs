use anyhow::{anyhow, Result};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::Arc;

use crate::config::RedisConfig;
use crate::error::NotifierError;

pub type RedisPool = Arc<Client>;
pub type RedisConnection = MultiplexedConnection;

/// Entries kept per user inbox.
pub const INBOX_CAPACITY: isize = 100;

pub async fn create_pool(config: &RedisConfig) -> Result<RedisPool> {
    tracing::info!("Redis URL: {}", mask_redis_url(&config.url));

    let client = Client::open(config.url.as_str())
        .map_err(|e| anyhow!("Failed to create Redis client: {}", e))?;

    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| anyhow!("Failed to connect to Redis: {}", e))?;

    redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .map_err(|e| anyhow!("Failed to ping Redis: {}", e))?;

    tracing::info!("Redis connection established");

    Ok(Arc::new(client))
}

pub async fn get_connection(pool: &RedisPool) -> Result<RedisConnection, NotifierError> {
    Ok(pool.get_multiplexed_async_connection().await?)
}

pub fn inbox_key(user_id: &str) -> String {
    format!("INBOX:{}", user_id)
}

/// Prepends an entry to the user's inbox and trims it to `INBOX_CAPACITY`.
pub async fn push_inbox(pool: &RedisPool, user_id: &str, entry: &str) -> Result<(), NotifierError> {
    let mut conn = get_connection(pool).await?;
    let key = inbox_key(user_id);

    redis::pipe()
        .atomic()
        .lpush(&key, entry)
        .ignore()
        .ltrim(&key, 0, INBOX_CAPACITY - 1)
        .ignore()
        .query_async::<()>(&mut conn)
        .await?;

    Ok(())
}

pub async fn inbox_len(pool: &RedisPool, user_id: &str) -> Result<i64, NotifierError> {
    let mut conn = get_connection(pool).await?;
    Ok(conn.llen(inbox_key(user_id)).await?)
}

fn mask_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        let (before_at, after_at) = url.split_at(at_pos);
        match before_at.rfind(':') {
            Some(colon_pos) if !before_at[colon_pos..].starts_with("://") => {
                format!("{}:****{}", &before_at[..colon_pos], after_at)
            }
            _ => format!("redis://****{}", after_at),
        }
    } else {
        url.to_string()
    }
}
