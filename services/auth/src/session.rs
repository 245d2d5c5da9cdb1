//! Session and password reset state in Redis

use anyhow::Result;
use rand::{Rng, distributions::Alphanumeric};
use tracing::info;

use common::cache::RedisPool;

/// Lifetime of a password reset token in seconds
pub const RESET_TOKEN_TTL: u64 = 3600;

const RESET_TOKEN_LEN: usize = 48;

fn session_key(identity_id: &str) -> String {
    format!("session:{}", identity_id)
}

fn reset_key(token: &str) -> String {
    format!("password_reset:{}", token)
}

/// Random single use token for password resets
pub fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Session manager for handling identity sessions in Redis
#[derive(Clone)]
pub struct SessionManager {
    redis_pool: RedisPool,
    session_ttl: u64,
}

impl SessionManager {
    /// Create a new session manager; sessions live as long as refresh tokens
    pub fn new(redis_pool: RedisPool, session_ttl: u64) -> Self {
        Self {
            redis_pool,
            session_ttl,
        }
    }

    pub fn redis_pool(&self) -> &RedisPool {
        &self.redis_pool
    }

    /// Create or replace the session of an identity
    pub async fn store_session(&self, identity_id: &str, refresh_token: &str) -> Result<()> {
        info!("Storing session for identity: {}", identity_id);
        self.redis_pool
            .set(
                &session_key(identity_id),
                refresh_token,
                Some(self.session_ttl),
            )
            .await?;
        Ok(())
    }

    /// Check that `refresh_token` is the current session of the identity
    pub async fn is_session_valid(&self, identity_id: &str, refresh_token: &str) -> Result<bool> {
        let stored = self.redis_pool.get(&session_key(identity_id)).await?;
        Ok(stored.as_deref() == Some(refresh_token))
    }

    /// Delete the session of an identity
    pub async fn delete_session(&self, identity_id: &str) -> Result<()> {
        info!("Deleting session for identity: {}", identity_id);
        self.redis_pool.delete(&session_key(identity_id)).await?;
        Ok(())
    }

    /// Issue a password reset token for an identity
    pub async fn issue_reset_token(&self, identity_id: &str) -> Result<String> {
        let token = generate_reset_token();
        self.redis_pool
            .set(&reset_key(&token), identity_id, Some(RESET_TOKEN_TTL))
            .await?;
        Ok(token)
    }

    /// Consume a reset token, returning the identity it was issued for
    pub async fn take_reset_token(&self, token: &str) -> Result<Option<String>> {
        Ok(self.redis_pool.take(&reset_key(token)).await?)
    }
}
