//! Identity repository for database operations

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use common::database::run_migrations;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{Identity, NewIdentity};

const SCHEMA: &[&str] = &[r#"
    CREATE TABLE IF NOT EXISTS identities (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        display_name TEXT,
        password_hash TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#];

/// Postgres code of a unique constraint violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Email already registered")]
    EmailTaken,

    #[error("Failed to hash password: {0}")]
    Hash(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] common::StoreError),
}

/// Hash a password with a fresh salt
pub fn hash_password(password: &str) -> Result<String, IdentityError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::Hash(e.to_string()))
}

/// Check a password against a stored hash; unreadable hashes never match
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    PasswordHash::new(password_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Identity repository
#[derive(Clone)]
pub struct IdentityRepository {
    pool: PgPool,
}

impl IdentityRepository {
    /// Create a new identity repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the identities table when missing
    pub async fn migrate(&self) -> Result<(), IdentityError> {
        run_migrations(&self.pool, SCHEMA).await?;
        Ok(())
    }

    /// Register a new identity
    pub async fn create(&self, new_identity: &NewIdentity) -> Result<Identity, IdentityError> {
        info!("Creating new identity: {}", new_identity.email);

        let password_hash = hash_password(&new_identity.password)?;
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            INSERT INTO identities (id, email, display_name, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, display_name, password_hash, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new_identity.email.to_lowercase())
        .bind(&new_identity.display_name)
        .bind(&password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let taken = e
                .as_database_error()
                .and_then(|d| d.code())
                .is_some_and(|code| code == UNIQUE_VIOLATION);
            if taken {
                IdentityError::EmailTaken
            } else {
                IdentityError::Database(e)
            }
        })?;

        Ok(identity)
    }

    /// Find an identity by email
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, IdentityError> {
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            SELECT id, email, display_name, password_hash, created_at, updated_at
            FROM identities
            WHERE email = $1
            "#,
        )
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    /// Find an identity by ID
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, IdentityError> {
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            SELECT id, email, display_name, password_hash, created_at, updated_at
            FROM identities
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    /// Replace the password of an identity
    pub async fn update_password(&self, id: &str, password: &str) -> Result<bool, IdentityError> {
        let password_hash = hash_password(password)?;
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET password_hash = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&password_hash)
        .execute(&self.pool)
        .await?;

        info!("Password updated for identity: {}", id);
        Ok(result.rows_affected() == 1)
    }
}
