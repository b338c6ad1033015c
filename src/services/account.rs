//! Account service
//!
//! Registration, login, logout and session validation. Credentials are
//! always stored as Argon2id hashes; sessions are opaque UUID tokens kept in
//! the `sessions` table.

use crate::db::repositories::{AccountRepository, SessionRepository};
use crate::models::{Account, Session};
use crate::services::password::{hash_password, verify_password};
use anyhow::Context;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Default session expiration time in days
const DEFAULT_SESSION_EXPIRATION_DAYS: i64 = 7;

/// Error types for account service operations
#[derive(Debug, thiserror::Error)]
pub enum AccountServiceError {
    /// Authentication failed (unknown email or wrong password)
    #[error("Authentication failed")]
    AuthenticationError,

    /// Invalid registration input
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Email already registered
    #[error("Email already registered: {0}")]
    EmailTaken(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for registering an account
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl RegisterInput {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Input for logging in
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Account service for registration and authentication
pub struct AccountService {
    account_repo: Arc<dyn AccountRepository>,
    session_repo: Arc<dyn SessionRepository>,
    session_expiration_days: i64,
}

impl AccountService {
    pub fn new(
        account_repo: Arc<dyn AccountRepository>,
        session_repo: Arc<dyn SessionRepository>,
    ) -> Self {
        Self::with_session_expiration(account_repo, session_repo, DEFAULT_SESSION_EXPIRATION_DAYS)
    }

    /// Create an account service with a custom session lifetime
    pub fn with_session_expiration(
        account_repo: Arc<dyn AccountRepository>,
        session_repo: Arc<dyn SessionRepository>,
        session_expiration_days: i64,
    ) -> Self {
        Self {
            account_repo,
            session_repo,
            session_expiration_days,
        }
    }

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// - `ValidationError` if a field is empty or the email is malformed
    /// - `EmailTaken` if the email is already registered
    /// - `InternalError` for database errors
    pub async fn register(&self, input: RegisterInput) -> Result<Account, AccountServiceError> {
        let input = RegisterInput {
            name: input.name.trim().to_string(),
            email: normalize_email(&input.email),
            password: input.password,
        };
        validate_register_input(&input)?;

        if self.email_registered(&input.email).await? {
            return Err(AccountServiceError::EmailTaken(input.email));
        }

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;
        let account = Account::new(input.name, input.email.clone(), password_hash);

        match self.account_repo.create(&account).await {
            Ok(created) => {
                tracing::info!("Registered account {} ({})", created.id, created.email);
                Ok(created)
            }
            Err(e) => {
                // A concurrent registration can win between the check and the insert
                if self.email_registered(&input.email).await? {
                    tracing::debug!("Registration lost race for {}: {:#}", input.email, e);
                    Err(AccountServiceError::EmailTaken(input.email))
                } else {
                    Err(e.context("Failed to create account").into())
                }
            }
        }
    }

    /// Check credentials and open a new session.
    ///
    /// # Errors
    ///
    /// - `AuthenticationError` if the email is unknown or the password is wrong
    /// - `InternalError` for database errors
    pub async fn login(&self, input: LoginInput) -> Result<Session, AccountServiceError> {
        let email = normalize_email(&input.email);
        let account = self
            .account_repo
            .get_by_email(&email)
            .await
            .context("Failed to look up account")?
            .ok_or(AccountServiceError::AuthenticationError)?;

        let password_valid = verify_password(&input.password, &account.password_hash)
            .context("Failed to verify password")?;
        if !password_valid {
            tracing::debug!("Rejected login for account {}", account.id);
            return Err(AccountServiceError::AuthenticationError);
        }

        self.create_session(account.id).await
    }

    /// Invalidate a session.
    pub async fn logout(&self, session_id: &str) -> Result<(), AccountServiceError> {
        self.session_repo
            .delete(session_id)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its account.
    ///
    /// Returns `None` when the session does not exist or has expired; an
    /// expired session is deleted on the way out.
    pub async fn validate_session(
        &self,
        token: &str,
    ) -> Result<Option<Account>, AccountServiceError> {
        let session = match self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.is_expired() {
            if let Err(e) = self.session_repo.delete(token).await {
                tracing::warn!("Failed to delete expired session: {:#}", e);
            }
            return Ok(None);
        }

        let account = self
            .account_repo
            .get_by_id(session.account_id)
            .await
            .context("Failed to get account")?;

        Ok(account)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Account>, AccountServiceError> {
        Ok(self
            .account_repo
            .get_by_id(id)
            .await
            .context("Failed to get account by ID")?)
    }

    /// Delete all expired sessions, returning how many were removed
    pub async fn cleanup_expired_sessions(&self) -> Result<i64, AccountServiceError> {
        Ok(self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?)
    }

    /// Drop every session so all clients must log in again
    pub async fn reset_sessions(&self) -> Result<i64, AccountServiceError> {
        Ok(self
            .session_repo
            .delete_all()
            .await
            .context("Failed to delete sessions")?)
    }

    async fn email_registered(&self, email: &str) -> Result<bool, AccountServiceError> {
        Ok(self
            .account_repo
            .get_by_email(email)
            .await
            .context("Failed to check email")?
            .is_some())
    }

    async fn create_session(&self, account_id: i64) -> Result<Session, AccountServiceError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            account_id,
            expires_at: now + Duration::days(self.session_expiration_days),
            created_at: now,
        };

        let created = self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?;

        Ok(created)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_register_input(input: &RegisterInput) -> Result<(), AccountServiceError> {
    if input.name.is_empty() {
        return Err(AccountServiceError::ValidationError(
            "El nombre es obligatorio.".to_string(),
        ));
    }
    if !is_valid_email(&input.email) {
        return Err(AccountServiceError::ValidationError(
            "El correo no es válido.".to_string(),
        ));
    }
    if input.password.is_empty() {
        return Err(AccountServiceError::ValidationError(
            "La contraseña es obligatoria.".to_string(),
        ));
    }
    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
