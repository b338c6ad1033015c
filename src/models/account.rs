//! Account model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user identity.
///
/// Accounts are created at registration and never updated or deleted
/// through the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: i64,
    /// Display name
    #[serde(rename = "nombre")]
    pub name: String,
    /// Email address (unique)
    #[serde(rename = "correo")]
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new, not yet persisted account.
    ///
    /// The password must already be hashed with `services::password::hash_password`.
    pub fn new(name: String, email: String, password_hash: String) -> Self {
        Self {
            id: 0, // Will be set by the database
            name,
            email,
            password_hash,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_hides_password_hash() {
        let account = Account::new(
            "Alice".to_string(),
            "alice@example.com".to_string(),
            "$argon2id$secret".to_string(),
        );

        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["nombre"], "Alice");
        assert_eq!(json["correo"], "alice@example.com");
        assert!(json.get("password_hash").is_none());
    }
}
