//! Authentication and authorization

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use core_kernel::UserId;

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (staff user UUID)
    pub sub: String,
    /// User's roles
    pub roles: Vec<String>,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    pub iat: i64,
}

impl Claims {
    /// The acting staff member
    pub fn user_id(&self) -> Result<UserId, AuthError> {
        Uuid::parse_str(&self.sub)
            .map(UserId::from_uuid)
            .map_err(|_| AuthError::InvalidSubject(self.sub.clone()))
    }
}

/// Auth errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token subject is not a user id: {0}")]
    InvalidSubject(String),
    #[error("Missing permission: {0}")]
    MissingPermission(String),
}

/// Creates a new JWT token
///
/// # Arguments
///
/// * `user_id` - Staff user identifier
/// * `roles` - User's roles
/// * `secret` - JWT secret key
/// * `expiration_secs` - Token validity in seconds
pub fn create_token(
    user_id: &UserId,
    roles: Vec<String>,
    secret: &str,
    expiration_secs: u64,
) -> Result<String, AuthError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(expiration_secs as i64);

    let claims = Claims {
        sub: user_id.as_uuid().to_string(),
        roles,
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AuthError::InvalidToken)
}

/// Validates a JWT token
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;

    Ok(token_data.claims)
}

/// Checks if user has required role
pub fn has_role(claims: &Claims, required_role: &str) -> bool {
    claims.roles.iter().any(|r| r == required_role || r == roles::ADMIN)
}

/// Fails with `MissingPermission` unless the caller holds `permission`
pub fn require(claims: &Claims, permission: &str) -> Result<(), AuthError> {
    if permissions::granted_by(&claims.roles)
        .iter()
        .any(|p| *p == permission)
        || has_role(claims, permission)
    {
        Ok(())
    } else {
        Err(AuthError::MissingPermission(permission.to_string()))
    }
}

/// Staff roles carried in tokens
pub mod roles {
    pub const ADMIN: &str = "admin";
    pub const CASHIER: &str = "cashier";
    pub const ACCOUNTANT: &str = "accountant";
    pub const CLINICIAN: &str = "clinician";
}

/// Permission definitions
pub mod permissions {
    use super::roles;

    pub const BILLING_READ: &str = "billing:read";
    pub const BILLING_WRITE: &str = "billing:write";
    pub const PAYMENT_RECORD: &str = "payment:record";
    pub const PAYMENT_BACKFILL: &str = "payment:backfill";
    pub const LEAK_DETECT: &str = "leak:detect";
    pub const LEAK_RESOLVE: &str = "leak:resolve";
    pub const RECONCILIATION_READ: &str = "reconciliation:read";
    pub const RECONCILIATION_CLOSE: &str = "reconciliation:close";

    /// Permissions each role grants
    pub fn granted_by(held: &[String]) -> Vec<&'static str> {
        let mut granted = Vec::new();
        for role in held {
            match role.as_str() {
                roles::CASHIER => granted.extend([BILLING_READ, BILLING_WRITE, PAYMENT_RECORD]),
                roles::CLINICIAN => granted.extend([BILLING_READ, BILLING_WRITE, LEAK_DETECT]),
                roles::ACCOUNTANT => granted.extend([
                    BILLING_READ,
                    PAYMENT_BACKFILL,
                    LEAK_DETECT,
                    LEAK_RESOLVE,
                    RECONCILIATION_READ,
                    RECONCILIATION_CLOSE,
                ]),
                _ => {}
            }
        }
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_token_round_trip_keeps_subject() {
        let user = UserId::new();
        let token = create_token(&user, vec![roles::CASHIER.to_string()], SECRET, 60).unwrap();
        let claims = validate_token(&token, SECRET).unwrap();
        assert_eq!(claims.user_id().unwrap(), user);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = create_token(&UserId::new(), vec![], SECRET, 60).unwrap();
        assert!(matches!(validate_token(&token, "other"), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_role_permissions() {
        let claims = |role: &str| Claims {
            sub: Uuid::new_v4().to_string(),
            roles: vec![role.to_string()],
            exp: 0,
            iat: 0,
        };

        assert!(require(&claims(roles::CASHIER), permissions::PAYMENT_RECORD).is_ok());
        assert!(require(&claims(roles::CASHIER), permissions::RECONCILIATION_CLOSE).is_err());
        assert!(require(&claims(roles::ACCOUNTANT), permissions::RECONCILIATION_CLOSE).is_ok());
        assert!(require(&claims(roles::CLINICIAN), permissions::LEAK_RESOLVE).is_err());
        assert!(require(&claims(roles::ADMIN), permissions::LEAK_RESOLVE).is_ok());
        assert!(require(&claims(permissions::LEAK_RESOLVE), permissions::LEAK_RESOLVE).is_ok());
    }
}
