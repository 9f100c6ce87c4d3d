//! Request handlers

pub mod health;
pub mod leaks;
pub mod payments;
pub mod reconciliations;
pub mod visits;
pub mod webhooks;

use core_kernel::UserId;

use crate::auth::{self, Claims};
use crate::error::ApiError;

/// Checks `permission` and returns the acting user
pub(crate) fn authorize(claims: &Claims, permission: &str) -> Result<UserId, ApiError> {
    auth::require(claims, permission)?;
    Ok(claims.user_id()?)
}
