//! Error types for the core library

use thiserror::Error;

use crate::apps::{GridApp, OrgRole};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("User is not a member of any organization")]
    NoOrganization,

    #[error("Organization does not have access to {0}")]
    AppNotLicensed(GridApp),

    #[error("Role '{0}' cannot access the SmartGrid dashboard; use one of the Grid product apps instead")]
    InsufficientRole(OrgRole),

    #[error("Member access denied to {0}")]
    MemberAccessDenied(GridApp),

    #[error("User is already a member of this organization")]
    DuplicateMembership,

    #[error("Insufficient credits: {available} available, {required} required")]
    InsufficientCredits { available: i64, required: i64 },

    #[error("Subscription is not active")]
    SubscriptionInactive,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}
