//! Core library for the SmartGrid identity and provisioning backend
//!
//! This crate contains the domain logic shared by all Grid applications:
//! - Identity directory (users and credentials)
//! - Tenancy (organizations, memberships, per-app access)
//! - Billing (plans, credits, subscription state)
//! - Access resolution and origin-based provisioning policy

pub mod access;
pub mod apps;
pub mod billing;
pub mod directory;
pub mod error;
pub mod policy;
pub mod tenancy;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
