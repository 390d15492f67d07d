//! Route handlers

pub mod auth;
pub mod credits;
pub mod health;
pub mod members;
pub mod webhooks;
