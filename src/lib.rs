//! coupon-api: CRUD HTTP service over a single coupon resource, backed by
//! SQLite through a repository / unit-of-work data-access layer.

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod handlers;
pub mod http;
pub mod model;
pub mod validation;
