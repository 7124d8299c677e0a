//! Startup initialization: migrations, roles and the admin account.
//!
//! Migration failure is logged and startup continues against whatever schema
//! exists, so the service stays reachable even when the schema could not be
//! brought up to date. Role and admin seeding are idempotent.

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::auth::{self, ROLES, ROLE_ADMIN};
use crate::config;
use crate::db::{self, Pool};

#[instrument(skip_all)]
pub async fn initialize(pool: &Pool, cfg: &config::Auth) -> Result<()> {
    if let Err(err) = db::run_migrations(pool).await {
        error!(?err, "migration failed; continuing with the existing schema");
    }

    for role in ROLES {
        if auth::ensure_role(pool, role)
            .await
            .with_context(|| format!("failed to ensure role {role}"))?
        {
            info!(role, "created role");
        }
    }

    ensure_admin(pool, cfg).await
}

async fn ensure_admin(pool: &Pool, cfg: &config::Auth) -> Result<()> {
    if !auth::role_exists(pool, ROLE_ADMIN).await? {
        warn!("admin role missing; skipping admin account");
        return Ok(());
    }
    if auth::find_user(pool, &cfg.admin_user).await?.is_some() {
        return Ok(());
    }

    let hash = auth::hash_password(&cfg.admin_password, cfg.bcrypt_cost)
        .context("failed to hash admin password")?;
    let id = auth::create_user(pool, &cfg.admin_user, &hash).await?;
    auth::add_to_role(pool, id, ROLE_ADMIN).await?;
    info!(user = %cfg.admin_user, "created admin account");
    Ok(())
}
