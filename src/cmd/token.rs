//! `repairdesk sign-token`: mint an admin session token for scripted access.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use repairdesk::config::{DEFAULT_DB_PATH, DeskConfig};
use repairdesk::desk::auth::sign_session_token;

pub fn cmd_sign_token(username: Option<&str>) -> Result<()> {
    let admin = DeskConfig::from_env(PathBuf::from(DEFAULT_DB_PATH)).admin;

    let Some(secret) = admin.cookie_secret.as_deref() else {
        bail!("ADMIN_COOKIE_SECRET is not set");
    };
    let username = match username.or(admin.username.as_deref()) {
        Some(name) => name,
        None => bail!("No username given and ADMIN_USER is not set"),
    };
    if admin.username.as_deref() != Some(username) {
        tracing::warn!(username, "Username differs from ADMIN_USER; the server will reject this token");
    }

    let token = sign_session_token(secret, username).context("Failed to sign session token")?;
    println!("{}", token);
    Ok(())
}
