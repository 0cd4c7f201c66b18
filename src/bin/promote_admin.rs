// Grant the ADMIN role to an existing user, identified by email or name.
//
//   promote_admin alice@x.com

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use live_articles::{app_state::AppState, config::Config, models::Role};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("live_articles=info")),
        )
        .init();

    let identifier = std::env::args()
        .nth(1)
        .context("usage: promote_admin <email-or-name>")?;

    let config = Config::from_env()?;
    let state = AppState::new(config).await?;

    let user = state.credentials.find_by_identifier(&identifier).await?;
    let user = state.credentials.set_role(user.id, Role::Admin).await?;

    info!("{} ({}) is now {}", user.name, user.email, user.role);
    Ok(())
}
