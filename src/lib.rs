pub mod access;
pub mod admin;
pub mod agenda;
pub mod api;
pub mod config;
pub mod core_state;
pub mod db;
pub mod error;
pub mod gateway;
pub mod guards;
pub mod invites;
pub mod models;
pub mod money;
pub mod orgs;
pub mod registry;
pub mod session;
pub mod validation;
pub mod view;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, BootstrapAdmin, GatewayKind};
use core_state::CoreState;
use gateway::{Gateway, GatewayError, LocalGateway, RestGateway};
use models::SystemRole;

/// Startup failures, reported before the server binds.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Server error: {0}")]
    Server(String),
}

pub fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    if let Err(e) = start() {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn start() -> Result<(), StartupError> {
    let config = AppConfig::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;

    // Blocking HTTP clients must be built and dropped outside the async runtime.
    let gateway = build_gateway(&config)?;
    let core = Arc::new(CoreState::new(
        gateway,
        config.preferences_path(),
        config.utc_offset,
    ));
    restore(&core);

    let runtime = tokio::runtime::Runtime::new()?;
    let served = runtime.block_on(api::serve(core.clone(), &config));
    drop(runtime);
    drop(core);
    served.map_err(StartupError::Server)
}

fn build_gateway(config: &AppConfig) -> Result<Arc<dyn Gateway>, StartupError> {
    match &config.gateway {
        GatewayKind::Rest { url, anon_key } => {
            tracing::info!(url = %url, "using managed gateway");
            Ok(Arc::new(RestGateway::new(url, anon_key, config.http_timeout_secs)?))
        }
        GatewayKind::Local => {
            let path = config.local_gateway_path();
            tracing::info!(path = %path.display(), "using embedded gateway");
            let local = LocalGateway::open(&path, config.utc_offset)?;
            if let Some(admin) = &config.bootstrap_admin {
                bootstrap(&local, admin)?;
            }
            Ok(Arc::new(local))
        }
    }
}

/// Seed the first vendor administrator and the default organization type
/// into an empty database.
fn bootstrap(local: &LocalGateway, admin: &BootstrapAdmin) -> Result<(), GatewayError> {
    if local.user_count()? > 0 {
        return Ok(());
    }
    let user_id = local.register_user(&admin.email, &admin.password)?;
    local.grant_system_role(user_id, SystemRole::SuperAdmin)?;
    local.create_org_type("clinic", "Clínica")?;
    tracing::info!(email = %admin.email, "bootstrap administrator created");
    Ok(())
}

/// Pick up a persisted provider session and load what it needs.
fn restore(core: &CoreState) {
    if core.restore_session().is_none() {
        return;
    }
    if let Err(e) = orgs::load(core) {
        tracing::warn!(error = %e, "organizations not loaded for restored session");
    }
    if let Err(e) = access::refresh(core) {
        tracing::warn!(error = %e, "role not resolved for restored session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn admin() -> BootstrapAdmin {
        BootstrapAdmin {
            email: "root@vendor.com".into(),
            password: "s3cret-pass".into(),
        }
    }

    #[test]
    fn bootstrap_seeds_an_empty_database_once() {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let local = LocalGateway::open_in_memory(offset).unwrap();
        bootstrap(&local, &admin()).unwrap();
        assert_eq!(local.user_count().unwrap(), 1);

        bootstrap(&local, &admin()).unwrap();
        assert_eq!(local.user_count().unwrap(), 1);
    }

    #[test]
    fn bootstrapped_admin_is_staff() {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let local = Arc::new(LocalGateway::open_in_memory(offset).unwrap());
        bootstrap(&local, &admin()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let core = CoreState::new(local, dir.path().join("preferences.db"), offset);
        core.sign_in("root@vendor.com", "s3cret-pass").unwrap();
        assert!(access::staff(&core).unwrap());
    }
}
