use crate::configuration::{self, Configuration, SessionConfig, SessionStoreConfig};
use crate::gate::session::{build_store, SessionStore};
use crate::gate::AuthenticationGate;
use std::sync::Arc;
use std::time::Duration;

/// Everything a request needs, built from one configuration snapshot.
pub struct ServerContext {
    pub gate: AuthenticationGate,
    pub login_path: String,
    pub logout_path: String,
    pub application_root: String,
    pub session: SessionConfig,
    pub session_store: SessionStoreConfig,
    pub timeouts: [Duration; 2],
}

impl ServerContext {
    pub fn new(config: &Configuration) -> Result<Self, configuration::Error> {
        let store = build_store(&config.session_store)?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: &Configuration, store: Arc<dyn SessionStore>) -> Self {
        Self {
            gate: AuthenticationGate::new(config, store),
            login_path: config.sso.login_path.clone(),
            logout_path: config.sso.logout_path.clone(),
            application_root: config.sso.application_root.clone(),
            session: config.session.clone(),
            session_store: config.session_store.clone(),
            timeouts: [
                Duration::from_secs(config.server.query_timeout),
                Duration::from_secs(config.server.query_timeout_grace_period),
            ],
        }
    }

    /// Context for a reloaded configuration. The session store is kept when its
    /// configuration did not change, so that existing sessions survive the reload.
    pub fn reload(&self, config: &Configuration) -> Result<Self, configuration::Error> {
        if self.session_store == config.session_store {
            Ok(Self::with_store(config, Arc::clone(self.gate.store())))
        } else {
            Self::new(config)
        }
    }
}
