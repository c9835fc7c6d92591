use crate::command;
use crate::configuration::{Configuration, SessionFallback};
use crate::gate::server::route::LOGOUT;
use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "check",
    description = "Validate the configuration and print the effective endpoints"
)]
pub struct Options {}

pub struct Command;

impl Command {
    /// The configuration was validated when loaded; this only reports what the gate will do.
    pub fn run(config: &Configuration) -> Result<(), command::Error> {
        for line in summary(config) {
            println!("{line}");
        }
        Ok(())
    }
}

fn summary(config: &Configuration) -> Vec<String> {
    let sso = &config.sso;

    let fallback = match sso.session_fallback {
        SessionFallback::Allow => "allow",
        SessionFallback::Deny => "deny",
    };
    let store = match &config.session_store.redis {
        Some(redis) => format!("redis (prefix {})", redis.key_prefix),
        None => "memory".to_string(),
    };
    let trusted_peers = if sso.trust_any_peer {
        "any".to_string()
    } else {
        sso.trusted_proxies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };

    vec![
        "Configuration is valid".to_string(),
        format!(
            "listen: {}:{}",
            config.server.bind_address, config.server.port
        ),
        format!("login path: {}", sso.login_path),
        format!("logout: POST {LOGOUT} -> {}", sso.logout_path),
        format!("application root: {}", sso.application_root),
        format!("principal header: {}", sso.attributes.principal_name),
        format!("trusted peers: {trusted_peers}"),
        format!("session fallback: {fallback}"),
        format!(
            "session: cookie {}, ttl {}s, store {store}",
            config.session.cookie_name, config.session.ttl
        ),
    ]
}
