use crate::command;
use crate::configuration::{self, Configuration, ServerConfig};
use crate::gate::server::{Listener, ServerContext};
use argh::FromArgs;
use tracing::warn;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "serve",
    description = "Run the authentication gate"
)]
pub struct Options {}

pub struct Command {
    listener: Listener,
    server_config: ServerConfig,
}

impl Command {
    pub fn new(server_config: &ServerConfig, context: ServerContext) -> Command {
        Command {
            listener: Listener::new(server_config, context),
            server_config: server_config.clone(),
        }
    }

    /// Swap in a context built from a reloaded configuration.
    pub fn notify_config_change(&self, config: &Configuration) -> Result<(), configuration::Error> {
        if config.server.bind_address != self.server_config.bind_address
            || config.server.port != self.server_config.port
        {
            warn!("Listening address changes are only applied on restart");
        }

        let context = self.listener.context().reload(config)?;
        self.listener.notify_config_change(context);
        Ok(())
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        self.listener.serve().await?;
        Ok(())
    }
}
