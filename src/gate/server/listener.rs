use crate::configuration::ServerConfig;
use crate::gate::server::{serve_request, ServerContext};
use arc_swap::ArcSwap;
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub struct Listener {
    binding_address: SocketAddr,
    context: ArcSwap<ServerContext>,
}

impl Listener {
    pub fn new(server_config: &ServerConfig, context: ServerContext) -> Self {
        let binding_address = SocketAddr::new(server_config.bind_address, server_config.port);

        Self {
            binding_address,
            context: ArcSwap::from_pointee(context),
        }
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.context.load_full()
    }

    /// Connections accepted from now on use `context`; open connections keep the one they
    /// started with.
    pub fn notify_config_change(&self, context: ServerContext) {
        self.context.store(Arc::new(context));
    }

    pub async fn serve(&self) -> Result<(), io::Error> {
        info!("Listening on {}", self.binding_address);
        let listener = TcpListener::bind(self.binding_address).await?;

        loop {
            debug!("Waiting for incoming connection");
            let (tcp, remote_address) = listener.accept().await?;

            debug!("Accepted connection from {remote_address}");
            let stream = TokioIo::new(tcp);
            let context = Arc::clone(&self.context.load());

            tokio::spawn(Box::pin(serve_request(stream, context, remote_address)));
        }
    }
}
