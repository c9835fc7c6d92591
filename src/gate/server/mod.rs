mod cookies;
mod handlers;
pub mod http_server;
pub mod listener;
pub mod middleware;
mod request_ext;
mod response_body;
pub mod route;
mod server_context;

pub use http_server::serve_request;
pub use listener::Listener;
pub use response_body::ResponseBody;
pub use server_context::ServerContext;
