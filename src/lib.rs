pub mod callback;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod endpoint;
pub mod errors;
pub mod handler;
pub mod heartbeat;
pub mod okx;
pub mod reconnect;
pub mod registry;
pub mod subscription;

#[cfg(test)]
mod test_support;

pub use callback::{ConnectionCallback, LoggingCallback, SubscriptionAction, SubscriptionCallback};
pub use client::{ClientId, ClientSpec};
pub use connection::{ConnectionState, DisconnectReason};
pub use errors::{Result, SocketError};
pub use handler::{HandlerContext, MessageHandler};
pub use registry::ConnectionRegistry;
