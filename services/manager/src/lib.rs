//! Manager process: per-account trader supervision over local IPC sockets,
//! with a unified query/command surface across accounts.

pub mod client;
pub mod manager;
pub mod proxy;

pub use client::SocketClient;
pub use manager::Manager;
pub use proxy::TraderProxy;
