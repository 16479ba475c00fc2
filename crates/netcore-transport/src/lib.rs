mod error;
mod kcp;
mod tcp;
mod websocket;

pub use error::AcceptError;
pub use kcp::{KcpAcceptor, KcpTransport};
pub use tcp::{AcceptorStatsSnapshot, TcpAcceptor, TcpTransport, connect as connect_tcp};
pub use websocket::{WebSocketAcceptor, WebSocketTransport};
