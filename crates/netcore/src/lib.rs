mod error;
mod runtime;

pub use error::RuntimeError;
pub use runtime::{Runtime, RuntimeBuilder};

pub use netcore_codec as codec;
pub use netcore_dispatcher as dispatcher;
pub use netcore_memory as memory;
pub use netcore_peer as peer;
pub use netcore_reactor as reactor;
pub use netcore_timing as timing;
pub use netcore_transport as transport;
pub use netcore_utils as utils;

pub use netcore_dispatcher::{Dispatcher, Event, PeerId};
pub use netcore_memory::{Buffer, Pool};
pub use netcore_peer::{Peer, PeerState};
pub use netcore_reactor::ReactorPool;

pub use tracing;
pub use type_hash;
pub use type_hash_derive;

/// Installs a `tracing-subscriber` env-filtered fmt subscriber as the
/// global default. Not called by the library itself — applications that
/// want it opt in explicitly, matching "logging *adapters* are out of
/// scope, logging itself is not."
#[cfg(feature = "dev")]
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    #[test]
    fn builder_assembles_a_runtime() {
        let runtime = Runtime::builder().workers(1).build().unwrap();
        assert_eq!(runtime.reactor_pool().len(), 1);
    }

    #[test]
    fn tcp_acceptor_binds_against_the_shared_reactor_pool() {
        let runtime = Runtime::builder().workers(1).build().unwrap();
        runtime.spawn();

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let acceptor = runtime.bind_tcp(addr).unwrap();
        assert!(acceptor.local_addr().unwrap().port() > 0);

        runtime.stop();
    }
}
