use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Reactor(#[from] netcore_reactor::ReactorError),
    #[error(transparent)]
    Accept(#[from] netcore_transport::AcceptError),
}
