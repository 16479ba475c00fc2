use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcceptError {
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),
    #[error("reactor registration failed: {0}")]
    Reactor(#[from] netcore_reactor::ReactorError),
    #[error("transport io error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for AcceptError {
    fn from(e: std::io::Error) -> Self {
        AcceptError::Io(e)
    }
}
