use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReactorError {
    #[error("reactor syscall failed: {0}")]
    Transport(#[source] std::io::Error),
}

impl From<std::io::Error> for ReactorError {
    fn from(e: std::io::Error) -> Self {
        ReactorError::Transport(e)
    }
}
