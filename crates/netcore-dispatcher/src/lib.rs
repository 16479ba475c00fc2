mod dispatcher;
mod event;

pub use dispatcher::Dispatcher;
pub use event::{ADD_EVENT, EXIT_EVENT, Event, PeerId, REMOVE_EVENT};
