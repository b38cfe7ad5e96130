//! Relation lifecycle dispatcher.
//!
//! Maps relation events to the flags the host schedules handlers on
//! (`endpoint.<name>.joined`, `.ready`, `.requested`) and to the side effects
//! each role performs in response.

pub mod dispatcher;
pub mod types;

pub use dispatcher::Dispatcher;
pub use types::*;
