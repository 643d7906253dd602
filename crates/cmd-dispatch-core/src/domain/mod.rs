//! Domain model (dispatcher / completion states, caller-facing errors).

pub mod errors;
pub mod state;

pub use self::errors::DispatchError;
pub use self::state::{CompletionState, DispatcherState};
