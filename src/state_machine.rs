//! Query session state machine
//!
//! Elm-style: `transition` is pure and returns effects for the host to run.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::Event;
pub use state::{Outcome, SessionState};
pub use transition::transition;
