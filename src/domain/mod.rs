pub mod event;
pub mod state;
pub mod trigger;

pub use event::*;
pub use state::*;
pub use trigger::*;
