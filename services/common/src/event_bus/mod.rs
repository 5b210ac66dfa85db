//! Event-driven dispatch core: typed events fanned out per topic

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventHandler};
pub use event::TraderEvent;
