//! Event identity and message types: [`EventType`], [`TargetId`],
//! [`EventTarget`], and [`Event`] itself.

pub mod message;
pub mod target;
pub mod types;

pub use message::Event;
pub use target::EventTarget;
pub use types::{EventType, TargetId};
