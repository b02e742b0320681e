pub mod controller;
pub mod events;

pub use controller::{LockoutController, LockoutStatus};
pub use events::Event;
