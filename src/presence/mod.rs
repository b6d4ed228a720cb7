pub mod controller;
pub mod loop_worker;
pub mod probe;

pub use controller::PresenceController;
pub use probe::{CommandProbe, PresenceProbe};
