pub mod clock;
pub mod commands;
pub mod controller;
pub mod state;

pub use clock::{Clock, SystemClock};
pub use controller::{ManagerConfig, RecoveryReport, SessionManager};
pub use state::ActiveSession;
