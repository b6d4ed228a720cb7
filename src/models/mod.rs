pub mod session;

pub use session::{
    CloseReason, SessionClose, SessionRecord, SessionSnapshot, SessionStatus, SessionType,
};
