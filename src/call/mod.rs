pub mod dispatch;
pub mod orchestrator;
pub mod session;
pub mod state;


pub use orchestrator::CallOrchestrator;
pub use session::CallSession;
pub use state::{CallEnded, CallSnapshot, CallState, EndReason, Role, SessionId};
