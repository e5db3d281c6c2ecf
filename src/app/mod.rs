pub mod sessions;
pub mod state;

pub use sessions::{SessionGuard, SessionTracker};
pub use state::AppState;
