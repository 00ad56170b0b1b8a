// Feed session lifecycle: one live depth subscription per consumer
pub mod handle;
pub mod manager;
pub mod state;

pub use handle::SessionHandle;
pub use manager::SessionManager;
pub use state::{SessionState, SessionUpdate};
