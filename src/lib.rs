pub mod config;
pub mod market_data;
pub mod session;
pub mod telemetry;

pub use market_data::book::{BookSide, BookSnapshot, PriceLevel, Side};
pub use session::{SessionHandle, SessionManager, SessionState, SessionUpdate};
