use rust_decimal::Decimal;
use serde::Serialize;

use crate::market_data::book::{BookSide, BookSnapshot};

/// Connection health of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// No instrument selected.
    Idle,
    /// Transport opening, no snapshot received yet.
    Connecting,
    /// At least one snapshot has been applied.
    Connected,
    /// Transport failed; book is empty until the caller re-opens.
    Error,
    /// Superseded by another instrument or closed by the caller.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Error => write!(f, "ERROR"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// What subscribers receive on every change, tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUpdate {
    pub symbol: String,
    pub generation: u64,
    pub state: SessionState,
    pub book: BookSnapshot,
    pub mid_price: Option<Decimal>,
    pub error: Option<String>,
}

impl SessionUpdate {
    pub(crate) fn new(symbol: &str, generation: u64, state: SessionState) -> Self {
        Self {
            symbol: symbol.to_string(),
            generation,
            state,
            book: BookSnapshot::empty(),
            mid_price: None,
            error: None,
        }
    }

    pub fn bids(&self) -> &BookSide {
        &self.book.bids
    }

    pub fn asks(&self) -> &BookSide {
        &self.book.asks
    }

    /// Price to show next to the book. The book mid wins whenever both sides
    /// exist; `fallback` (e.g. a ticker price from elsewhere) only fills the gap.
    pub fn display_price(&self, fallback: Option<Decimal>) -> Option<Decimal> {
        self.mid_price.or(fallback)
    }

    pub(crate) fn apply_book(&mut self, book: BookSnapshot) {
        self.mid_price = book.mid_price();
        self.book = book;
        self.state = SessionState::Connected;
        self.error = None;
    }

    pub(crate) fn fail(&mut self, reason: String) {
        self.book = BookSnapshot::empty();
        self.mid_price = None;
        self.state = SessionState::Error;
        self.error = Some(reason);
    }

    pub(crate) fn close(&mut self) {
        self.book = BookSnapshot::empty();
        self.mid_price = None;
        self.error = None;
        if self.state != SessionState::Idle {
            self.state = SessionState::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::book::{PriceLevel, Side};
    use rust_decimal_macros::dec;

    fn two_sided() -> BookSnapshot {
        BookSnapshot::new(
            BookSide::from_levels(Side::Bid, vec![PriceLevel::new(dec!(100), dec!(1))]),
            BookSide::from_levels(Side::Ask, vec![PriceLevel::new(dec!(101), dec!(1))]),
        )
    }

    #[test]
    fn test_display_price_prefers_book() {
        let mut u = SessionUpdate::new("BTC", 1, SessionState::Connecting);
        assert_eq!(u.display_price(Some(dec!(99))), Some(dec!(99)));
        assert_eq!(u.display_price(None), None);

        u.apply_book(two_sided());
        assert_eq!(u.state, SessionState::Connected);
        assert_eq!(u.display_price(Some(dec!(99))), Some(dec!(100.5)));
    }

    #[test]
    fn test_fail_clears_book() {
        let mut u = SessionUpdate::new("BTC", 1, SessionState::Connecting);
        u.apply_book(two_sided());
        u.fail("reset".into());
        assert_eq!(u.state, SessionState::Error);
        assert!(u.book.is_empty());
        assert_eq!(u.mid_price, None);
        assert_eq!(u.error.as_deref(), Some("reset"));
    }

    #[test]
    fn test_close_keeps_idle() {
        let mut idle = SessionUpdate::new("", 3, SessionState::Idle);
        idle.close();
        assert_eq!(idle.state, SessionState::Idle);

        let mut live = SessionUpdate::new("ETH", 4, SessionState::Connected);
        live.close();
        assert_eq!(live.state, SessionState::Closed);
        assert_eq!(live.state.to_string(), "CLOSED");
    }
}
