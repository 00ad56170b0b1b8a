use rust_decimal::Decimal;
use serde::Serialize;
use smallvec::SmallVec;

/// Default depth shown per side.
pub const DEFAULT_MAX_LEVELS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Bid,
    Ask,
}

/// One aggregated price level as received from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Best-first levels for one side of the book.
///
/// Bids are kept in descending price order, asks ascending, with no repeated
/// price. The only way to build a non-empty side is [`BookSide::from_levels`],
/// which enforces that ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSide {
    side: Side,
    levels: SmallVec<[PriceLevel; DEFAULT_MAX_LEVELS]>,
}

impl BookSide {
    pub fn empty(side: Side) -> Self {
        Self { side, levels: SmallVec::new() }
    }

    /// Sorts best-first and collapses repeated prices, keeping the first one seen.
    pub fn from_levels<I>(side: Side, levels: I) -> Self
    where
        I: IntoIterator<Item = PriceLevel>,
    {
        let mut levels: SmallVec<[PriceLevel; DEFAULT_MAX_LEVELS]> = levels.into_iter().collect();
        // stable sort so the dedup below keeps the feed's first occurrence
        match side {
            Side::Bid => levels.sort_by(|a, b| b.price.cmp(&a.price)),
            Side::Ask => levels.sort_by(|a, b| a.price.cmp(&b.price)),
        }
        levels.dedup_by(|later, earlier| later.price == earlier.price);
        Self { side, levels }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    pub fn best(&self) -> Option<&PriceLevel> {
        self.levels.first()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Running quantity total from the best level outwards. Saturates at `Decimal::MAX`.
    pub fn cumulative(&self) -> Vec<(PriceLevel, Decimal)> {
        let mut total = Decimal::ZERO;
        self.levels
            .iter()
            .map(|lvl| {
                total = total.saturating_add(lvl.quantity);
                (*lvl, total)
            })
            .collect()
    }
}

/// Full replacement view of both sides of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSnapshot {
    pub bids: BookSide,
    pub asks: BookSide,
}

impl Default for BookSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl BookSnapshot {
    pub fn empty() -> Self {
        Self { bids: BookSide::empty(Side::Bid), asks: BookSide::empty(Side::Ask) }
    }

    pub fn new(bids: BookSide, asks: BookSide) -> Self {
        Self { bids, asks }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn bbo(&self) -> (Option<&PriceLevel>, Option<&PriceLevel>) {
        (self.bids.best(), self.asks.best())
    }

    /// Midpoint of best bid and best ask; `None` while either side is empty.
    pub fn mid_price(&self) -> Option<Decimal> {
        match self.bbo() {
            (Some(bid), Some(ask)) => Some(midpoint(bid.price, ask.price)),
            _ => None,
        }
    }

    /// Best ask minus best bid. Zero or negative on a locked/crossed book.
    pub fn spread(&self) -> Option<Decimal> {
        match self.bbo() {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn is_crossed(&self) -> bool {
        matches!(self.bbo(), (Some(bid), Some(ask)) if bid.price >= ask.price)
    }
}

// Exact sum when it fits. Near Decimal::MAX the sum overflows, so step half the
// gap from one price instead; the result stays between the two.
fn midpoint(a: Decimal, b: Decimal) -> Decimal {
    match a.checked_add(b) {
        Some(sum) => sum / Decimal::TWO,
        None => a.saturating_add(b.saturating_sub(a) / Decimal::TWO),
    }
}
