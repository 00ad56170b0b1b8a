// Convert raw depth payloads into a bounded, ordered BookSnapshot.
// Feed levels are trusted to arrive best-first; we still re-sort after
// truncating so a misordered feed cannot break the side invariants.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::market_data::adapters::binance_types::WsDepth;
use crate::market_data::book::{BookSide, BookSnapshot, PriceLevel, Side, DEFAULT_MAX_LEVELS};

#[derive(Debug, Clone, Copy)]
pub struct Normaliser {
    pub max_levels: usize,
}

impl Default for Normaliser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEVELS)
    }
}

impl Normaliser {
    pub fn new(max_levels: usize) -> Self {
        Self { max_levels }
    }

    /// Returns `None` when the payload is not a depth snapshot (heartbeats,
    /// subscription acks, diff events, garbage). Callers treat that as "no change".
    pub fn normalise(&self, raw: &str) -> Option<BookSnapshot> {
        let depth: WsDepth = match serde_json::from_str(raw) {
            Ok(depth) => depth,
            Err(e) => {
                debug!(error = %e, len = raw.len(), "Discarding non-snapshot message");
                return None;
            }
        };
        trace!(last_update_id = ?depth.last_update_id, "Normalising depth snapshot");

        let bids = self.norm_side(Side::Bid, &depth.bids);
        let asks = self.norm_side(Side::Ask, &depth.asks);
        let book = BookSnapshot::new(bids, asks);
        if book.is_crossed() {
            warn!(spread = ?book.spread(), "Feed delivered a crossed book");
        }
        Some(book)
    }

    fn norm_side(&self, side: Side, raw: &[Value]) -> BookSide {
        let levels = raw
            .iter()
            .filter_map(|entry| {
                let level = parse_level(entry);
                if level.is_none() {
                    debug!(?side, %entry, "Dropping unparseable level");
                }
                level
            })
            .take(self.max_levels);
        BookSide::from_levels(side, levels)
    }
}

/// `["price", "qty"]` -> PriceLevel. Price must be positive, quantity non-negative.
pub fn parse_level(entry: &Value) -> Option<PriceLevel> {
    let pair = entry.as_array()?;
    let price = parse_decimal(pair.first()?)?;
    let quantity = parse_decimal(pair.get(1)?)?;
    if price <= Decimal::ZERO || quantity < Decimal::ZERO {
        return None;
    }
    Some(PriceLevel::new(price, quantity))
}

fn parse_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => decimal_from_text(s.trim()),
        // serde_json renders small or large floats as e.g. `1e-7`
        Value::Number(n) => decimal_from_text(&n.to_string()),
        _ => None,
    }
}

fn decimal_from_text(s: &str) -> Option<Decimal> {
    Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s)).ok()
}
