// Source: https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams
// (Partial Book Depth Streams -> <symbol>@depth<levels>@100ms)
use serde::Deserialize;

/// Partial book depth payload. Levels stay as raw JSON so one bad pair
/// can be dropped without rejecting the whole message.
#[derive(Debug, Deserialize)]
pub struct WsDepth {
    #[serde(rename = "lastUpdateId", default)]
    pub last_update_id: Option<u64>,
    pub bids: Vec<serde_json::Value>,
    pub asks: Vec<serde_json::Value>,
}
