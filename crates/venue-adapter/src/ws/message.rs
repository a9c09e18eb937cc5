/*
[INPUT]:  Raw WebSocket message payloads
[OUTPUT]: Parsed push-stream data structs
[POS]:    WebSocket layer - message schemas
[UPDATE]: When the venue adds channels or changes payload formats
*/

use serde::{Deserialize, Serialize};

/// Price push payload. Decimals arrive as strings and are parsed downstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub mark_price: String,
    #[serde(default)]
    pub mid_price: String,
    #[serde(default)]
    pub best_bid: String,
    #[serde(default)]
    pub best_ask: String,
    /// Venue timestamp in milliseconds.
    pub time: i64,
}
