/*
[INPUT]:  WebSocket configuration and subscription channels
[OUTPUT]: Real-time price streams
[POS]:    WebSocket layer - push-stream data
[UPDATE]: When adding channels or changing connection logic
*/

pub mod client;
pub mod message;

pub use client::{StreamMessage, VenueWebSocket};
pub use message::PriceUpdate;
