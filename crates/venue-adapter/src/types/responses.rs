/*
[INPUT]:  API schema definitions and serde requirements
[OUTPUT]: Typed Rust response structs with serialization support
[POS]:    Data layer - type definitions for venue API communication
[UPDATE]: When the venue schema changes or new types are added
*/

use serde::{Deserialize, Serialize};

use super::models::Order;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub order_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrdersResponse {
    pub result: Vec<Order>,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPrepareResponse {
    #[serde(rename = "signedData")]
    pub signed_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLoginResponse {
    pub token: String,
    pub address: String,
    #[serde(rename = "expiresSeconds")]
    #[serde(default)]
    pub expires_seconds: Option<u64>,
}
