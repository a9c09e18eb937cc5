/*
[INPUT]:  API schema definitions and serde requirements
[OUTPUT]: Typed Rust structs with serialization support
[POS]:    Data layer - type definitions for venue API communication
[UPDATE]: When the venue schema changes or new types are added
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{OrderStatus, OrderType, Side, TimeInForce};

/// Exchange-imposed trading constants for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_order_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_order_qty: Decimal,
    pub price_tick_decimals: u32,
    pub qty_tick_decimals: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_leverage: Decimal,
    #[serde(default)]
    pub enabled: bool,
}

/// A single order as reported by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub client_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub fill_qty: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub fill_avg_price: Decimal,
    pub reduce_only: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// An open position as reported by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub symbol: String,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub qty: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub entry_price: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub notional_usd: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub liq_price: Decimal,
    #[serde(
        default,
        deserialize_with = "serde_helpers::deserialize_decimal_or_zero",
        serialize_with = "serde_helpers::serialize_decimal"
    )]
    pub upnl: Decimal,
    pub updated_at: String,
}

impl Position {
    pub fn side(&self) -> Option<Side> {
        if self.qty.is_zero() {
            None
        } else if self.qty.is_sign_positive() {
            Some(Side::Buy)
        } else {
            Some(Side::Sell)
        }
    }
}

/// Reference price snapshot for a symbol (REST shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub index_price: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub mid_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub best_bid: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub best_ask: Option<Decimal>,
    /// Venue timestamp in milliseconds; used for monotonic replacement.
    pub time: i64,
}

mod serde_helpers {
    use super::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;
    use std::str::FromStr;

    pub fn deserialize_decimal_or_zero<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Decimal::ZERO);
        }

        if let Some(raw) = value.as_str() {
            if raw.trim().is_empty() {
                return Ok(Decimal::ZERO);
            }
            return Decimal::from_str(raw).map_err(serde::de::Error::custom);
        }

        if value.is_number() {
            return Decimal::from_str(&value.to_string()).map_err(serde::de::Error::custom);
        }

        Err(serde::de::Error::custom("invalid decimal value"))
    }

    pub fn serialize_decimal<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn order_deserializes_with_string_decimals() {
        let value = json!({
            "id": 42,
            "client_id": "mf-1",
            "symbol": "BTC-USD",
            "side": "buy",
            "order_type": "limit",
            "time_in_force": "alo",
            "status": "open",
            "price": "93943.60",
            "qty": "0.0001",
            "fill_qty": "0",
            "reduce_only": false,
            "created_at": "0",
            "updated_at": "0",
        });

        let order: Order = serde_json::from_value(value).expect("order should deserialize");

        assert_eq!(order.price, Some(Decimal::from_str("93943.60").unwrap()));
        assert_eq!(order.fill_avg_price, Decimal::ZERO);
        assert!(order.status.is_resting());
    }

    #[test]
    fn position_side_follows_qty_sign() {
        let value = json!({
            "id": 1,
            "symbol": "BTC-USD",
            "qty": "-0.0002",
            "entry_price": "94000",
            "notional_usd": "18.8",
            "liq_price": "0",
            "upnl": "0",
            "updated_at": "0",
        });

        let position: Position = serde_json::from_value(value).expect("position deserializes");
        assert_eq!(position.side(), Some(Side::Sell));
    }

    #[test]
    fn cancelled_status_accepts_both_spellings() {
        let a: OrderStatus = serde_json::from_value(json!("canceled")).unwrap();
        let b: OrderStatus = serde_json::from_value(json!("cancelled")).unwrap();
        assert_eq!(a, OrderStatus::Cancelled);
        assert_eq!(b, OrderStatus::Cancelled);
    }
}
