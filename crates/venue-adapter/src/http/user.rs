/*
[INPUT]:  Query parameters and bearer authentication
[OUTPUT]: Account data (open orders, individual orders, positions)
[POS]:    HTTP layer - user data endpoints (require auth)
[UPDATE]: When user endpoints or query parameters change
*/

use crate::http::error::Result;
use crate::http::VenueClient;
use crate::types::{OpenOrdersResponse, Order, Position};

impl VenueClient {
    /// List the resting orders for a symbol.
    ///
    /// GET /api/open_orders?symbol={symbol}
    pub async fn list_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let endpoint = format!("/api/open_orders?symbol={symbol}");
        let resp: OpenOrdersResponse = self.get_authed(&endpoint).await?;
        Ok(resp.result)
    }

    /// Fetch a single order by client id.
    ///
    /// GET /api/order?symbol={symbol}&client_id={client_id}
    /// Returns [`VenueError::NotFound`](crate::http::VenueError::NotFound) when
    /// the venue has not indexed the order (yet, or ever).
    pub async fn get_order(&self, symbol: &str, client_id: &str) -> Result<Order> {
        let endpoint = format!("/api/order?symbol={symbol}&client_id={client_id}");
        self.get_authed(&endpoint).await
    }

    /// Fetch the position for a symbol, if any.
    ///
    /// GET /api/position?symbol={symbol}
    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        let endpoint = format!("/api/position?symbol={symbol}");
        let positions: Vec<Position> = self.get_authed(&endpoint).await?;
        Ok(positions.into_iter().find(|p| !p.qty.is_zero()))
    }
}
