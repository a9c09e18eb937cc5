/*
[INPUT]:  The adapter's REST client
[OUTPUT]: The async seam the engine quotes through (mockable in tests)
[POS]:    Boundary layer - venue operations used by the quoting engine
[UPDATE]: When the engine starts depending on a new venue operation
*/

use async_trait::async_trait;

use venue_adapter::{
    CancelOrderRequest, CancelOrderResponse, Order, PlaceOrderRequest, PlaceOrderResponse,
    Position, Result, SymbolPrice, VenueClient,
};

/// The venue operations the quoting engine consumes.
///
/// Implemented by [`VenueClient`]; tests substitute scripted mocks.
#[async_trait]
pub trait VenueApi: Send + Sync {
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResponse>;

    async fn cancel_order(&self, req: CancelOrderRequest) -> Result<CancelOrderResponse>;

    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<Order>>;

    async fn get_order(&self, symbol: &str, client_id: &str) -> Result<Order>;

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>>;

    async fn get_price(&self, symbol: &str) -> Result<SymbolPrice>;
}

#[async_trait]
impl VenueApi for VenueClient {
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResponse> {
        VenueClient::place_order(self, req).await
    }

    async fn cancel_order(&self, req: CancelOrderRequest) -> Result<CancelOrderResponse> {
        VenueClient::cancel_order(self, req).await
    }

    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        VenueClient::list_open_orders(self, symbol).await
    }

    async fn get_order(&self, symbol: &str, client_id: &str) -> Result<Order> {
        VenueClient::get_order(self, symbol, client_id).await
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        VenueClient::get_position(self, symbol).await
    }

    async fn get_price(&self, symbol: &str) -> Result<SymbolPrice> {
        VenueClient::query_symbol_price(self, symbol).await
    }
}
