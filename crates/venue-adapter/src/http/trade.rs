/*
[INPUT]:  Order requests with body-signature headers
[OUTPUT]: Order placement/cancellation confirmations
[POS]:    HTTP layer - trading endpoints (require auth + body signature)
[UPDATE]: When trading endpoints or the order flow change
*/

use crate::http::error::{Result, VenueError};
use crate::http::VenueClient;
use crate::types::{
    CancelOrderRequest, CancelOrderResponse, PlaceOrderRequest, PlaceOrderResponse,
};

impl VenueClient {
    /// Place an order.
    ///
    /// POST /api/place_order
    /// A venue-level non-zero code is a definitive rejection, not a transport
    /// failure; it surfaces as [`VenueError::Rejected`].
    pub async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResponse> {
        let resp: PlaceOrderResponse = self.post_signed("/api/place_order", &req).await?;
        if resp.code != 0 {
            return Err(VenueError::Rejected {
                code: resp.code,
                message: resp.message,
            });
        }
        Ok(resp)
    }

    /// Cancel an existing order by client id.
    ///
    /// POST /api/cancel_order
    pub async fn cancel_order(&self, req: CancelOrderRequest) -> Result<CancelOrderResponse> {
        let resp: CancelOrderResponse = self.post_signed("/api/cancel_order", &req).await?;
        if resp.code != 0 {
            return Err(VenueError::Rejected {
                code: resp.code,
                message: resp.message,
            });
        }
        Ok(resp)
    }
}
