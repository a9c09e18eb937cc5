/*
[INPUT]:  Symbol identifiers
[OUTPUT]: Market data (symbol constants, reference prices)
[POS]:    HTTP layer - public market data endpoints (no auth)
[UPDATE]: When public endpoints or response formats change
*/

use crate::http::error::{Result, VenueError};
use crate::http::VenueClient;
use crate::types::{SymbolInfo, SymbolPrice};

impl VenueClient {
    /// Query the exchange-imposed constants for a symbol.
    ///
    /// GET /api/symbol_info?symbol={symbol}
    pub async fn query_symbol_info(&self, symbol: &str) -> Result<SymbolInfo> {
        let endpoint = format!("/api/symbol_info?symbol={symbol}");
        let infos: Vec<SymbolInfo> = self.get_public(&endpoint).await?;
        infos
            .into_iter()
            .find(|info| info.symbol == symbol)
            .ok_or_else(|| VenueError::InvalidResponse(format!("no symbol info for {symbol}")))
    }

    /// Query the current reference price for a symbol.
    ///
    /// GET /api/symbol_price?symbol={symbol}
    /// This is the pull-based fallback behind the push stream.
    pub async fn query_symbol_price(&self, symbol: &str) -> Result<SymbolPrice> {
        let endpoint = format!("/api/symbol_price?symbol={symbol}");
        self.get_public(&endpoint).await
    }
}
