/*
[INPUT]:  Push-stream price updates via `watch`, REST fallback via VenueApi
[OUTPUT]: Freshest per-symbol PriceSnapshot with staleness accounting
[POS]:    Data layer - reference price tracking (no trading logic)
[UPDATE]: When snapshot fields or fallback semantics change
*/

use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

use venue_adapter::{Result, SymbolPrice};

use crate::venue::VenueApi;

const BPS_DENOMINATOR: i64 = 10_000;

/// The freshest view of a symbol's reference prices.
///
/// Consumers must treat a missing snapshot as "no reference available" and
/// skip action; the tracker never fabricates fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSnapshot {
    pub mark: Decimal,
    pub mid: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    /// Venue timestamp (ms); snapshots are replaced monotonically by this.
    pub venue_time: i64,
    pub received_at: Instant,
}

impl PriceSnapshot {
    /// Mid price: the venue's when pushed, otherwise computed from top-of-book.
    pub fn effective_mid(&self) -> Option<Decimal> {
        if self.mid.is_some() {
            return self.mid;
        }
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    pub fn spread_bps(&self) -> Option<Decimal> {
        let (bid, ask) = (self.bid?, self.ask?);
        let mid = self.effective_mid()?;
        if mid <= Decimal::ZERO {
            return None;
        }
        Some(((ask - bid) / mid) * Decimal::from(BPS_DENOMINATOR))
    }

    pub fn mark_mid_divergence_bps(&self) -> Option<Decimal> {
        let mid = self.effective_mid()?;
        if mid <= Decimal::ZERO {
            return None;
        }
        Some(((self.mark - mid).abs() / mid) * Decimal::from(BPS_DENOMINATOR))
    }

    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.received_at) > threshold
    }
}

fn snapshot_from_price(price: &SymbolPrice, now: Instant) -> Option<PriceSnapshot> {
    if price.mark_price <= Decimal::ZERO {
        return None;
    }

    Some(PriceSnapshot {
        mark: price.mark_price,
        mid: price.mid_price,
        bid: price.best_bid,
        ask: price.best_ask,
        venue_time: price.time,
        received_at: now,
    })
}

/// Tracks the freshest price for one symbol.
///
/// Push updates arrive through a `watch` channel owned by the feed; when the
/// stream goes quiet the tracker pulls the reference over REST instead.
#[derive(Debug)]
pub struct PriceTracker {
    symbol: String,
    rx: watch::Receiver<Option<SymbolPrice>>,
    snapshot: Option<PriceSnapshot>,
    rest_fallback_interval: Duration,
}

impl PriceTracker {
    pub fn new(
        symbol: impl Into<String>,
        rx: watch::Receiver<Option<SymbolPrice>>,
        rest_fallback_interval: Duration,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            rx,
            snapshot: None,
            rest_fallback_interval,
        }
    }

    /// Apply one push update. Older venue timestamps are dropped.
    pub fn on_push(&mut self, price: &SymbolPrice, now: Instant) {
        if let Some(current) = &self.snapshot
            && price.time <= current.venue_time
        {
            debug!(symbol = %self.symbol, time = price.time, "dropping out-of-order price push");
            return;
        }

        if let Some(snapshot) = snapshot_from_price(price, now) {
            self.snapshot = Some(snapshot);
        }
    }

    /// Drain the watch channel into the local snapshot.
    pub fn refresh(&mut self, now: Instant) {
        if self
            .rx
            .has_changed()
            .unwrap_or(false)
        {
            let update = self.rx.borrow_and_update().clone();
            if let Some(price) = update {
                self.on_push(&price, now);
            }
        }
    }

    pub fn latest(&self) -> Option<&PriceSnapshot> {
        self.snapshot.as_ref()
    }

    /// True when no push arrived within the fallback interval.
    pub fn wants_rest_refresh(&self, now: Instant) -> bool {
        match &self.snapshot {
            None => true,
            Some(snapshot) => {
                now.saturating_duration_since(snapshot.received_at) > self.rest_fallback_interval
            }
        }
    }

    /// Pull the reference over REST and fold it in like a push.
    pub async fn refresh_rest(&mut self, venue: &dyn VenueApi, now: Instant) -> Result<()> {
        let price = venue.get_price(&self.symbol).await?;
        self.on_push(&price, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::str::FromStr;
    use venue_adapter::{
        CancelOrderRequest, CancelOrderResponse, Order, PlaceOrderRequest, PlaceOrderResponse,
        Position, VenueError,
    };

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
    }

    fn price(mark: &str, mid: &str, time: i64) -> SymbolPrice {
        SymbolPrice {
            symbol: "BTC-USD".to_string(),
            mark_price: dec(mark),
            index_price: dec(mark),
            mid_price: Some(dec(mid)),
            best_bid: None,
            best_ask: None,
            time,
        }
    }

    fn tracker() -> (watch::Sender<Option<SymbolPrice>>, PriceTracker) {
        let (tx, rx) = watch::channel(None);
        let tracker = PriceTracker::new("BTC-USD", rx, Duration::from_secs(5));
        (tx, tracker)
    }

    struct PriceOnlyVenue {
        price: SymbolPrice,
    }

    #[async_trait]
    impl VenueApi for PriceOnlyVenue {
        async fn place_order(&self, _req: PlaceOrderRequest) -> Result<PlaceOrderResponse> {
            Err(VenueError::InvalidResponse("unused".to_string()))
        }

        async fn cancel_order(&self, _req: CancelOrderRequest) -> Result<CancelOrderResponse> {
            Err(VenueError::InvalidResponse("unused".to_string()))
        }

        async fn list_open_orders(&self, _symbol: &str) -> Result<Vec<Order>> {
            Ok(Vec::new())
        }

        async fn get_order(&self, _symbol: &str, _client_id: &str) -> Result<Order> {
            Err(VenueError::NotFound)
        }

        async fn get_position(&self, _symbol: &str) -> Result<Option<Position>> {
            Ok(None)
        }

        async fn get_price(&self, _symbol: &str) -> Result<SymbolPrice> {
            Ok(self.price.clone())
        }
    }

    #[test]
    fn out_of_order_pushes_are_dropped() {
        let (_tx, mut tracker) = tracker();
        let now = Instant::now();

        tracker.on_push(&price("94000", "94001", 200), now);
        tracker.on_push(&price("93000", "93001", 100), now);

        assert_eq!(tracker.latest().unwrap().mark, dec("94000"));
    }

    #[test]
    fn refresh_drains_the_watch_channel() {
        let (tx, mut tracker) = tracker();
        let now = Instant::now();

        tx.send(Some(price("94000", "94001", 1))).unwrap();
        tracker.refresh(now);

        assert_eq!(tracker.latest().unwrap().mark, dec("94000"));
    }

    #[test]
    fn staleness_uses_receipt_time() {
        let (_tx, mut tracker) = tracker();
        let now = Instant::now();
        tracker.on_push(&price("94000", "94001", 1), now);

        let snapshot = tracker.latest().unwrap();
        assert!(!snapshot.is_stale(now + Duration::from_secs(30), Duration::from_secs(30)));
        assert!(snapshot.is_stale(now + Duration::from_secs(31), Duration::from_secs(30)));
    }

    #[test]
    fn divergence_and_spread_come_from_the_mid() {
        let snapshot = PriceSnapshot {
            mark: dec("94000"),
            mid: Some(dec("94050")),
            bid: Some(dec("94040")),
            ask: Some(dec("94060")),
            venue_time: 1,
            received_at: Instant::now(),
        };

        let divergence = snapshot.mark_mid_divergence_bps().unwrap();
        assert!(divergence > dec("5.3") && divergence < dec("5.4"));

        let spread = snapshot.spread_bps().unwrap();
        assert!(spread > dec("2.1") && spread < dec("2.2"));
    }

    #[test]
    fn fallback_is_wanted_after_push_silence() {
        let (_tx, mut tracker) = tracker();
        let now = Instant::now();

        assert!(tracker.wants_rest_refresh(now));

        tracker.on_push(&price("94000", "94001", 1), now);
        assert!(!tracker.wants_rest_refresh(now + Duration::from_secs(5)));
        assert!(tracker.wants_rest_refresh(now + Duration::from_secs(6)));
    }

    #[tokio::test]
    async fn rest_refresh_populates_the_mark() {
        let (_tx, mut tracker) = tracker();
        let venue = PriceOnlyVenue {
            price: price("94123", "94124", 7),
        };

        tracker
            .refresh_rest(&venue, Instant::now())
            .await
            .unwrap();

        assert_eq!(tracker.latest().unwrap().mark, dec("94123"));
    }
}
