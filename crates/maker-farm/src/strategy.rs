/*
[INPUT]:  Price snapshots, safety gate, order manager, fill events
[OUTPUT]: A symmetric post-only ladder converged toward the reference price
[POS]:    Strategy layer - the maker-farming tick loop
[UPDATE]: When rebalance triggers, replace ordering, or fill handling change
*/

use anyhow::Result;
use rust_decimal::{Decimal, RoundingStrategy};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use venue_adapter::{
    OrderType, PlaceOrderRequest, Side, SymbolInfo, SymbolPrice, TimeInForce,
};

use crate::band;
use crate::events::{EngineEvent, EventSender};
use crate::order_manager::{CancelOutcome, FillEvent, OrderManager, OrderTiming};
use crate::price::PriceTracker;
use crate::safety::{Gate, KillReason, SafetyGuard, SafetyLimits};
use crate::stats::{FarmStats, FarmStatsSnapshot};
use crate::venue::VenueApi;

const BPS_DENOMINATOR: i64 = 10_000;

/// Per-symbol strategy parameters, resolved from configuration.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub order_size_usd: Decimal,
    pub offsets_bps: Vec<Decimal>,
    pub max_distance_bps: Decimal,
    pub drift_threshold_bps: Decimal,
    pub check_interval: Duration,
    pub sync_interval: Duration,
    pub rebalance_cooldown: Duration,
    pub rest_fallback_interval: Duration,
    pub order_timing: OrderTiming,
    pub safety: SafetyLimits,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            order_size_usd: Decimal::from(5),
            offsets_bps: vec![Decimal::from(6), Decimal::from(8)],
            max_distance_bps: Decimal::from(10),
            drift_threshold_bps: Decimal::from(15),
            check_interval: Duration::from_secs(1),
            sync_interval: Duration::from_secs(2),
            rebalance_cooldown: Duration::from_secs(3),
            rest_fallback_interval: Duration::from_secs(5),
            order_timing: OrderTiming::default(),
            safety: SafetyLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebalanceTrigger {
    Initial,
    Repair,
    BandExit,
    Drift,
}

impl RebalanceTrigger {
    fn as_str(self) -> &'static str {
        match self {
            RebalanceTrigger::Initial => "initial",
            RebalanceTrigger::Repair => "repair",
            RebalanceTrigger::BandExit => "band-exit",
            RebalanceTrigger::Drift => "drift",
        }
    }
}

/// Maker-farming strategy for one symbol.
///
/// Single writer for all of the symbol's mutable state; the tick loop is the
/// only place orders are placed or cancelled.
#[derive(Debug)]
pub struct MakerFarmingStrategy {
    symbol: String,
    params: StrategyParams,
    symbol_info: SymbolInfo,
    tracker: PriceTracker,
    guard: SafetyGuard,
    orders: OrderManager,
    fills_rx: mpsc::UnboundedReceiver<FillEvent>,
    events: EventSender,
    stats: FarmStats,
    last_sync_at: Option<Instant>,
    last_rebalance_at: Option<Instant>,
    /// Reference price the live ladder was placed at; drives drift detection.
    last_placed_ladder: Option<Decimal>,
    last_position_notional: Option<Decimal>,
    pause_logged: bool,
    stopped: bool,
}

impl MakerFarmingStrategy {
    pub fn new(
        symbol: impl Into<String>,
        params: StrategyParams,
        symbol_info: SymbolInfo,
        price_rx: watch::Receiver<Option<SymbolPrice>>,
        events: EventSender,
    ) -> Self {
        let symbol = symbol.into();
        let tracker = PriceTracker::new(&symbol, price_rx, params.rest_fallback_interval);
        let guard = SafetyGuard::new(params.safety.clone());
        let (orders, fills_rx) = OrderManager::new(&symbol, params.order_timing.clone());

        Self {
            symbol,
            params,
            symbol_info,
            tracker,
            guard,
            orders,
            fills_rx,
            events,
            stats: FarmStats::default(),
            last_sync_at: None,
            last_rebalance_at: None,
            last_placed_ladder: None,
            last_position_notional: None,
            pause_logged: false,
            stopped: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn stats(&self) -> FarmStatsSnapshot {
        self.stats.snapshot()
    }

    /// True once the emergency-stop latch fired; no further ticks run.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Drive the tick loop until shutdown or emergency stop.
    pub async fn run(&mut self, venue: &dyn VenueApi, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.params.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(symbol = %self.symbol, "strategy shutdown requested");
                    let cancelled = self.orders.cancel_all(venue, Instant::now()).await;
                    self.stats.record_cancelled(cancelled as u64);
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.tick(venue, Instant::now()).await?;
                    if self.stopped {
                        warn!(symbol = %self.symbol, "emergency stop latched; symbol halted");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One control-loop iteration.
    pub async fn tick(&mut self, venue: &dyn VenueApi, now: Instant) -> Result<()> {
        if self.stopped {
            return Ok(());
        }

        self.tracker.refresh(now);
        if self.tracker.wants_rest_refresh(now)
            && let Err(err) = self.tracker.refresh_rest(venue, now).await
        {
            debug!(symbol = %self.symbol, error = %err, "REST price fallback failed");
        }

        // No reference price means no action, not action at zero.
        let Some(snapshot) = self.tracker.latest().cloned() else {
            return Ok(());
        };

        self.guard.record_mark(now, snapshot.mark);
        let gate = self
            .guard
            .gate(now, Some(&snapshot), self.last_position_notional);

        match &gate {
            Gate::KillAll { reason } => {
                self.kill_all(venue, *reason, now).await;
                return Ok(());
            }
            Gate::PauseNew { reason, .. } => {
                if !self.pause_logged {
                    warn!(symbol = %self.symbol, reason = %reason, "pre-kill pause; holding placements");
                    self.events.emit(EngineEvent::SafetyTriggered {
                        symbol: self.symbol.clone(),
                        reason: reason.clone(),
                    });
                    self.pause_logged = true;
                }
            }
            Gate::Ok => {
                self.pause_logged = false;
            }
        }

        // Reconciliation and fill handling stay live under PAUSE_NEW.
        if self
            .last_sync_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.params.sync_interval)
        {
            match self.orders.sync(venue, now).await {
                Ok(report) => {
                    debug!(
                        symbol = %self.symbol,
                        confirmed = report.confirmed_open,
                        fills = report.fills,
                        expired = report.expired_not_found,
                        "reconcile pass"
                    );
                }
                Err(err) if err.is_auth_error() => {
                    // Credentials are gone for good; quoting blind is worse
                    // than stopping.
                    warn!(symbol = %self.symbol, error = %err, "authentication failed during reconcile");
                    self.kill_all(venue, KillReason::Authentication, now).await;
                    return Ok(());
                }
                Err(err) => {
                    warn!(symbol = %self.symbol, error = %err, "reconcile failed; retrying next cycle");
                }
            }
            self.last_sync_at = Some(now);

            match venue.get_position(&self.symbol).await {
                Ok(position) => {
                    self.last_position_notional =
                        position.map(|p| p.notional_usd.abs());
                }
                Err(err) => {
                    debug!(symbol = %self.symbol, error = %err, "position query failed");
                }
            }
        }

        while let Ok(fill) = self.fills_rx.try_recv() {
            self.handle_fill(venue, fill).await;
        }

        if matches!(gate, Gate::PauseNew { .. }) {
            self.orders.sweep_terminal();
            return Ok(());
        }

        if let Some(trigger) = self.rebalance_trigger(snapshot.mark, now) {
            self.execute_rebalance(venue, trigger, snapshot.mark, now)
                .await;
        }

        self.orders.sweep_terminal();
        Ok(())
    }

    async fn kill_all(&mut self, venue: &dyn VenueApi, reason: KillReason, now: Instant) {
        warn!(symbol = %self.symbol, reason = reason.as_str(), "KILL_ALL triggered");

        let cancelled = self.orders.cancel_all(venue, now).await;
        self.stats.record_cancelled(cancelled as u64);
        self.last_placed_ladder = None;

        self.events.emit(EngineEvent::SafetyTriggered {
            symbol: self.symbol.clone(),
            reason: reason.as_str().to_string(),
        });

        if reason.is_fatal() {
            self.events.emit(EngineEvent::EmergencyStop {
                symbol: self.symbol.clone(),
                reason: reason.as_str().to_string(),
            });
            self.stopped = true;
        }

        self.orders.sweep_terminal();
    }

    /// A fill is adverse selection for this strategy: flatten immediately with
    /// a reducing market order.
    async fn handle_fill(&mut self, venue: &dyn VenueApi, fill: FillEvent) {
        info!(
            symbol = %self.symbol,
            client_id = %fill.client_id,
            side = fill.side.as_str(),
            qty = %fill.qty,
            "fill observed; flattening"
        );

        self.stats.record_fill();
        self.events.emit(EngineEvent::OrderFilled {
            symbol: self.symbol.clone(),
            client_id: fill.client_id.clone(),
            side: fill.side,
            slot: fill.slot,
            qty: fill.qty,
            price: fill.price,
        });

        let req = PlaceOrderRequest {
            symbol: self.symbol.clone(),
            side: fill.side.opposite(),
            order_type: OrderType::Market,
            qty: fill.qty,
            time_in_force: TimeInForce::Ioc,
            reduce_only: true,
            price: None,
            client_id: None,
        };

        match venue.place_order(req).await {
            Ok(_) => {
                self.stats.record_liquidation();
            }
            Err(err) => {
                // The position gate picks this up if the flatten keeps failing.
                warn!(symbol = %self.symbol, error = %err, "flatten order failed");
            }
        }
    }

    fn rebalance_trigger(&self, mark: Decimal, now: Instant) -> Option<RebalanceTrigger> {
        let trigger = if let Some(reference) = self.last_placed_ladder {
            let cells = self.orders.snapshot();
            let missing = band::build_ladder(&self.params.offsets_bps)
                .iter()
                .any(|spec| !cells.contains_key(&(spec.side, spec.slot)));

            if missing {
                Some(RebalanceTrigger::Repair)
            } else if self
                .orders
                .resting_orders()
                .any(|order| band::distance_bps(order.price, mark) > self.params.max_distance_bps)
            {
                Some(RebalanceTrigger::BandExit)
            } else {
                let drift_bps =
                    ((mark - reference).abs() / reference) * Decimal::from(BPS_DENOMINATOR);
                (drift_bps >= self.params.drift_threshold_bps).then_some(RebalanceTrigger::Drift)
            }
        } else {
            Some(RebalanceTrigger::Initial)
        };

        let trigger = trigger?;

        if let Some(last) = self.last_rebalance_at
            && now.saturating_duration_since(last) < self.params.rebalance_cooldown
        {
            debug!(
                symbol = %self.symbol,
                trigger = trigger.as_str(),
                "rebalance wanted but inside cooldown"
            );
            return None;
        }

        Some(trigger)
    }

    /// Cross-interleaved replace: BUY 1, SELL 1, BUY 2, SELL 2. One side is
    /// always resting at every intermediate step, so two-sidedness (and point
    /// accrual) survives the rebalance.
    async fn execute_rebalance(
        &mut self,
        venue: &dyn VenueApi,
        trigger: RebalanceTrigger,
        mark: Decimal,
        now: Instant,
    ) {
        debug!(
            symbol = %self.symbol,
            trigger = trigger.as_str(),
            %mark,
            "rebalancing ladder"
        );

        let mut complete = true;

        for spec in band::build_ladder(&self.params.offsets_bps) {
            let price = band::round_outward(
                band::quote_price(mark, spec.side, spec.offset_bps),
                spec.side,
                self.symbol_info.price_tick_decimals,
            );
            let qty = self.qty_for(spec.offset_bps, price);
            if qty <= Decimal::ZERO || price <= Decimal::ZERO {
                continue;
            }

            if let Some(existing) = self.orders.at(spec.side, spec.slot) {
                if existing.price == price {
                    continue;
                }

                let client_id = existing.client_id.clone();
                match self.orders.cancel(venue, &client_id, false, now).await {
                    Ok(CancelOutcome::Done) => {
                        self.stats.record_cancelled(1);
                        self.events.emit(EngineEvent::OrderCancelled {
                            symbol: self.symbol.clone(),
                            client_id,
                            side: spec.side,
                            slot: spec.slot,
                        });
                    }
                    Ok(CancelOutcome::Locked) => {
                        // Dwell window still open; retry this cell next tick.
                        complete = false;
                        continue;
                    }
                    Ok(CancelOutcome::NotFound) => {}
                    Err(err) => {
                        warn!(symbol = %self.symbol, error = %err, "cancel failed during rebalance");
                        complete = false;
                        continue;
                    }
                }
            }

            match self
                .orders
                .place(venue, spec.side, spec.slot, qty, price, now)
                .await
            {
                Ok(client_id) => {
                    self.stats.record_placed();
                    self.events.emit(EngineEvent::OrderPlaced {
                        symbol: self.symbol.clone(),
                        client_id,
                        side: spec.side,
                        slot: spec.slot,
                        price,
                        qty,
                    });
                }
                Err(err) => {
                    warn!(
                        symbol = %self.symbol,
                        side = spec.side.as_str(),
                        slot = spec.slot,
                        error = %err,
                        "place failed during rebalance"
                    );
                    self.stats.record_failed();
                    // A timed-out place may have landed. Never retry an
                    // unknown place without reconciling first.
                    self.last_sync_at = None;
                    complete = false;
                }
            }
        }

        if complete {
            self.last_placed_ladder = Some(mark);
            self.last_rebalance_at = Some(now);
            self.stats.record_rebalance();
            self.events.emit(EngineEvent::Rebalance {
                symbol: self.symbol.clone(),
                reference: mark,
            });
        }
    }

    fn qty_for(&self, offset_bps: Decimal, price: Decimal) -> Decimal {
        let multiplier = band::classify(offset_bps).multiplier();
        if multiplier.is_zero() || price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let raw = self.params.order_size_usd * multiplier / price;
        let rounded = raw.round_dp_with_strategy(
            self.symbol_info.qty_tick_decimals,
            RoundingStrategy::ToZero,
        );

        if rounded < self.symbol_info.min_order_qty {
            self.symbol_info.min_order_qty
        } else {
            rounded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::str::FromStr;
    use std::sync::Mutex;
    use venue_adapter::{
        CancelOrderRequest, CancelOrderResponse, Order, OrderStatus, PlaceOrderResponse, Position,
        Result as VenueResult, VenueError,
    };

    use crate::events;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
    }

    fn symbol_info() -> SymbolInfo {
        SymbolInfo {
            symbol: "BTC-USD".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USD".to_string(),
            min_order_qty: dec("0.0001"),
            max_order_qty: dec("100"),
            price_tick_decimals: 2,
            qty_tick_decimals: 4,
            max_leverage: dec("20"),
            enabled: true,
        }
    }

    fn push(tx: &watch::Sender<Option<SymbolPrice>>, mark: &str, mid: &str, time: i64) {
        tx.send(Some(SymbolPrice {
            symbol: "BTC-USD".to_string(),
            mark_price: dec(mark),
            index_price: dec(mark),
            mid_price: Some(dec(mid)),
            best_bid: None,
            best_ask: None,
            time,
        }))
        .expect("receiver alive");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Place {
            side: Side,
            order_type: OrderType,
            price: Option<Decimal>,
            qty: Decimal,
            reduce_only: bool,
        },
        Cancel {
            client_id: String,
        },
    }

    /// Records operations in call order and keeps a consistent open-orders
    /// listing: placed limit orders appear, cancels remove them. Targeted
    /// lookups can be overridden per client id.
    #[derive(Default)]
    struct RecordingVenue {
        ops: Mutex<Vec<Op>>,
        listing: Mutex<Vec<Order>>,
        lookups: Mutex<HashMap<String, Order>>,
        position: Mutex<Option<Position>>,
    }

    impl RecordingVenue {
        fn ops(&self) -> Vec<Op> {
            self.ops.lock().unwrap().clone()
        }

        fn clear_ops(&self) {
            self.ops.lock().unwrap().clear();
        }

        fn set_lookup(&self, order: Order) {
            self.lookups
                .lock()
                .unwrap()
                .insert(order.client_id.clone(), order);
        }

        fn remove_listing(&self, client_id: &str) {
            self.listing
                .lock()
                .unwrap()
                .retain(|order| order.client_id != client_id);
        }

        fn set_position(&self, notional: &str) {
            *self.position.lock().unwrap() = Some(Position {
                id: 1,
                symbol: "BTC-USD".to_string(),
                qty: dec("0.0001"),
                entry_price: dec("94000"),
                notional_usd: dec(notional),
                liq_price: Decimal::ZERO,
                upnl: Decimal::ZERO,
                updated_at: "0".to_string(),
            });
        }
    }

    #[async_trait]
    impl VenueApi for RecordingVenue {
        async fn place_order(&self, req: PlaceOrderRequest) -> VenueResult<PlaceOrderResponse> {
            let mut ops = self.ops.lock().unwrap();
            ops.push(Op::Place {
                side: req.side,
                order_type: req.order_type,
                price: req.price,
                qty: req.qty,
                reduce_only: req.reduce_only,
            });
            let order_id = ops.len() as i64;
            drop(ops);

            if req.order_type == OrderType::Limit
                && let Some(client_id) = &req.client_id
            {
                self.listing.lock().unwrap().push(Order {
                    id: order_id,
                    client_id: client_id.clone(),
                    symbol: req.symbol.clone(),
                    side: req.side,
                    order_type: req.order_type,
                    time_in_force: req.time_in_force,
                    status: OrderStatus::Open,
                    price: req.price,
                    qty: req.qty,
                    fill_qty: Decimal::ZERO,
                    fill_avg_price: Decimal::ZERO,
                    reduce_only: req.reduce_only,
                    created_at: "0".to_string(),
                    updated_at: "0".to_string(),
                });
            }

            Ok(PlaceOrderResponse {
                code: 0,
                message: "ok".to_string(),
                order_id: Some(order_id),
            })
        }

        async fn cancel_order(&self, req: CancelOrderRequest) -> VenueResult<CancelOrderResponse> {
            let client_id = req.client_id.unwrap_or_default();
            self.ops.lock().unwrap().push(Op::Cancel {
                client_id: client_id.clone(),
            });
            self.remove_listing(&client_id);
            Ok(CancelOrderResponse {
                code: 0,
                message: "ok".to_string(),
            })
        }

        async fn list_open_orders(&self, _symbol: &str) -> VenueResult<Vec<Order>> {
            Ok(self.listing.lock().unwrap().clone())
        }

        async fn get_order(&self, _symbol: &str, client_id: &str) -> VenueResult<Order> {
            if let Some(order) = self.lookups.lock().unwrap().get(client_id) {
                return Ok(order.clone());
            }
            self.listing
                .lock()
                .unwrap()
                .iter()
                .find(|order| order.client_id == client_id)
                .cloned()
                .ok_or(VenueError::NotFound)
        }

        async fn get_position(&self, _symbol: &str) -> VenueResult<Option<Position>> {
            Ok(self.position.lock().unwrap().clone())
        }

        async fn get_price(&self, _symbol: &str) -> VenueResult<SymbolPrice> {
            Err(VenueError::NotFound)
        }
    }

    fn strategy_with(
        params: StrategyParams,
    ) -> (MakerFarmingStrategy, watch::Sender<Option<SymbolPrice>>) {
        let (tx, rx) = watch::channel(None);
        let (events, _events_rx) = events::channel();
        let strategy =
            MakerFarmingStrategy::new("BTC-USD", params, symbol_info(), rx, events);
        (strategy, tx)
    }

    fn strategy() -> (MakerFarmingStrategy, watch::Sender<Option<SymbolPrice>>) {
        strategy_with(StrategyParams::default())
    }

    fn placed_prices(ops: &[Op]) -> Vec<(Side, Decimal)> {
        ops.iter()
            .filter_map(|op| match op {
                Op::Place {
                    side,
                    price: Some(price),
                    order_type: OrderType::Limit,
                    ..
                } => Some((*side, *price)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn first_tick_places_the_full_ladder_at_offset_prices() {
        let (mut strategy, tx) = strategy();
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();

        let prices = placed_prices(&venue.ops());
        assert_eq!(
            prices,
            vec![
                (Side::Buy, dec("93943.60")),
                (Side::Sell, dec("94056.40")),
                (Side::Buy, dec("93924.80")),
                (Side::Sell, dec("94075.20")),
            ]
        );

        // 5 USD at these prices rounds below the venue minimum quantity.
        for op in venue.ops() {
            if let Op::Place { qty, .. } = op {
                assert_eq!(qty, dec("0.0001"));
            }
        }

        let stats = strategy.stats();
        assert_eq!(stats.placed, 4);
        assert_eq!(stats.cancelled, 0);
        assert_eq!(stats.rebalances, 1);
    }

    #[tokio::test]
    async fn small_drift_leaves_the_ladder_alone() {
        let (mut strategy, tx) = strategy();
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();
        venue.clear_ops();

        // 0.21 bps of drift: far below the 15 bps threshold.
        push(&tx, "94002.00", "94002.00", 2);
        strategy.tick(&venue, t0 + Duration::from_secs(2)).await.unwrap();

        assert!(venue.ops().is_empty());
        let stats = strategy.stats();
        assert_eq!(stats.placed, 4);
        assert_eq!(stats.cancelled, 0);
        assert_eq!(stats.rebalances, 1);
    }

    #[tokio::test]
    async fn drift_past_threshold_replaces_cross_interleaved() {
        let (mut strategy, tx) = strategy();
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();
        venue.clear_ops();

        // ~15.96 bps of drift crosses the 15 bps threshold.
        push(&tx, "94150.00", "94150.00", 2);
        strategy.tick(&venue, t0 + Duration::from_secs(5)).await.unwrap();

        let ops = venue.ops();
        let shape: Vec<&'static str> = ops
            .iter()
            .map(|op| match op {
                Op::Place { side: Side::Buy, .. } => "place-buy",
                Op::Place { side: Side::Sell, .. } => "place-sell",
                Op::Cancel { .. } => "cancel",
            })
            .collect();

        // BUY1, SELL1, BUY2, SELL2 - each as cancel then place.
        assert_eq!(
            shape,
            vec![
                "cancel", "place-buy", "cancel", "place-sell", "cancel", "place-buy", "cancel",
                "place-sell",
            ]
        );

        // Four distinct orders were cancelled, one per cell.
        let cancelled_ids: HashSet<&str> = ops
            .iter()
            .filter_map(|op| match op {
                Op::Cancel { client_id } => Some(client_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(cancelled_ids.len(), 4);

        let stats = strategy.stats();
        assert_eq!(stats.placed, 8);
        assert_eq!(stats.cancelled, 4);
        assert_eq!(stats.rebalances, 2);
    }

    #[tokio::test]
    async fn cooldown_defers_a_wanted_rebalance() {
        let (mut strategy, tx) = strategy();
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();
        venue.clear_ops();

        // Large drift only two seconds after the last rebalance.
        push(&tx, "94150.00", "94150.00", 2);
        strategy.tick(&venue, t0 + Duration::from_secs(2)).await.unwrap();

        assert!(venue.ops().is_empty());
        assert_eq!(strategy.stats().rebalances, 1);
    }

    #[tokio::test]
    async fn divergence_pause_defers_rebalances_but_keeps_orders() {
        let (mut strategy, tx) = strategy();
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();
        venue.clear_ops();

        // Drift wants a rebalance, but mark/mid divergence (~5.3 bps) pauses.
        push(&tx, "94150.00", "94200.00", 2);
        strategy.tick(&venue, t0 + Duration::from_secs(5)).await.unwrap();

        assert!(venue.ops().is_empty());
        assert_eq!(strategy.orders.snapshot().len(), 4);

        // Divergence gone and the 5 s latch expired: normal operation resumes.
        push(&tx, "94150.00", "94150.00", 3);
        strategy
            .tick(&venue, t0 + Duration::from_secs(11))
            .await
            .unwrap();

        let stats = strategy.stats();
        assert_eq!(stats.cancelled, 4);
        assert_eq!(stats.placed, 8);
        assert_eq!(stats.rebalances, 2);
    }

    #[tokio::test]
    async fn fill_flattens_with_a_reducing_market_order_in_the_same_tick() {
        let (mut strategy, tx) = strategy();
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();

        let filled = strategy
            .orders
            .at(Side::Buy, 1)
            .expect("buy slot 1 resting")
            .clone();
        venue.remove_listing(&filled.client_id);
        venue.set_lookup(Order {
            id: 900,
            client_id: filled.client_id.clone(),
            symbol: "BTC-USD".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::PostOnly,
            status: OrderStatus::Filled,
            price: Some(filled.price),
            qty: filled.qty,
            fill_qty: filled.qty,
            fill_avg_price: filled.price,
            reduce_only: false,
            created_at: "0".to_string(),
            updated_at: "0".to_string(),
        });
        venue.clear_ops();

        // Sync is due and the order is past grace; the fill comes back and the
        // flatten must go out within this same tick.
        push(&tx, "94000.00", "94000.00", 2);
        strategy.tick(&venue, t0 + Duration::from_secs(4)).await.unwrap();

        let ops = venue.ops();
        let flatten = ops
            .iter()
            .find(|op| matches!(op, Op::Place { order_type: OrderType::Market, .. }))
            .expect("market flatten order");

        match flatten {
            Op::Place {
                side,
                qty,
                reduce_only,
                price,
                ..
            } => {
                assert_eq!(*side, Side::Sell);
                assert_eq!(*qty, dec("0.0001"));
                assert!(*reduce_only);
                assert!(price.is_none());
            }
            _ => unreachable!(),
        }

        let stats = strategy.stats();
        assert_eq!(stats.fills, 1);
        assert_eq!(stats.liquidations, 1);

        // The emptied cell was repaired by the rebalance that followed.
        assert!(strategy.orders.at(Side::Buy, 1).is_some());
        assert_eq!(stats.rebalances, 2);
    }

    #[tokio::test]
    async fn volatility_spike_force_cancels_everything() {
        let params = StrategyParams {
            // Long lock so the test proves KILL_ALL bypasses it.
            order_timing: OrderTiming {
                lock: Duration::from_secs(5),
                ..OrderTiming::default()
            },
            ..StrategyParams::default()
        };
        let (mut strategy, tx) = strategy_with(params);
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();
        venue.clear_ops();

        // ~31.9 bps in one second crosses the 30 bps hard-kill line.
        push(&tx, "94300.00", "94300.00", 2);
        strategy.tick(&venue, t0 + Duration::from_secs(1)).await.unwrap();

        let ops = venue.ops();
        assert_eq!(ops.len(), 4);
        assert!(ops.iter().all(|op| matches!(op, Op::Cancel { .. })));

        let stats = strategy.stats();
        assert_eq!(stats.cancelled, 4);
        assert!(strategy.orders.snapshot().is_empty());
        assert!(!strategy.stopped());

        // No reference ladder anymore; the next calm tick rebuilds from scratch.
        venue.clear_ops();
        push(&tx, "94300.00", "94300.00", 3);
        strategy.tick(&venue, t0 + Duration::from_secs(4)).await.unwrap();
        assert_eq!(placed_prices(&venue.ops()).len(), 4);
    }

    #[tokio::test]
    async fn stale_data_kills_and_latches_the_emergency_stop() {
        let (mut strategy, tx) = strategy();
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();
        venue.clear_ops();

        // No push for longer than the 30 s stale threshold: fatal.
        strategy
            .tick(&venue, t0 + Duration::from_secs(31))
            .await
            .unwrap();

        assert!(strategy.stopped());
        assert_eq!(strategy.stats().cancelled, 4);
        assert!(strategy.orders.snapshot().is_empty());

        // Latched: a fresh price does not revive the symbol.
        venue.clear_ops();
        push(&tx, "94000.00", "94000.00", 2);
        strategy
            .tick(&venue, t0 + Duration::from_secs(32))
            .await
            .unwrap();
        assert!(venue.ops().is_empty());
    }

    #[tokio::test]
    async fn position_breach_latches_the_emergency_stop() {
        let (mut strategy, tx) = strategy();
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();

        // The sync cadence caches the position notional...
        venue.set_position("50");
        push(&tx, "94000.00", "94000.00", 2);
        strategy.tick(&venue, t0 + Duration::from_secs(2)).await.unwrap();

        // ...and the next gate evaluation kills and latches.
        push(&tx, "94000.00", "94000.00", 3);
        strategy.tick(&venue, t0 + Duration::from_secs(3)).await.unwrap();

        assert!(strategy.stopped());
        assert!(strategy.orders.snapshot().is_empty());

        // Latched: further ticks are no-ops.
        venue.clear_ops();
        push(&tx, "94000.00", "94000.00", 4);
        strategy.tick(&venue, t0 + Duration::from_secs(4)).await.unwrap();
        assert!(venue.ops().is_empty());
    }

    #[tokio::test]
    async fn locked_cells_are_skipped_and_retried_next_tick() {
        let params = StrategyParams {
            order_timing: OrderTiming {
                lock: Duration::from_secs(10),
                ..OrderTiming::default()
            },
            // No cooldown so the retry happens on the very next tick.
            rebalance_cooldown: Duration::from_secs(0),
            ..StrategyParams::default()
        };
        let (mut strategy, tx) = strategy_with(params);
        let venue = RecordingVenue::default();
        let t0 = Instant::now();

        push(&tx, "94000.00", "94000.00", 1);
        strategy.tick(&venue, t0).await.unwrap();
        venue.clear_ops();

        // Drift wants a replace, but every order is still inside its lock:
        // no cancels, no new places, and the rebalance stays pending.
        push(&tx, "94150.00", "94150.00", 2);
        strategy.tick(&venue, t0 + Duration::from_secs(1)).await.unwrap();
        assert!(venue.ops().is_empty());
        assert_eq!(strategy.stats().rebalances, 1);

        // Locks expired: the retry completes the replace.
        push(&tx, "94150.00", "94150.00", 3);
        strategy
            .tick(&venue, t0 + Duration::from_secs(11))
            .await
            .unwrap();
        assert_eq!(strategy.stats().rebalances, 2);
        assert_eq!(strategy.stats().cancelled, 4);
    }
}
