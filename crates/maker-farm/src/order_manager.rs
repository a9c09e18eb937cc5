/*
[INPUT]:  Quote intents from the strategy, venue responses, reconcile snapshots
[OUTPUT]: The local order-book shadow, cancel outcomes, fill events
[POS]:    State layer - order lifecycle ownership and venue reconciliation
[UPDATE]: When lifecycle transitions, lock rules, or reconcile semantics change
*/

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use venue_adapter::{
    CancelOrderRequest, Order, OrderStatus, OrderType, PlaceOrderRequest, Result, Side,
    TimeInForce, VenueError,
};

use crate::venue::VenueApi;

/// Local lifecycle of a managed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Created locally, REST place not yet acknowledged.
    Pending,
    /// Accepted over HTTP; the venue may not have indexed it yet.
    Submitted,
    /// Confirmed resting by reconciliation.
    Open,
    Filled,
    Cancelled,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Failed
        )
    }

    /// States in which the order is (believed to be) on the book.
    pub fn is_resting(self) -> bool {
        matches!(self, OrderState::Submitted | OrderState::Open)
    }
}

/// One logical order, owned exclusively by the [`OrderManager`].
#[derive(Debug, Clone)]
pub struct ManagedOrder {
    pub client_id: String,
    pub exchange_id: Option<i64>,
    pub symbol: String,
    pub side: Side,
    pub slot: u8,
    pub qty: Decimal,
    pub price: Decimal,
    pub state: OrderState,
    pub created_at: Instant,
    /// Voluntary cancels are refused before this; only KILL_ALL overrides.
    pub lock_until: Instant,
    pub last_seen_on_exchange_at: Option<Instant>,
}

impl ManagedOrder {
    pub fn is_locked(&self, now: Instant) -> bool {
        now < self.lock_until
    }
}

/// Outcome of a cancel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Done,
    Locked,
    NotFound,
}

/// A fill observed by reconciliation, delivered to the strategy over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillEvent {
    pub symbol: String,
    pub client_id: String,
    pub side: Side,
    pub slot: u8,
    pub qty: Decimal,
    pub price: Decimal,
}

/// Timing knobs for the order lifecycle.
#[derive(Debug, Clone)]
pub struct OrderTiming {
    pub lock: Duration,
    /// Reconciliation refuses to conclude anything about orders younger than
    /// this; the venue's list endpoint lags placements by seconds.
    pub grace: Duration,
    /// A 404 older than this means the order truly does not exist.
    pub not_found_timeout: Duration,
}

impl Default for OrderTiming {
    fn default() -> Self {
        Self {
            lock: Duration::from_millis(700),
            grace: Duration::from_secs(3),
            not_found_timeout: Duration::from_secs(10),
        }
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub confirmed_open: usize,
    pub fills: usize,
    pub expired_not_found: usize,
}

/// Owns the local shadow of this symbol's orders and reconciles it with the
/// venue's eventually-consistent view.
#[derive(Debug)]
pub struct OrderManager {
    symbol: String,
    timing: OrderTiming,
    orders: HashMap<String, ManagedOrder>,
    slots: HashMap<(Side, u8), String>,
    fills_tx: mpsc::UnboundedSender<FillEvent>,
}

impl OrderManager {
    pub fn new(
        symbol: impl Into<String>,
        timing: OrderTiming,
    ) -> (Self, mpsc::UnboundedReceiver<FillEvent>) {
        let (fills_tx, fills_rx) = mpsc::unbounded_channel();
        (
            Self {
                symbol: symbol.into(),
                timing,
                orders: HashMap::new(),
                slots: HashMap::new(),
                fills_tx,
            },
            fills_rx,
        )
    }

    pub fn order(&self, client_id: &str) -> Option<&ManagedOrder> {
        self.orders.get(client_id)
    }

    /// The active (non-terminal) order in a ladder cell, if any.
    pub fn at(&self, side: Side, slot: u8) -> Option<&ManagedOrder> {
        let client_id = self.slots.get(&(side, slot))?;
        self.orders
            .get(client_id)
            .filter(|order| !order.state.is_terminal())
    }

    /// Active orders keyed by `(side, slot)`.
    pub fn snapshot(&self) -> HashMap<(Side, u8), &ManagedOrder> {
        self.slots
            .iter()
            .filter_map(|(cell, client_id)| {
                self.orders
                    .get(client_id)
                    .filter(|order| !order.state.is_terminal())
                    .map(|order| (*cell, order))
            })
            .collect()
    }

    pub fn resting_orders(&self) -> impl Iterator<Item = &ManagedOrder> {
        self.orders.values().filter(|o| o.state.is_resting())
    }

    /// Place a new quote in a ladder cell.
    pub async fn place(
        &mut self,
        venue: &dyn VenueApi,
        side: Side,
        slot: u8,
        qty: Decimal,
        price: Decimal,
        now: Instant,
    ) -> Result<String> {
        if let Some(existing) = self.at(side, slot) {
            warn!(
                symbol = %self.symbol,
                side = side.as_str(),
                slot,
                existing = %existing.client_id,
                "placing into an occupied cell; previous order stays tracked by client_id"
            );
        }

        let client_id = format!(
            "mf:{}:{}:{}:{}",
            self.symbol,
            side.as_str(),
            slot,
            Uuid::new_v4()
        );

        self.orders.insert(
            client_id.clone(),
            ManagedOrder {
                client_id: client_id.clone(),
                exchange_id: None,
                symbol: self.symbol.clone(),
                side,
                slot,
                qty,
                price,
                state: OrderState::Pending,
                created_at: now,
                lock_until: now + self.timing.lock,
                last_seen_on_exchange_at: None,
            },
        );
        self.slots.insert((side, slot), client_id.clone());

        let req = PlaceOrderRequest {
            symbol: self.symbol.clone(),
            side,
            order_type: OrderType::Limit,
            qty,
            time_in_force: TimeInForce::PostOnly,
            reduce_only: false,
            price: Some(price),
            client_id: Some(client_id.clone()),
        };

        match venue.place_order(req).await {
            Ok(resp) => {
                let order = self
                    .orders
                    .get_mut(&client_id)
                    .expect("order registered above");
                order.state = OrderState::Submitted;
                order.exchange_id = resp.order_id;

                debug!(
                    symbol = %self.symbol,
                    side = side.as_str(),
                    slot,
                    %price,
                    %qty,
                    "placed post-only quote"
                );
                Ok(client_id)
            }
            Err(err) => {
                // A timed-out place may still have landed; reconciliation will
                // see it as unowned and the 404 rule keeps us from churning.
                self.transition(&client_id, OrderState::Failed);
                Err(err)
            }
        }
    }

    /// Cancel a managed order. Locked orders are refused unless `force`.
    pub async fn cancel(
        &mut self,
        venue: &dyn VenueApi,
        client_id: &str,
        force: bool,
        now: Instant,
    ) -> Result<CancelOutcome> {
        let Some(order) = self.orders.get(client_id) else {
            return Ok(CancelOutcome::NotFound);
        };
        if order.state.is_terminal() {
            return Ok(CancelOutcome::NotFound);
        }
        if !force && order.is_locked(now) {
            return Ok(CancelOutcome::Locked);
        }

        let req = CancelOrderRequest {
            symbol: self.symbol.clone(),
            order_id: None,
            client_id: Some(client_id.to_string()),
        };

        match venue.cancel_order(req).await {
            Ok(_) => {
                self.transition(client_id, OrderState::Cancelled);
                debug!(symbol = %self.symbol, client_id, "cancel confirmed");
                Ok(CancelOutcome::Done)
            }
            Err(VenueError::NotFound) | Err(VenueError::Rejected { .. }) => {
                // The venue no longer recognizes the order. Look it up before
                // concluding; a fill must never be mistaken for a cancel.
                self.resolve_after_cancel_bounce(venue, client_id, now).await
            }
            // Timeouts and transport errors leave the record untouched; the
            // caller retries next tick and reconciliation settles the rest.
            Err(err) => Err(err),
        }
    }

    async fn resolve_after_cancel_bounce(
        &mut self,
        venue: &dyn VenueApi,
        client_id: &str,
        now: Instant,
    ) -> Result<CancelOutcome> {
        match venue.get_order(&self.symbol, client_id).await {
            Ok(order) if order.status == OrderStatus::Filled => {
                self.record_fill(client_id, &order, now);
                Ok(CancelOutcome::Done)
            }
            Ok(order) if order.status.is_resting() => {
                warn!(
                    symbol = %self.symbol,
                    client_id,
                    "cancel bounced but the order still rests; retrying next tick"
                );
                Err(VenueError::InvalidResponse(
                    "cancel bounced on a resting order".to_string(),
                ))
            }
            Ok(_) | Err(VenueError::NotFound) => {
                // Repeated cancels are success.
                self.transition(client_id, OrderState::Cancelled);
                Ok(CancelOutcome::Done)
            }
            Err(err) => Err(err),
        }
    }

    /// Force-cancel every non-terminal order, ignoring locks. Used by KILL_ALL
    /// and shutdown. Returns the number of orders that reached a terminal state.
    pub async fn cancel_all(&mut self, venue: &dyn VenueApi, now: Instant) -> usize {
        let client_ids: Vec<String> = self
            .orders
            .values()
            .filter(|order| !order.state.is_terminal())
            .map(|order| order.client_id.clone())
            .collect();

        let mut cancelled = 0;
        for client_id in client_ids {
            match self.cancel(venue, &client_id, true, now).await {
                Ok(CancelOutcome::Done) => cancelled += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(symbol = %self.symbol, client_id = %client_id, error = %err, "force cancel failed");
                }
            }
        }
        cancelled
    }

    /// Reconcile the local shadow against the venue.
    ///
    /// Orders younger than the grace period are skipped outright: the venue's
    /// list endpoint lags placements, and treating that gap as "cancelled"
    /// produces a replace loop that never converges.
    pub async fn sync(&mut self, venue: &dyn VenueApi, now: Instant) -> Result<SyncReport> {
        let listed = venue.list_open_orders(&self.symbol).await?;

        let mut listed_client_ids: HashSet<String> = HashSet::with_capacity(listed.len());
        let mut listed_exchange_ids: HashSet<i64> = HashSet::with_capacity(listed.len());
        let mut exchange_ids_by_client: HashMap<String, i64> = HashMap::new();
        for order in &listed {
            listed_client_ids.insert(order.client_id.clone());
            listed_exchange_ids.insert(order.id);
            exchange_ids_by_client.insert(order.client_id.clone(), order.id);
        }

        let mut report = SyncReport::default();

        let tracked: Vec<String> = self
            .orders
            .values()
            .filter(|order| order.state.is_resting())
            .map(|order| order.client_id.clone())
            .collect();

        for client_id in tracked {
            let (age, exchange_id) = {
                let order = &self.orders[&client_id];
                (now.saturating_duration_since(order.created_at), order.exchange_id)
            };

            if age < self.timing.grace {
                continue;
            }

            let present = listed_client_ids.contains(&client_id)
                || exchange_id.is_some_and(|id| listed_exchange_ids.contains(&id));

            if present {
                let order = self.orders.get_mut(&client_id).expect("tracked above");
                order.state = OrderState::Open;
                order.last_seen_on_exchange_at = Some(now);
                if order.exchange_id.is_none() {
                    order.exchange_id = exchange_ids_by_client.get(&client_id).copied();
                }
                report.confirmed_open += 1;
                continue;
            }

            match venue.get_order(&self.symbol, &client_id).await {
                Ok(order) if order.status == OrderStatus::Filled => {
                    self.record_fill(&client_id, &order, now);
                    report.fills += 1;
                }
                Ok(order) if order.status == OrderStatus::Cancelled => {
                    self.transition(&client_id, OrderState::Cancelled);
                }
                Ok(order) if order.status == OrderStatus::Rejected => {
                    self.transition(&client_id, OrderState::Failed);
                }
                Ok(order) => {
                    // Resting per the targeted query, just missing from the
                    // list snapshot; trust the targeted answer.
                    let tracked = self.orders.get_mut(&client_id).expect("tracked above");
                    tracked.state = OrderState::Open;
                    tracked.last_seen_on_exchange_at = Some(now);
                    if tracked.exchange_id.is_none() {
                        tracked.exchange_id = Some(order.id);
                    }
                    report.confirmed_open += 1;
                }
                Err(VenueError::NotFound) => {
                    if age > self.timing.not_found_timeout {
                        self.transition(&client_id, OrderState::Cancelled);
                        report.expired_not_found += 1;
                    }
                    // Within the timeout: propagation delay assumed, no change.
                }
                Err(err) => {
                    warn!(symbol = %self.symbol, client_id = %client_id, error = %err, "order lookup failed during sync");
                }
            }
        }

        for order in &listed {
            if !self.orders.contains_key(&order.client_id) {
                // A prior instance may have left these; never adopt them.
                info!(
                    symbol = %self.symbol,
                    client_id = %order.client_id,
                    exchange_id = order.id,
                    "ignoring unowned exchange order"
                );
            }
        }

        Ok(report)
    }

    /// Drop terminal records. Called once per tick by the strategy.
    pub fn sweep_terminal(&mut self) {
        self.orders.retain(|_, order| !order.state.is_terminal());
        let orders = &self.orders;
        self.slots.retain(|_, client_id| orders.contains_key(client_id));
    }

    fn record_fill(&mut self, client_id: &str, venue_order: &Order, _now: Instant) {
        let Some(order) = self.orders.get_mut(client_id) else {
            return;
        };
        order.state = OrderState::Filled;

        let qty = if venue_order.fill_qty > Decimal::ZERO {
            venue_order.fill_qty
        } else {
            order.qty
        };
        let price = if venue_order.fill_avg_price > Decimal::ZERO {
            venue_order.fill_avg_price
        } else {
            order.price
        };

        let event = FillEvent {
            symbol: self.symbol.clone(),
            client_id: client_id.to_string(),
            side: order.side,
            slot: order.slot,
            qty,
            price,
        };

        self.clear_slot(client_id);
        let _ = self.fills_tx.send(event);
    }

    fn transition(&mut self, client_id: &str, state: OrderState) {
        if let Some(order) = self.orders.get_mut(client_id) {
            order.state = state;
            if state.is_terminal() {
                self.clear_slot(client_id);
            }
        }
    }

    fn clear_slot(&mut self, client_id: &str) {
        if let Some(order) = self.orders.get(client_id) {
            let cell = (order.side, order.slot);
            if self.slots.get(&cell).is_some_and(|id| id == client_id) {
                self.slots.remove(&cell);
            }
        }
    }
}
