/*
[INPUT]:  FarmConfig + VenueClient (per symbol), price feed, CancellationToken
[OUTPUT]: Supervised per-symbol tasks (startup -> run -> shutdown) with cleanup
[POS]:    Execution layer - per-symbol trading orchestration
[UPDATE]: When changing startup/shutdown guarantees or supervision semantics
*/

use anyhow::{anyhow, Context as _, Result};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use venue_adapter::{
    CancelOrderRequest, ClientConfig, Credentials, OrderType, PlaceOrderRequest, RequestKey,
    SessionManager, Side, SymbolInfo, SymbolPrice, TimeInForce, VenueClient,
};

use crate::config::FarmConfig;
use crate::events::{self, EngineEvent, EventSender};
use crate::feed::PriceFeed;
use crate::stats::FarmStatsSnapshot;
use crate::strategy::{MakerFarmingStrategy, StrategyParams};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_EXPIRES_SECONDS: u64 = 7 * 24 * 3600;

static PANIC_HOOK_ONCE: Once = Once::new();

fn ensure_panic_hook_installed() {
    PANIC_HOOK_ONCE.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!("panic in task: {info}");
            previous(info);
        }));
    });
}

/// Final accounting a task hands back when it stops.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub symbol: String,
    pub stats: FarmStatsSnapshot,
}

/// Coordinates one task per configured symbol plus the shared price feed.
#[derive(Debug)]
pub struct TaskManager {
    tasks: Vec<JoinHandle<Result<TaskReport>>>,
    feed: Arc<Mutex<PriceFeed>>,
    shutdown: CancellationToken,
    events: EventSender,
    events_rx: Option<mpsc::UnboundedReceiver<EngineEvent>>,
}

impl TaskManager {
    pub fn new(ws_url: &str) -> Self {
        let (events, events_rx) = events::channel();
        Self {
            tasks: Vec::new(),
            feed: Arc::new(Mutex::new(PriceFeed::new(ws_url))),
            shutdown: CancellationToken::new(),
            events,
            events_rx: Some(events_rx),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn one task per configured symbol.
    pub async fn spawn_from_config(&mut self, config: &FarmConfig) -> Result<()> {
        ensure_panic_hook_installed();

        if let Some(events_rx) = self.events_rx.take() {
            tokio::spawn(log_events(events_rx));
        }

        for symbol in &config.symbols {
            let price_rx = {
                let mut feed = self.feed.lock().await;
                feed.subscribe_price(symbol)
            };

            let task = Task::from_config(
                config,
                symbol,
                price_rx,
                self.events.clone(),
                self.shutdown.child_token(),
            )
            .with_context(|| format!("build task for {symbol}"))?;

            self.tasks.push(task.spawn());
        }

        Ok(())
    }

    /// Request graceful shutdown and wait for all tasks, bounded at 30 s.
    /// Returns the per-symbol final accounting.
    pub async fn shutdown_and_wait(&mut self) -> Result<Vec<TaskReport>> {
        self.shutdown.cancel();
        let result = self.join_all_with_deadline(SHUTDOWN_TIMEOUT).await;
        self.feed.lock().await.shutdown();
        result
    }

    async fn join_all_with_deadline(&mut self, timeout: Duration) -> Result<Vec<TaskReport>> {
        let deadline = Instant::now() + timeout;
        let mut handles = std::mem::take(&mut self.tasks);
        let mut reports = Vec::new();

        while let Some(mut handle) = handles.pop() {
            tokio::select! {
                res = &mut handle => {
                    match res {
                        Ok(Ok(report)) => reports.push(report),
                        Ok(Err(err)) => {
                            self.shutdown.cancel();
                            abort_all(handles);
                            return Err(err).context("task returned error");
                        }
                        Err(join_err) => {
                            self.shutdown.cancel();
                            abort_all(handles);
                            if join_err.is_panic() {
                                return Err(anyhow!("task panicked: {join_err}"));
                            }
                            return Err(anyhow!("task join error: {join_err}"));
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    handle.abort();
                    abort_all(handles);
                    return Err(anyhow!("shutdown timed out after {timeout:?}"));
                }
            }
        }

        Ok(reports)
    }
}

async fn log_events(mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = rx.recv().await {
        info!(?event, "engine event");
    }
}

fn abort_all(handles: Vec<JoinHandle<Result<TaskReport>>>) {
    for handle in handles {
        handle.abort();
    }
}

/// One symbol's trading task.
#[derive(Debug)]
pub struct Task {
    symbol: String,
    client: VenueClient,
    key: RequestKey,
    session: SessionManager,
    has_static_token: bool,
    params: StrategyParams,
    price_rx: watch::Receiver<Option<SymbolPrice>>,
    events: EventSender,
    shutdown: CancellationToken,
}

impl Task {
    pub fn from_config(
        config: &FarmConfig,
        symbol: &str,
        price_rx: watch::Receiver<Option<SymbolPrice>>,
        events: EventSender,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let key = RequestKey::from_base64(&config.credentials.signing_key)
            .map_err(|err| anyhow!("decode signing_key failed: {err}"))?;

        let mut client = VenueClient::with_config_and_base_urls(
            ClientConfig::default(),
            &config.endpoints.auth_url,
            &config.endpoints.trading_url,
        )
        .map_err(|err| anyhow!("create VenueClient failed: {err}"))?;

        let jwt = config.credentials.jwt_token.trim();
        let has_static_token = !jwt.is_empty();
        let session = if has_static_token {
            client.set_credentials_and_key(
                Credentials {
                    jwt_token: jwt.to_string(),
                },
                key.clone(),
            );
            SessionManager::with_static_token(
                key.clone(),
                config.credentials.wallet_address.clone(),
                jwt.to_string(),
            )
        } else {
            SessionManager::new(key.clone(), config.credentials.wallet_address.clone())
        };

        Ok(Self {
            symbol: symbol.to_string(),
            client,
            key,
            session,
            has_static_token,
            params: config.strategy_params(),
            price_rx,
            events,
            shutdown,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<TaskReport>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) -> Result<TaskReport> {
        info!(symbol = %self.symbol, "task starting");

        let symbol_info = self
            .startup_sequence()
            .await
            .context("startup sequence failed")?;

        info!(symbol = %self.symbol, "task running");

        let mut strategy = MakerFarmingStrategy::new(
            self.symbol.clone(),
            self.params.clone(),
            symbol_info,
            self.price_rx.clone(),
            self.events.clone(),
        );

        let run_result = strategy.run(&self.client, self.shutdown.clone()).await;
        let stats = strategy.stats();

        info!(symbol = %self.symbol, ?stats, "task stopping");

        let shutdown_result = self.shutdown_sequence().await;
        run_result?;
        shutdown_result?;

        Ok(TaskReport {
            symbol: self.symbol,
            stats,
        })
    }

    /// Startup: session -> symbol constants -> sweep leftover orders.
    async fn startup_sequence(&mut self) -> Result<SymbolInfo> {
        if !self.has_static_token {
            let token = self
                .session
                .ensure_session(&self.client, SESSION_EXPIRES_SECONDS)
                .await
                .map_err(|err| anyhow!("session handshake failed: {err}"))?;
            self.client
                .set_credentials_and_key(Credentials { jwt_token: token }, self.key.clone());
        }

        let symbol_info = self
            .client
            .query_symbol_info(&self.symbol)
            .await
            .map_err(|err| anyhow!("query_symbol_info failed: {err}"))?;

        // A prior instance may have left orders resting.
        self.cancel_open_orders().await?;

        Ok(symbol_info)
    }

    /// Shutdown: sweep orders, then flatten any position. Best effort.
    async fn shutdown_sequence(&self) -> Result<()> {
        self.cancel_open_orders().await?;
        self.flatten_position().await?;
        Ok(())
    }

    async fn cancel_open_orders(&self) -> Result<()> {
        let orders = self
            .client
            .list_open_orders(&self.symbol)
            .await
            .map_err(|err| anyhow!("list_open_orders failed: {err}"))?;

        let mut first_error: Option<anyhow::Error> = None;

        for order in orders {
            let req = CancelOrderRequest {
                symbol: self.symbol.clone(),
                order_id: Some(order.id),
                client_id: None,
            };

            if let Err(err) = self.client.cancel_order(req).await {
                warn!(
                    symbol = %self.symbol,
                    order_id = order.id,
                    "cancel_order failed: {err}"
                );
                if first_error.is_none() {
                    first_error = Some(anyhow!(err));
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err).context("one or more cancels failed");
        }

        Ok(())
    }

    async fn flatten_position(&self) -> Result<()> {
        let position = self
            .client
            .get_position(&self.symbol)
            .await
            .map_err(|err| anyhow!("get_position failed: {err}"))?;

        let Some(position) = position else {
            return Ok(());
        };

        let Some(side) = position.side() else {
            return Ok(());
        };

        let req = PlaceOrderRequest {
            symbol: self.symbol.clone(),
            side: side.opposite(),
            order_type: OrderType::Market,
            qty: position.qty.abs(),
            time_in_force: TimeInForce::Ioc,
            reduce_only: true,
            price: None,
            client_id: None,
        };

        self.client
            .place_order(req)
            .await
            .map_err(|err| anyhow!("flatten on shutdown failed: {err}"))?;

        match side {
            Side::Buy => info!(symbol = %self.symbol, qty = %position.qty, "flattened long on shutdown"),
            Side::Sell => info!(symbol = %self.symbol, qty = %position.qty.abs(), "flattened short on shutdown"),
        }

        Ok(())
    }
}
