/*
[INPUT]:  Venue market WebSocket stream + per-symbol subscriptions
[OUTPUT]: Latest-per-symbol price updates via `watch` + connection state
[POS]:    Data layer - shared push-stream distribution (no trading logic)
[UPDATE]: When changing subscription channels, backoff, or shutdown semantics
*/

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use venue_adapter::{PriceUpdate, StreamMessage, SymbolPrice, VenueWebSocket};

const DEFAULT_MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
    Connected,
    Disconnected { retry_count: u32 },
    Connecting,
}

#[derive(Debug)]
enum FeedCommand {
    TrackSymbol {
        symbol: String,
        price_tx: watch::Sender<Option<SymbolPrice>>,
    },
    Shutdown,
}

/// Push-stream hub that distributes price updates to all strategy tasks.
///
/// Data-only by design: it connects, subscribes, parses, and broadcasts. The
/// staleness watchdog lives in the safety guard, not here.
#[derive(Debug)]
pub struct PriceFeed {
    ws_url: String,
    price_txs: HashMap<String, watch::Sender<Option<SymbolPrice>>>,
    feed_state: watch::Sender<FeedState>,
    shutdown: CancellationToken,
    cmd_tx: mpsc::UnboundedSender<FeedCommand>,
    cmd_rx: Option<mpsc::UnboundedReceiver<FeedCommand>>,
    worker_handle: Option<tokio::task::JoinHandle<()>>,
    auto_connect: bool,
}

impl PriceFeed {
    /// Create a feed; the worker starts lazily on first subscription.
    pub fn new(ws_url: &str) -> Self {
        Self::new_internal(ws_url, true)
    }

    #[cfg(test)]
    fn new_for_test() -> Self {
        Self::new_internal("ws://unused", false)
    }

    fn new_internal(ws_url: &str, auto_connect: bool) -> Self {
        let (feed_state, _rx) = watch::channel(FeedState::Disconnected { retry_count: 0 });
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        Self {
            ws_url: ws_url.to_string(),
            price_txs: HashMap::new(),
            feed_state,
            shutdown: CancellationToken::new(),
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            worker_handle: None,
            auto_connect,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FeedState> {
        self.feed_state.subscribe()
    }

    /// Subscribe to price updates for a symbol.
    ///
    /// The receiver always holds the latest update, `None` until the first one.
    pub fn subscribe_price(&mut self, symbol: &str) -> watch::Receiver<Option<SymbolPrice>> {
        if self.auto_connect {
            self.start_worker_if_needed();
        }

        if let Some(existing) = self.price_txs.get(symbol) {
            return existing.subscribe();
        }

        let (tx, rx) = watch::channel(None);
        self.price_txs.insert(symbol.to_string(), tx.clone());

        let _ = self.cmd_tx.send(FeedCommand::TrackSymbol {
            symbol: symbol.to_string(),
            price_tx: tx,
        });

        rx
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let _ = self.cmd_tx.send(FeedCommand::Shutdown);
    }

    fn start_worker_if_needed(&mut self) {
        if self.worker_handle.is_some() {
            return;
        }

        let Some(cmd_rx) = self.cmd_rx.take() else {
            return;
        };

        if tokio::runtime::Handle::try_current().is_err() {
            warn!("PriceFeed created without a Tokio runtime; worker not started");
            self.cmd_rx = Some(cmd_rx);
            return;
        }

        let ws_url = self.ws_url.clone();
        let feed_state = self.feed_state.clone();
        let shutdown = self.shutdown.clone();

        self.worker_handle = Some(tokio::spawn(async move {
            let worker = FeedWorker::new(ws_url, cmd_rx, feed_state, shutdown);
            worker.run().await;
        }));
    }
}

impl Drop for PriceFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
struct FeedWorker {
    ws_url: String,
    tracked_symbols: HashSet<String>,
    price_txs: HashMap<String, watch::Sender<Option<SymbolPrice>>>,
    cmd_rx: mpsc::UnboundedReceiver<FeedCommand>,
    feed_state: watch::Sender<FeedState>,
    shutdown: CancellationToken,
    max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamExit {
    Disconnected,
    Shutdown,
}

impl FeedWorker {
    fn new(
        ws_url: String,
        cmd_rx: mpsc::UnboundedReceiver<FeedCommand>,
        feed_state: watch::Sender<FeedState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ws_url,
            tracked_symbols: HashSet::new(),
            price_txs: HashMap::new(),
            cmd_rx,
            feed_state,
            shutdown,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    async fn run(mut self) {
        let mut retry_count: u32 = 0;

        'run: loop {
            if self.shutdown.is_cancelled() {
                let _ = self
                    .feed_state
                    .send(FeedState::Disconnected { retry_count });
                break 'run;
            }

            if self.tracked_symbols.is_empty() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        let _ = self.feed_state.send(FeedState::Disconnected { retry_count });
                        break 'run;
                    }
                    cmd = self.cmd_rx.recv() => {
                        if !self.apply_command(cmd) {
                            let _ = self.feed_state.send(FeedState::Disconnected { retry_count });
                            break 'run;
                        }
                    }
                }

                continue;
            }

            let _ = self.feed_state.send(FeedState::Connecting);

            match self.connect_once().await {
                Ok((ws, mut rx)) => {
                    retry_count = 0;
                    let _ = self.feed_state.send(FeedState::Connected);
                    info!(ws_url = %self.ws_url, "price feed connected");

                    match self.stream_loop(&ws, &mut rx).await {
                        StreamExit::Shutdown => {
                            let _ = self
                                .feed_state
                                .send(FeedState::Disconnected { retry_count });
                            break 'run;
                        }
                        StreamExit::Disconnected => {
                            let _ = self.feed_state.send(FeedState::Connecting);
                            continue 'run;
                        }
                    }
                }
                Err(err_msg) => {
                    retry_count = retry_count.saturating_add(1);
                    let _ = self
                        .feed_state
                        .send(FeedState::Disconnected { retry_count });

                    if retry_count >= self.max_retries {
                        warn!(retry_count, error = %err_msg, "price feed gave up reconnecting");
                        break 'run;
                    }

                    let backoff = backoff_duration(retry_count);
                    warn!(retry_count, ?backoff, error = %err_msg, "price feed connect failed; backing off");

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            let _ = self.feed_state.send(FeedState::Disconnected { retry_count });
                            break 'run;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                        cmd = self.cmd_rx.recv() => {
                            if !self.apply_command(cmd) {
                                let _ = self.feed_state.send(FeedState::Disconnected { retry_count });
                                break 'run;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Returns false when the worker should stop.
    fn apply_command(&mut self, cmd: Option<FeedCommand>) -> bool {
        match cmd {
            Some(FeedCommand::TrackSymbol { symbol, price_tx }) => {
                self.tracked_symbols.insert(symbol.clone());
                self.price_txs.insert(symbol, price_tx);
                true
            }
            Some(FeedCommand::Shutdown) | None => false,
        }
    }

    async fn connect_once(
        &self,
    ) -> Result<(VenueWebSocket, mpsc::Receiver<StreamMessage>), String> {
        let mut ws = VenueWebSocket::with_url(&self.ws_url);

        ws.connect().await.map_err(|err| err.to_string())?;

        for symbol in &self.tracked_symbols {
            ws.subscribe_price(symbol)
                .await
                .map_err(|err| err.to_string())?;
        }

        let rx = ws
            .take_receiver()
            .ok_or_else(|| "VenueWebSocket receiver already taken".to_string())?;

        Ok((ws, rx))
    }

    async fn stream_loop(
        &mut self,
        ws: &VenueWebSocket,
        rx: &mut mpsc::Receiver<StreamMessage>,
    ) -> StreamExit {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("price feed shutdown requested");
                    return StreamExit::Shutdown;
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(FeedCommand::TrackSymbol { symbol, price_tx }) => {
                            self.tracked_symbols.insert(symbol.clone());
                            self.price_txs.insert(symbol.clone(), price_tx);
                            if let Err(err) = ws.subscribe_price(&symbol).await {
                                warn!(%symbol, error = %err, "subscribe failed while connected");
                                return StreamExit::Disconnected;
                            }
                        }
                        Some(FeedCommand::Shutdown) | None => {
                            return StreamExit::Shutdown;
                        }
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            warn!("market stream ended");
                            return StreamExit::Disconnected;
                        }
                    }
                }
            }
        }
    }

    fn handle_message(&self, message: StreamMessage) {
        let StreamMessage::Price { symbol, data } = message else {
            return;
        };

        let update = match serde_json::from_value::<PriceUpdate>(data) {
            Ok(update) => update,
            Err(err) => {
                debug!(%symbol, error = %err, "price payload failed to deserialize");
                return;
            }
        };

        let Some(price) = symbol_price_from_update(update) else {
            debug!(%symbol, "price payload had unparsable decimals");
            return;
        };

        if let Some(tx) = self.price_txs.get(&symbol) {
            let _ = tx.send(Some(price));
        } else {
            debug!(%symbol, "price for untracked symbol");
        }
    }
}

fn backoff_duration(retry_count: u32) -> Duration {
    let exp = retry_count.saturating_sub(1).min(63);
    let secs = 1u64 << exp;
    Duration::from_secs(secs.min(30))
}

fn symbol_price_from_update(update: PriceUpdate) -> Option<SymbolPrice> {
    let parse = |s: &str| {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        Decimal::from_str(s).ok()
    };

    let mark_price = parse(&update.mark_price)?;

    Some(SymbolPrice {
        symbol: update.symbol,
        mark_price,
        index_price: mark_price,
        mid_price: parse(&update.mid_price),
        best_bid: parse(&update.best_bid),
        best_ask: parse(&update.best_ask),
        time: update.time,
    })
}
