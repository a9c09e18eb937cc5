/*
[INPUT]:  Strategy and order-manager outcomes
[OUTPUT]: Typed engine events for a front-end to consume
[POS]:    Boundary layer - outbound event channel
[UPDATE]: When the downstream event surface changes
*/

use rust_decimal::Decimal;
use tokio::sync::mpsc;

use venue_adapter::Side;

/// Events emitted by the quoting engine on its outbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    OrderPlaced {
        symbol: String,
        client_id: String,
        side: Side,
        slot: u8,
        price: Decimal,
        qty: Decimal,
    },
    OrderCancelled {
        symbol: String,
        client_id: String,
        side: Side,
        slot: u8,
    },
    OrderFilled {
        symbol: String,
        client_id: String,
        side: Side,
        slot: u8,
        qty: Decimal,
        price: Decimal,
    },
    Rebalance {
        symbol: String,
        reference: Decimal,
    },
    SafetyTriggered {
        symbol: String,
        reason: String,
    },
    EmergencyStop {
        symbol: String,
        reason: String,
    },
}

/// Cloneable sender half; a closed receiver never fails the engine.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSender {
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
