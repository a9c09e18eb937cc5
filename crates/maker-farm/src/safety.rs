/*
[INPUT]:  Mark observations, price snapshots, position notional, safety limits
[OUTPUT]: Three-state gate (OK / PAUSE_NEW / KILL_ALL) with latches
[POS]:    Risk layer - the safety state machine in front of all quoting
[UPDATE]: When guard conditions, thresholds, or latch semantics change
*/

use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::price::PriceSnapshot;

const BPS_DENOMINATOR: i64 = 10_000;
const MARK_WINDOW: Duration = Duration::from_secs(1);

/// Thresholds for the three-tier gate.
#[derive(Debug, Clone)]
pub struct SafetyLimits {
    pub max_position_usd: Decimal,
    pub pre_kill_volatility_bps: Decimal,
    pub pre_kill_divergence_bps: Decimal,
    pub pause_duration: Duration,
    pub hard_kill_volatility_bps: Decimal,
    pub stale_threshold: Duration,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_position_usd: Decimal::from(50),
            pre_kill_volatility_bps: Decimal::from(15),
            pre_kill_divergence_bps: Decimal::from(3),
            pause_duration: Duration::from_secs(5),
            hard_kill_volatility_bps: Decimal::from(30),
            stale_threshold: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Stale,
    Volatility,
    PositionLimit,
    Authentication,
}

impl KillReason {
    pub fn as_str(self) -> &'static str {
        match self {
            KillReason::Stale => "stale",
            KillReason::Volatility => "volatility",
            KillReason::PositionLimit => "position",
            KillReason::Authentication => "auth",
        }
    }

    /// Reasons that additionally latch the emergency stop. Only a volatility
    /// kill clears on its own once the market calms; everything else needs an
    /// external reset.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            KillReason::Stale | KillReason::PositionLimit | KillReason::Authentication
        )
    }
}

/// Gate decision for one evaluation instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Ok,
    /// No new placements until `until`; resting orders stay.
    PauseNew { reason: String, until: Instant },
    /// Cancel everything, locks included.
    KillAll { reason: KillReason },
}

/// Evaluates volatility, staleness, divergence, and position exposure.
///
/// A PAUSE latch, once set, holds until its deadline even if the triggering
/// condition clears early. The emergency-stop latch only clears on `reset`.
#[derive(Debug)]
pub struct SafetyGuard {
    limits: SafetyLimits,
    marks: VecDeque<(Instant, Decimal)>,
    pause_until: Option<Instant>,
    pause_reason: Option<String>,
    emergency_stop: bool,
}

impl SafetyGuard {
    pub fn new(limits: SafetyLimits) -> Self {
        Self {
            limits,
            marks: VecDeque::new(),
            pause_until: None,
            pause_reason: None,
            emergency_stop: false,
        }
    }

    /// Feed one mark observation into the rolling window.
    pub fn record_mark(&mut self, now: Instant, mark: Decimal) {
        if mark <= Decimal::ZERO {
            return;
        }
        self.marks.push_back((now, mark));
        self.trim_window(now);
    }

    /// Mark displacement over the window, normalized to bps per second.
    pub fn volatility_bps_per_sec(&self) -> Option<Decimal> {
        let (oldest_at, oldest) = self.marks.front()?;
        let (newest_at, newest) = self.marks.back()?;

        if oldest <= &Decimal::ZERO {
            return None;
        }

        let elapsed = newest_at.saturating_duration_since(*oldest_at);
        let elapsed_ms = elapsed.as_millis().min(i64::MAX as u128) as i64;
        if elapsed_ms == 0 {
            return None;
        }

        let bps = ((newest - oldest).abs() / oldest) * Decimal::from(BPS_DENOMINATOR);
        let elapsed_secs = Decimal::from(elapsed_ms) / Decimal::from(1000);
        Some(bps / elapsed_secs)
    }

    /// Evaluate the decision table.
    pub fn gate(
        &mut self,
        now: Instant,
        snapshot: Option<&PriceSnapshot>,
        position_notional: Option<Decimal>,
    ) -> Gate {
        self.trim_window(now);

        let Some(snapshot) = snapshot else {
            return Gate::KillAll {
                reason: KillReason::Stale,
            };
        };

        if snapshot.is_stale(now, self.limits.stale_threshold) {
            return Gate::KillAll {
                reason: KillReason::Stale,
            };
        }

        let volatility = self.volatility_bps_per_sec();

        if let Some(volatility) = volatility
            && volatility >= self.limits.hard_kill_volatility_bps
        {
            return Gate::KillAll {
                reason: KillReason::Volatility,
            };
        }

        if let Some(notional) = position_notional
            && notional.abs() >= self.limits.max_position_usd
        {
            self.emergency_stop = true;
            return Gate::KillAll {
                reason: KillReason::PositionLimit,
            };
        }

        let mut pause_causes: Vec<String> = Vec::new();

        if let Some(volatility) = volatility
            && volatility >= self.limits.pre_kill_volatility_bps
        {
            pause_causes.push(format!("volatility {volatility:.2} bps/s"));
        }

        if let Some(divergence) = snapshot.mark_mid_divergence_bps()
            && divergence >= self.limits.pre_kill_divergence_bps
        {
            pause_causes.push(format!("mark/mid divergence {divergence:.2} bps"));
        }

        if !pause_causes.is_empty() {
            let candidate = now + self.limits.pause_duration;
            let until = match self.pause_until {
                Some(existing) if existing >= candidate => existing,
                _ => candidate,
            };
            self.pause_until = Some(until);
            self.pause_reason = Some(pause_causes.join(", "));
        }

        if let Some(until) = self.pause_until {
            if now < until {
                return Gate::PauseNew {
                    reason: self
                        .pause_reason
                        .clone()
                        .unwrap_or_else(|| "pre-kill".to_string()),
                    until,
                };
            }
            self.pause_until = None;
            self.pause_reason = None;
        }

        Gate::Ok
    }

    pub fn emergency_stopped(&self) -> bool {
        self.emergency_stop
    }

    /// External reset of all latches.
    pub fn reset(&mut self) {
        self.pause_until = None;
        self.pause_reason = None;
        self.emergency_stop = false;
    }

    fn trim_window(&mut self, now: Instant) {
        while let Some((at, _)) = self.marks.front() {
            if now.saturating_duration_since(*at) > MARK_WINDOW {
                self.marks.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal")
    }

    fn snapshot(mark: &str, mid: &str, received_at: Instant) -> PriceSnapshot {
        PriceSnapshot {
            mark: dec(mark),
            mid: Some(dec(mid)),
            bid: None,
            ask: None,
            venue_time: 0,
            received_at,
        }
    }

    fn guard() -> SafetyGuard {
        SafetyGuard::new(SafetyLimits::default())
    }

    #[test]
    fn missing_snapshot_kills_as_stale() {
        let mut guard = guard();
        let gate = guard.gate(Instant::now(), None, None);
        assert_eq!(
            gate,
            Gate::KillAll {
                reason: KillReason::Stale
            }
        );
    }

    #[test]
    fn stale_snapshot_kills_after_threshold() {
        let mut guard = guard();
        let t0 = Instant::now();
        let snap = snapshot("94000", "94000", t0);

        assert_eq!(guard.gate(t0 + Duration::from_secs(29), Some(&snap), None), Gate::Ok);
        assert_eq!(
            guard.gate(t0 + Duration::from_secs(31), Some(&snap), None),
            Gate::KillAll {
                reason: KillReason::Stale
            }
        );
    }

    #[test]
    fn hard_volatility_kills() {
        let mut guard = guard();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);

        // 300 / 94000 over one second is ~31.9 bps/s, past the 30 hard limit.
        guard.record_mark(t0, dec("94000"));
        guard.record_mark(t1, dec("94300"));

        let snap = snapshot("94300", "94300", t1);
        assert_eq!(
            guard.gate(t1, Some(&snap), None),
            Gate::KillAll {
                reason: KillReason::Volatility
            }
        );
    }

    #[test]
    fn moderate_volatility_pauses_and_latches() {
        let mut guard = guard();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);

        // ~21.3 bps/s: above the 15 pre-kill line, below the 30 hard line.
        guard.record_mark(t0, dec("94000"));
        guard.record_mark(t1, dec("94200"));

        let snap = snapshot("94200", "94200", t1);
        let gate = guard.gate(t1, Some(&snap), None);
        let Gate::PauseNew { until, .. } = gate else {
            panic!("expected pause, got {gate:?}");
        };
        assert_eq!(until, t1 + Duration::from_secs(5));

        // Condition clears; latch still holds until the deadline.
        let calm = snapshot("94200", "94200", t1 + Duration::from_secs(2));
        let gate = guard.gate(t1 + Duration::from_secs(3), Some(&calm), None);
        assert!(matches!(gate, Gate::PauseNew { .. }));

        let gate = guard.gate(t1 + Duration::from_secs(6), Some(&calm), None);
        assert_eq!(gate, Gate::Ok);
    }

    #[test]
    fn divergence_pauses() {
        let mut guard = guard();
        let now = Instant::now();

        // |94000 - 94050| / 94050 is ~5.3 bps, past the 3 bps divergence line.
        let snap = snapshot("94000", "94050", now);
        let gate = guard.gate(now, Some(&snap), None);
        assert!(matches!(gate, Gate::PauseNew { .. }));
    }

    #[test]
    fn simultaneous_causes_coalesce_to_the_max_deadline() {
        let mut guard = guard();
        let t0 = Instant::now();

        let diverged = snapshot("94000", "94050", t0);
        let Gate::PauseNew { until: first, .. } = guard.gate(t0, Some(&diverged), None) else {
            panic!("expected pause");
        };

        // A second cause two seconds later pushes the deadline out.
        let t1 = t0 + Duration::from_secs(2);
        let still_diverged = snapshot("94000", "94050", t1);
        let Gate::PauseNew { until: second, reason } =
            guard.gate(t1, Some(&still_diverged), None)
        else {
            panic!("expected pause");
        };

        assert!(second > first);
        assert!(reason.contains("divergence"));
    }

    #[test]
    fn position_breach_kills_and_latches_emergency_stop() {
        let mut guard = guard();
        let now = Instant::now();
        let snap = snapshot("94000", "94000", now);

        let gate = guard.gate(now, Some(&snap), Some(dec("50")));
        assert_eq!(
            gate,
            Gate::KillAll {
                reason: KillReason::PositionLimit
            }
        );
        assert!(guard.emergency_stopped());

        guard.reset();
        assert!(!guard.emergency_stopped());
    }

    #[test]
    fn quiet_market_is_ok() {
        let mut guard = guard();
        let now = Instant::now();
        guard.record_mark(now, dec("94000"));

        let snap = snapshot("94000", "94000.5", now);
        assert_eq!(guard.gate(now, Some(&snap), Some(dec("4.7"))), Gate::Ok);
    }
}
