/*
[INPUT]:  Runtime strategy outcomes (placements, cancels, rebalances, fills)
[OUTPUT]: Snapshot-friendly per-symbol counters
[POS]:    Shared runtime accounting between strategy loop and display
[UPDATE]: When adding/removing strategy-level counters
*/

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FarmStatsSnapshot {
    pub placed: u64,
    pub cancelled: u64,
    pub rebalances: u64,
    pub fills: u64,
    pub liquidations: u64,
    pub failed: u64,
}

/// Per-symbol counters accumulated by the strategy loop.
#[derive(Debug, Default)]
pub struct FarmStats {
    placed: u64,
    cancelled: u64,
    rebalances: u64,
    fills: u64,
    liquidations: u64,
    failed: u64,
}

impl FarmStats {
    pub fn snapshot(&self) -> FarmStatsSnapshot {
        FarmStatsSnapshot {
            placed: self.placed,
            cancelled: self.cancelled,
            rebalances: self.rebalances,
            fills: self.fills,
            liquidations: self.liquidations,
            failed: self.failed,
        }
    }

    pub fn record_placed(&mut self) {
        self.placed += 1;
    }

    pub fn record_cancelled(&mut self, count: u64) {
        self.cancelled += count;
    }

    pub fn record_rebalance(&mut self) {
        self.rebalances += 1;
    }

    pub fn record_fill(&mut self) {
        self.fills += 1;
    }

    pub fn record_liquidation(&mut self) {
        self.liquidations += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }
}
