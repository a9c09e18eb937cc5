/*
[INPUT]:  Reference price, signed bps offsets, symbol tick constants
[OUTPUT]: Quote prices, band classification, ladder specs in replace order
[POS]:    Strategy layer - pure quote geometry, no I/O
[UPDATE]: When band tiers, rounding, or ladder composition change
*/

use rust_decimal::{Decimal, RoundingStrategy};

use venue_adapter::Side;

const BPS_DENOMINATOR: i64 = 10_000;

/// Venue distance tiers. Only band A earns the full point multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    A,
    B,
    C,
    Out,
}

impl Band {
    pub fn multiplier(self) -> Decimal {
        match self {
            Band::A => Decimal::ONE,
            Band::B => Decimal::new(5, 1),
            Band::C => Decimal::new(1, 1),
            Band::Out => Decimal::ZERO,
        }
    }
}

/// Classify a distance in bps into its band (A <= 10 < B <= 30 < C <= 100).
pub fn classify(distance_bps: Decimal) -> Band {
    if distance_bps <= Decimal::from(10) {
        Band::A
    } else if distance_bps <= Decimal::from(30) {
        Band::B
    } else if distance_bps <= Decimal::from(100) {
        Band::C
    } else {
        Band::Out
    }
}

/// Absolute distance between a price and the reference, in bps.
pub fn distance_bps(price: Decimal, reference: Decimal) -> Decimal {
    if reference <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((price - reference).abs() / reference) * Decimal::from(BPS_DENOMINATOR)
}

/// Price `offset_bps` away from the reference, below for BUY and above for SELL.
pub fn quote_price(reference: Decimal, side: Side, offset_bps: Decimal) -> Decimal {
    let ratio = offset_bps / Decimal::from(BPS_DENOMINATOR);
    match side {
        Side::Buy => reference * (Decimal::ONE - ratio),
        Side::Sell => reference * (Decimal::ONE + ratio),
    }
}

/// Round a quote price outward to the symbol tick: BUY down, SELL up.
///
/// Rounding toward the reference would eat into the protective margin, so the
/// quote only ever moves further away.
pub fn round_outward(price: Decimal, side: Side, price_tick_decimals: u32) -> Decimal {
    let strategy = match side {
        Side::Buy => RoundingStrategy::ToNegativeInfinity,
        Side::Sell => RoundingStrategy::ToPositiveInfinity,
    };
    price.round_dp_with_strategy(price_tick_decimals, strategy)
}

/// One cell of the desired ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteSpec {
    pub side: Side,
    pub slot: u8,
    pub offset_bps: Decimal,
}

/// Desired ladder specs in cross-interleaved replace order:
/// BUY slot 1, SELL slot 1, BUY slot 2, SELL slot 2, ...
///
/// Replacing in this order keeps at least one order per side resting at every
/// intermediate step of a rebalance.
pub fn build_ladder(offsets: &[Decimal]) -> Vec<QuoteSpec> {
    let mut specs = Vec::with_capacity(offsets.len() * 2);
    for (index, offset) in offsets.iter().enumerate() {
        let slot = (index + 1) as u8;
        specs.push(QuoteSpec {
            side: Side::Buy,
            slot,
            offset_bps: *offset,
        });
        specs.push(QuoteSpec {
            side: Side::Sell,
            slot,
            offset_bps: *offset,
        });
    }
    specs
}
