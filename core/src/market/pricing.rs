//! Dealer pricing kernel
//!
//! Per-bucket quote computation. The outside liquidity provider maintains a
//! value anchor (midpoint + spread) fed by realized settlement losses; the
//! dealer quotes inside the outside spread, skewed by its inventory
//! utilization and clipped to a guard band so its prices can never cross the
//! outside provider's own bid/ask. The outside provider is always the price
//! floor and ceiling.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn two() -> Decimal {
    Decimal::from(2)
}

/// The outside provider's value anchor for one bucket.
///
/// `mid` is the anchor midpoint (price per unit face, at or below par);
/// `spread` is the full bid/ask width. Realized losses depress the midpoint
/// and widen the spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutsideAnchor {
    mid: Decimal,
    spread: Decimal,
    base_spread: Decimal,
    /// Blend weight of each realized recovery observation.
    blend: Decimal,
}

impl OutsideAnchor {
    pub fn new(mid: Decimal, spread: Decimal, blend: Decimal) -> Self {
        Self {
            mid,
            spread,
            base_spread: spread,
            blend,
        }
    }

    pub fn mid(&self) -> Decimal {
        self.mid
    }

    pub fn spread(&self) -> Decimal {
        self.spread
    }

    /// The outside provider's own (always available) bid.
    pub fn bid(&self) -> Decimal {
        (self.mid - self.spread / two()).max(Decimal::ZERO)
    }

    /// The outside provider's own ask.
    pub fn ask(&self) -> Decimal {
        self.mid + self.spread / two()
    }

    /// Fold one realized recovery fraction (1 = paid in full) into the
    /// anchor. Higher realized losses depress the midpoint and widen the
    /// spread; clean recoveries pull the spread back toward its base width.
    pub fn record_recovery(&mut self, recovery: Decimal) {
        let recovery = recovery.clamp(Decimal::ZERO, Decimal::ONE);
        let loss = Decimal::ONE - recovery;
        let keep = Decimal::ONE - self.blend;

        self.mid = self.mid * keep + recovery * self.blend;
        self.spread = self.spread * keep + (self.base_spread + loss) * self.blend;
    }
}

/// A dealer's current bid/ask for one bucket.
///
/// `bid_pinned` / `ask_pinned` flag quotes clipped to the outside provider's
/// price: a pinned ask means the dealer has no edge to offer on that side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_pinned: bool,
    pub ask_pinned: bool,
}

/// Compute the dealer quote from the outside anchor and the dealer's
/// inventory utilization (inventory face over capacity).
///
/// The quote sits inside the outside spread by `spread_share` of the half
/// spread at zero inventory. Utilization widens both sides by `skew_gain`
/// per unit: a loaded dealer bids lower (reluctant to buy more) and asks
/// higher; the reverse holds for low or negative utilization. Both sides are
/// clipped to the guard band `[outside bid, outside ask]` around the mid.
pub fn dealer_quote(
    anchor: &OutsideAnchor,
    utilization: Decimal,
    spread_share: Decimal,
    skew_gain: Decimal,
) -> Quote {
    let half = anchor.spread() / two();
    let width = spread_share + skew_gain * utilization;

    let raw_bid = anchor.mid() - half * width;
    let raw_ask = anchor.mid() + half * width;

    let bid_pinned = raw_bid <= anchor.bid();
    let ask_pinned = raw_ask >= anchor.ask();

    Quote {
        bid: raw_bid.clamp(anchor.bid(), anchor.mid()),
        ask: raw_ask.clamp(anchor.mid(), anchor.ask()),
        bid_pinned,
        ask_pinned,
    }
}
