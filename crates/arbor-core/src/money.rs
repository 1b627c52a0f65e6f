//! # Money Rounding
//!
//! Monetary aggregates in Arbor travel through payloads as JSON numbers, so
//! the engine needs one canonical rule for taming them: round to the cent
//! boundary, half away from zero.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  WHY ROUND AT THE CENT BOUNDARY                                         │
//! │                                                                         │
//! │  An order total is Σ item.count × item.price. Prices carry two          │
//! │  decimals, counts are integers, but binary floating point does not      │
//! │  keep 0.1 + 0.2 at 0.3. Every aggregate the engine persists is          │
//! │  therefore snapped to cents immediately:                                │
//! │                                                                         │
//! │    round_to_cents(2 × 10.0)  = 20.0                                     │
//! │    round_to_cents(0.125)     = 0.13   (half rounds away from zero)      │
//! │    round_to_cents(-0.125)    = -0.13                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Rounds an amount to two decimal places, half away from zero.
///
/// This is the rule applied to every monetary aggregate the engine persists
/// (`f64::round` rounds halves away from zero, matching it exactly).
#[inline]
pub fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Converts an amount to whole cents, half away from zero.
#[inline]
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

// =============================================================================
// Unit Tests
// =============================================================================
