//! Proportional deposit into an existing resource
//!
//! Deposits must keep the pool ratio `reserve_a : reserve_b`. The largest
//! deposit that respects both maxima is whichever side binds first.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub amount_a: u64,
    pub amount_b: u64,
}

/// Largest deposit with ratio `reserve_a : reserve_b` not exceeding either maximum.
///
/// Returns `None` when either reserve is empty (no ratio to follow) or the
/// result rounds down to zero on either side.
pub fn proportional_deposit(
    max_a: u64,
    max_b: u64,
    reserve_a: u64,
    reserve_b: u64,
) -> Option<Deposit> {
    if reserve_a == 0 || reserve_b == 0 {
        return None;
    }

    let (max_a, max_b) = (max_a as u128, max_b as u128);
    let (ra, rb) = (reserve_a as u128, reserve_b as u128);

    // A needed to pair with all of max_b
    let a_for_max_b = max_b * ra / rb;
    let (amount_a, amount_b) = if a_for_max_b <= max_a {
        (a_for_max_b, max_b)
    } else {
        (max_a, max_a * rb / ra)
    };

    if amount_a == 0 || amount_b == 0 {
        return None;
    }
    // Both are bounded by the u64 maxima above
    Some(Deposit {
        amount_a: amount_a as u64,
        amount_b: amount_b as u64,
    })
}
