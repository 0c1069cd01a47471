//! Weighted-average unit cost, in integer minor units.

/// `(old_avg * old_qty + unit_cost * received_qty) / (old_qty + received_qty)`,
/// rounded half away from zero.
///
/// A part with no recorded cost, or no stock, takes the incoming cost as is.
/// Returns `None` when nothing is on hand afterwards.
pub fn weighted_average_cost(
    old_avg: Option<i64>,
    old_qty: i64,
    unit_cost: i64,
    received_qty: i64,
) -> Option<i64> {
    let old_qty = old_qty.max(0);
    let new_qty = old_qty + received_qty;
    if new_qty <= 0 {
        return None;
    }
    let old_avg = match old_avg {
        Some(avg) if old_qty > 0 => avg,
        _ => return Some(unit_cost),
    };

    let total = i128::from(old_avg) * i128::from(old_qty)
        + i128::from(unit_cost) * i128::from(received_qty);
    let divisor = i128::from(new_qty);
    let rounded = if total >= 0 {
        (total + divisor / 2) / divisor
    } else {
        (total - divisor / 2) / divisor
    };
    i64::try_from(rounded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn blends_existing_and_incoming_cost() {
        // 10 @ 1.00 + 30 @ 2.00 = 40 @ 1.75
        assert_eq!(weighted_average_cost(Some(100), 10, 200, 30), Some(175));
        // 1 @ 0.01 + 2 @ 0.02 = 0.05 / 3, rounds to 0.02
        assert_eq!(weighted_average_cost(Some(1), 1, 2, 2), Some(2));
    }

    #[test]
    fn first_receipt_takes_incoming_cost() {
        assert_eq!(weighted_average_cost(None, 0, 450, 5), Some(450));
        assert_eq!(weighted_average_cost(Some(999), 0, 450, 5), Some(450));
        assert_eq!(weighted_average_cost(None, 0, 450, 0), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        /// Property: the blended cost lies between the two input costs.
        #[test]
        fn average_is_bounded_by_inputs(
            old_avg in 0i64..1_000_000,
            old_qty in 1i64..10_000,
            cost in 0i64..1_000_000,
            qty in 1i64..10_000,
        ) {
            let avg = weighted_average_cost(Some(old_avg), old_qty, cost, qty).unwrap();
            prop_assert!(avg >= old_avg.min(cost));
            prop_assert!(avg <= old_avg.max(cost));
        }
    }
}
