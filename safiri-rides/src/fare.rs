/// Fare arithmetic. Amounts are integer cents; per-seat prices are fixed at
/// ride creation.

/// Full fare for a fresh booking.
pub fn total_fare(seat_count: i32, price_per_seat_cents: i64) -> i64 {
    seat_count as i64 * price_per_seat_cents
}

/// The incremental amount owed for a payment cycle: new seats minus seats
/// already settled, times price. Non-positive means there is nothing to
/// charge and no transaction may be created.
pub fn delta_charge(seat_count: i32, paid_seat_count: i32, price_per_seat_cents: i64) -> i64 {
    (seat_count as i64 - paid_seat_count as i64) * price_per_seat_cents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_fare() {
        assert_eq!(total_fare(4, 100_000), 400_000);
    }

    // A rider with 2 paid seats growing to 5 owes only the 3-seat delta.
    #[test]
    fn test_delta_charge_bills_increment_only() {
        assert_eq!(delta_charge(5, 2, 100_000), 300_000);
    }

    #[test]
    fn test_delta_charge_first_cycle_is_full_fare() {
        assert_eq!(delta_charge(3, 0, 100_000), 300_000);
    }

    #[test]
    fn test_delta_charge_non_positive_when_nothing_owed() {
        assert_eq!(delta_charge(2, 2, 100_000), 0);
        assert!(delta_charge(1, 2, 100_000) < 0);
    }
}
