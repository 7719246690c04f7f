//! The platform commission charged on a settled auction.
//!
//! Commission rules (tiers, promotions, per-category rates) are managed
//! outside the settlement core; the finalizer only asks one question: how
//! much of the hammer price does the platform keep.

pub trait CommissionPolicy: Send + Sync {
    /// The commission retained from `hammer_price`. Must not exceed
    /// `hammer_price`; the seller payout is `hammer_price - commission`.
    fn commission(&self, hammer_price: u64) -> u64;
}

/// A flat commission expressed in basis points of the hammer price.
#[derive(Clone, Copy, Debug)]
pub struct BasisPoints(u32);

impl BasisPoints {
    /// # Panics
    ///
    /// Panics if `bps` exceeds 10 000 (more than the full hammer price).
    #[must_use]
    pub fn new(bps: u32) -> Self {
        assert!(bps <= 10_000, "commission above 100% is nonsensical");
        Self(bps)
    }
}

impl CommissionPolicy for BasisPoints {
    fn commission(&self, hammer_price: u64) -> u64 {
        let scaled = u128::from(hammer_price) * u128::from(self.0) / 10_000;
        u64::try_from(scaled).expect("product of u64 price and bps <= 10_000 fits back into u64")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_points_round_down() {
        let policy = BasisPoints::new(250);
        assert_eq!(policy.commission(1_200_000), 30_000);
        assert_eq!(policy.commission(39), 0);
    }

    #[test]
    fn zero_rate_takes_nothing() {
        assert_eq!(BasisPoints::new(0).commission(u64::MAX), 0);
    }

    #[test]
    #[should_panic(expected = "nonsensical")]
    fn rates_above_full_price_are_rejected() {
        let _ = BasisPoints::new(10_001);
    }
}
