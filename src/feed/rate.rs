// src/feed/rate.rs
use rust_decimal::Decimal;
use std::sync::RwLock;

/// Latest TMN-per-USDT cross rate. Written by exactly one feed update path
/// (the USDTTMN pair on the stream venue), read by every percent and
/// notional conversion. Until the first quote arrives the configured
/// default keeps conversions away from zero.
pub struct RateNormalizer {
    rate: RwLock<Option<Decimal>>,
    default_rate: Decimal,
}

impl RateNormalizer {
    pub fn new(default_rate: Decimal) -> Self {
        Self {
            rate: RwLock::new(None),
            default_rate,
        }
    }

    /// Record the latest observed cross rate. Non-positive values are
    /// ignored so a malformed quote can't poison every comparison.
    pub fn update(&self, rate: Decimal) {
        if rate <= Decimal::ZERO {
            log::warn!("Ignoring non-positive USDT cross rate: {}", rate);
            return;
        }
        *self.rate.write().unwrap() = Some(rate);
    }

    /// Most recent known rate, or the default if none was ever observed.
    pub fn current(&self) -> Decimal {
        self.rate.read().unwrap().unwrap_or(self.default_rate)
    }

    pub fn usdt_to_tmn(&self, value: Decimal) -> Decimal {
        value * self.current()
    }
}
