//! Asymmetric timelock calculation for the two swap legs.
//!
//! The BTC-leg refund window must open strictly after the asset-leg window,
//! otherwise one party could wait out the shorter leg and settle both sides.
//! The buffer also absorbs BTC confirmation latency and clock skew between
//! the two ledgers.

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

/// Smallest accepted safety buffer between the two legs, in hours.
pub const MIN_BUFFER_HOURS: u64 = 1;
/// Largest accepted safety buffer between the two legs, in hours.
pub const MAX_BUFFER_HOURS: u64 = 24;
/// Buffer applied when the caller does not specify one.
pub const DEFAULT_BUFFER_HOURS: u64 = 2;

/// The pair of deadlines governing one swap: the asset escrow expires at
/// `t_asset`, the Bitcoin HTLC becomes refundable at `t_btc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockPair {
    /// Asset-leg expiry, unix seconds.
    pub t_asset: u64,
    /// BTC-leg refund locktime, unix seconds. Always `t_asset + buffer`.
    pub t_btc: u64,
    /// Safety buffer in hours separating the two deadlines.
    pub buffer_hours: u64,
}

impl TimelockPair {
    /// Computes `t_btc = t_asset + buffer` and validates the pair.
    ///
    /// `now` is passed explicitly so callers with a block-timestamp clock and
    /// tests share the same path.
    pub fn calculate(t_asset: u64, buffer_hours: u64, now: u64) -> Result<Self, ProtocolError> {
        if !(MIN_BUFFER_HOURS..=MAX_BUFFER_HOURS).contains(&buffer_hours) {
            return Err(ProtocolError::BufferOutOfRange {
                hours: buffer_hours,
            });
        }
        if t_asset <= now {
            return Err(ProtocolError::DeadlineInPast { t_asset, now });
        }
        let t_btc = t_asset + buffer_hours * 3600;
        Ok(TimelockPair {
            t_asset,
            t_btc,
            buffer_hours,
        })
    }

    /// Seconds separating the BTC-leg refund from the asset-leg expiry.
    pub fn gap_secs(&self) -> u64 {
        self.t_btc - self.t_asset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_calculate_default_buffer() {
        let pair = TimelockPair::calculate(NOW + 7200, DEFAULT_BUFFER_HOURS, NOW).unwrap();
        assert_eq!(pair.t_btc, pair.t_asset + 2 * 3600);
        assert!(pair.gap_secs() >= 3600);
    }

    #[test]
    fn test_buffer_bounds() {
        assert!(TimelockPair::calculate(NOW + 7200, 0, NOW).is_err());
        assert!(TimelockPair::calculate(NOW + 7200, 25, NOW).is_err());
        assert!(TimelockPair::calculate(NOW + 7200, 1, NOW).is_ok());
        assert!(TimelockPair::calculate(NOW + 7200, 24, NOW).is_ok());
    }

    #[test]
    fn test_deadline_must_be_future() {
        assert!(matches!(
            TimelockPair::calculate(NOW, 2, NOW),
            Err(ProtocolError::DeadlineInPast { .. })
        ));
        assert!(TimelockPair::calculate(NOW + 1, 2, NOW).is_ok());
    }
}
