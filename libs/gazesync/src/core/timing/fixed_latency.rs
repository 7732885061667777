// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::resolver::{BoxFuture, FrameTimestampResolver};
use crate::core::Result;
use crate::core::clocks::Timestamp;
use crate::core::frames::FrameSize;

/// Subtracts a constant latency from every delivery timestamp.
///
/// No setup and no jitter correction; any error in the constant shows up as
/// a systematic bias.
#[derive(Debug, Clone, Copy)]
pub struct FixedLatency {
    latency: u64,
}

impl FixedLatency {
    pub fn new(latency_ticks: u64) -> Self {
        Self {
            latency: latency_ticks,
        }
    }

    pub fn from_micros(latency_us: u64, frequency: u64) -> Self {
        Self::new((latency_us as u128 * frequency as u128 / 1_000_000) as u64)
    }

    pub fn latency(&self) -> u64 {
        self.latency
    }
}

impl FrameTimestampResolver for FixedLatency {
    fn resolve(
        &self,
        _frame: &[u8],
        _size: FrameSize,
        late_estimate: Timestamp,
    ) -> BoxFuture<'static, Result<Timestamp>> {
        Box::pin(std::future::ready(Ok(late_estimate.saturating_sub(self.latency))))
    }

    fn name(&self) -> &'static str {
        "fixed_latency"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subtracts_latency() {
        let resolver = FixedLatency::new(250);
        let ts = resolver.resolve(&[], FrameSize::default(), 1_000).await.unwrap();
        assert_eq!(ts, 750);
    }

    #[tokio::test]
    async fn test_saturates_at_zero() {
        let resolver = FixedLatency::new(5_000);
        let ts = resolver.resolve(&[], FrameSize::default(), 1_000).await.unwrap();
        assert_eq!(ts, 0);
    }

    #[test]
    fn test_from_micros() {
        assert_eq!(FixedLatency::from_micros(1_500, 1_000_000_000).latency(), 1_500_000);
        assert_eq!(FixedLatency::from_micros(0, 1_000_000_000).latency(), 0);
    }
}
