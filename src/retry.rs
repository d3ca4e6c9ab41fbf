// ===============================
// src/retry.rs
// ===============================
//
// Kebijakan retry untuk HTTP 429: jumlah attempt tetap, delay awal,
// lalu dikali `multiplier` setiap retry. Murni (tanpa I/O) supaya bisa
// dites tanpa jaringan.
//
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_delay: Duration::from_secs(5), multiplier: 2 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: u32) -> Self {
        Self { max_attempts: max_attempts.max(1), initial_delay, multiplier: multiplier.max(1) }
    }

    /// Delay before retry number `retry` (0-based): initial * multiplier^retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry);
        self.initial_delay.saturating_mul(factor)
    }

    /// Whether another attempt is allowed after `attempts_made` rate-limited attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Total sleep if every attempt but the last one gets a 429.
    pub fn worst_case_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|r| self.delay_for(r))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}
