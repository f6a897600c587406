//! Per-user and global admission control.
//!
//! A pure in-memory ledger, no I/O. Every check returns `(allowed, reason)`
//! where the reason names the first violated rule; callers surface it
//! verbatim. One user exhausting a limit never affects another user.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::info;

/// Capacity limits. Zero means "no capacity", not "unlimited".
#[derive(Debug, Clone, Serialize)]
pub struct ResourceLimits {
    pub max_concurrent_backtests_per_user: usize,
    pub max_total_concurrent_backtests: usize,
    pub max_daily_backtests_per_user: usize,
    pub max_concurrent_bots_per_user: usize,
    pub max_total_concurrent_bots: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_concurrent_backtests_per_user: 2,
            max_total_concurrent_backtests: 10,
            max_daily_backtests_per_user: 50,
            max_concurrent_bots_per_user: 5,
            max_total_concurrent_bots: 100,
        }
    }
}

/// Per-user usage snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub user_id: i64,
    pub active_backtests: usize,
    pub active_bots: usize,
    pub daily_backtest_count: usize,
    pub limits: ResourceLimits,
}

/// System-wide usage snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub total_active_backtests: usize,
    pub total_active_bots: usize,
    /// Users with at least one active backtest.
    pub active_users: usize,
    pub limits: ResourceLimits,
}

#[derive(Default)]
struct Ledger {
    active_backtests: HashMap<i64, HashSet<i64>>,
    daily_backtest_count: HashMap<i64, usize>,
    active_bots: HashMap<i64, HashSet<String>>,
}

/// Admission-control ledger. The interior mutex is the single writer; reads
/// for stats take the same lock and are therefore consistent snapshots.
pub struct ResourceController {
    limits: ResourceLimits,
    ledger: Mutex<Ledger>,
}

impl ResourceController {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits, ledger: Mutex::new(Ledger::default()) }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Check backtest admission: per-user concurrent cap first, then the
    /// global cap, then the per-user daily cap.
    pub fn can_start_backtest(&self, user_id: i64) -> (bool, Option<String>) {
        let ledger = self.ledger.lock().unwrap();

        let user_active = ledger.active_backtests.get(&user_id).map_or(0, |s| s.len());
        if user_active >= self.limits.max_concurrent_backtests_per_user {
            return (
                false,
                Some(format!(
                    "Max concurrent backtests per user ({}) reached",
                    self.limits.max_concurrent_backtests_per_user
                )),
            );
        }

        let total_active: usize = ledger.active_backtests.values().map(|s| s.len()).sum();
        if total_active >= self.limits.max_total_concurrent_backtests {
            return (false, Some("System at capacity, please try again later".to_string()));
        }

        let daily = ledger.daily_backtest_count.get(&user_id).copied().unwrap_or(0);
        if daily >= self.limits.max_daily_backtests_per_user {
            return (
                false,
                Some(format!(
                    "Daily backtest limit reached ({})",
                    self.limits.max_daily_backtests_per_user
                )),
            );
        }

        (true, None)
    }

    pub fn start_backtest(&self, user_id: i64, backtest_id: i64) {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.active_backtests.entry(user_id).or_default().insert(backtest_id);
        *ledger.daily_backtest_count.entry(user_id).or_insert(0) += 1;
    }

    /// Idempotent: finishing an already-finished backtest is a no-op. The
    /// daily count persists across finishes.
    pub fn finish_backtest(&self, user_id: i64, backtest_id: i64) {
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(active) = ledger.active_backtests.get_mut(&user_id) {
            active.remove(&backtest_id);
        }
    }

    pub fn can_start_bot(&self, user_id: i64) -> (bool, Option<String>) {
        let ledger = self.ledger.lock().unwrap();

        let user_active = ledger.active_bots.get(&user_id).map_or(0, |s| s.len());
        if user_active >= self.limits.max_concurrent_bots_per_user {
            return (
                false,
                Some(format!(
                    "Max concurrent bots per user ({}) reached",
                    self.limits.max_concurrent_bots_per_user
                )),
            );
        }

        let total_active: usize = ledger.active_bots.values().map(|s| s.len()).sum();
        if total_active >= self.limits.max_total_concurrent_bots {
            return (false, Some("System at capacity, please try again later".to_string()));
        }

        (true, None)
    }

    pub fn start_bot(&self, user_id: i64, bot_id: &str) {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.active_bots.entry(user_id).or_default().insert(bot_id.to_string());
    }

    /// Idempotent: stopping a bot that is not registered is a no-op.
    pub fn stop_bot(&self, user_id: i64, bot_id: &str) {
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(active) = ledger.active_bots.get_mut(&user_id) {
            active.remove(bot_id);
        }
    }

    /// Clear every user's daily counters. Invoked by an external scheduler.
    pub fn reset_daily_counts(&self) {
        let mut ledger = self.ledger.lock().unwrap();
        let users = ledger.daily_backtest_count.len();
        ledger.daily_backtest_count.clear();
        info!(users, "daily backtest counts reset");
    }

    pub fn get_user_stats(&self, user_id: i64) -> UserStats {
        let ledger = self.ledger.lock().unwrap();
        UserStats {
            user_id,
            active_backtests: ledger.active_backtests.get(&user_id).map_or(0, |s| s.len()),
            active_bots: ledger.active_bots.get(&user_id).map_or(0, |s| s.len()),
            daily_backtest_count: ledger.daily_backtest_count.get(&user_id).copied().unwrap_or(0),
            limits: self.limits.clone(),
        }
    }

    pub fn get_global_stats(&self) -> GlobalStats {
        let ledger = self.ledger.lock().unwrap();
        GlobalStats {
            total_active_backtests: ledger.active_backtests.values().map(|s| s.len()).sum(),
            total_active_bots: ledger.active_bots.values().map(|s| s.len()).sum(),
            active_users: ledger.active_backtests.values().filter(|s| !s.is_empty()).count(),
            limits: self.limits.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ResourceController {
        ResourceController::new(ResourceLimits::default())
    }

    #[test]
    fn test_can_start_backtest_success() {
        let (allowed, reason) = controller().can_start_backtest(1);
        assert!(allowed);
        assert!(reason.is_none());
    }

    #[test]
    fn test_per_user_concurrent_backtest_limit() {
        let controller = controller();
        let limit = controller.limits().max_concurrent_backtests_per_user;
        for i in 0..limit {
            let (allowed, _) = controller.can_start_backtest(1);
            assert!(allowed);
            controller.start_backtest(1, i as i64);
        }
        let (allowed, reason) = controller.can_start_backtest(1);
        assert!(!allowed);
        assert!(reason.unwrap().contains("Max concurrent backtests per user"));
    }

    #[test]
    fn test_global_backtest_limit() {
        let controller = controller();
        let per_user = controller.limits().max_concurrent_backtests_per_user;
        let total = controller.limits().max_total_concurrent_backtests;

        let mut started = 0;
        for user_id in 1..100 {
            for _ in 0..per_user {
                let (allowed, reason) = controller.can_start_backtest(user_id);
                if started < total {
                    assert!(allowed);
                    controller.start_backtest(user_id, started as i64);
                    started += 1;
                } else {
                    assert!(!allowed);
                    assert!(reason.unwrap().contains("System at capacity"));
                    return;
                }
            }
        }
        panic!("global limit never reached");
    }

    #[test]
    fn test_daily_backtest_limit() {
        let limits = ResourceLimits { max_daily_backtests_per_user: 5, ..ResourceLimits::default() };
        let controller = ResourceController::new(limits);
        for i in 0..5 {
            let (allowed, _) = controller.can_start_backtest(1);
            assert!(allowed);
            controller.start_backtest(1, i);
            controller.finish_backtest(1, i);
        }
        let (allowed, reason) = controller.can_start_backtest(1);
        assert!(!allowed);
        assert!(reason.unwrap().contains("Daily backtest limit reached"));
    }

    #[test]
    fn test_finish_keeps_daily_count() {
        let controller = controller();
        controller.start_backtest(1, 100);
        assert_eq!(controller.get_user_stats(1).active_backtests, 1);
        assert_eq!(controller.get_user_stats(1).daily_backtest_count, 1);

        controller.finish_backtest(1, 100);
        assert_eq!(controller.get_user_stats(1).active_backtests, 0);
        // the daily count survives the finish
        assert_eq!(controller.get_user_stats(1).daily_backtest_count, 1);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let controller = controller();
        controller.start_backtest(1, 999);
        controller.finish_backtest(1, 999);
        controller.finish_backtest(1, 999);
        assert_eq!(controller.get_user_stats(1).active_backtests, 0);
    }

    #[test]
    fn test_per_user_bot_limit_and_message() {
        let controller = controller();
        let limit = controller.limits().max_concurrent_bots_per_user;
        for i in 0..limit {
            let (allowed, _) = controller.can_start_bot(1);
            assert!(allowed);
            controller.start_bot(1, &format!("bot_{i}"));
        }
        let (allowed, reason) = controller.can_start_bot(1);
        assert!(!allowed);
        assert!(reason.unwrap().contains("Max concurrent bots per user"));
    }

    #[test]
    fn test_stop_bot_is_idempotent() {
        let controller = controller();
        controller.start_bot(1, "bot_a");
        controller.stop_bot(1, "bot_a");
        controller.stop_bot(1, "bot_a");
        controller.stop_bot(2, "never_started");
        assert_eq!(controller.get_user_stats(1).active_bots, 0);
    }

    #[test]
    fn test_user_isolation() {
        let controller = controller();
        let limit = controller.limits().max_concurrent_backtests_per_user;
        for i in 0..limit {
            controller.start_backtest(1, i as i64);
        }
        let (allowed, _) = controller.can_start_backtest(1);
        assert!(!allowed);
        // a different user is unaffected
        let (allowed, _) = controller.can_start_backtest(2);
        assert!(allowed);
    }

    #[test]
    fn test_global_stats_counts_active_users() {
        let controller = controller();
        controller.start_backtest(1, 1);
        controller.start_backtest(1, 2);
        controller.start_backtest(2, 3);
        controller.start_bot(1, "bot_1");
        controller.start_bot(2, "bot_2");
        controller.start_bot(3, "bot_3");

        let stats = controller.get_global_stats();
        assert_eq!(stats.total_active_backtests, 3);
        assert_eq!(stats.total_active_bots, 3);
        // only users with an active backtest count
        assert_eq!(stats.active_users, 2);
    }

    #[test]
    fn test_reset_daily_counts() {
        let controller = controller();
        for user_id in 1..6 {
            for i in 0..5 {
                controller.start_backtest(user_id, user_id * 100 + i);
                controller.finish_backtest(user_id, user_id * 100 + i);
            }
        }
        for user_id in 1..6 {
            assert_eq!(controller.get_user_stats(user_id).daily_backtest_count, 5);
        }
        controller.reset_daily_counts();
        for user_id in 1..6 {
            assert_eq!(controller.get_user_stats(user_id).daily_backtest_count, 0);
        }
    }
}
