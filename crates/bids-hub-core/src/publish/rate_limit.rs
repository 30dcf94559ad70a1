//! Sliding-window commit limiter

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Allows at most `max_commits` acquisitions in any `window`
#[derive(Debug)]
pub struct CommitRateLimiter {
    max_commits: usize,
    window: Duration,
    history: VecDeque<Instant>,
}

impl CommitRateLimiter {
    pub fn new(max_commits: usize, window: Duration) -> Self {
        Self {
            max_commits: max_commits.max(1),
            window,
            history: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.history.front() {
            if now.duration_since(oldest) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Wait until a commit slot is free, then take it
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            self.evict(now);
            if self.history.len() < self.max_commits {
                self.history.push_back(now);
                return;
            }
            if let Some(&oldest) = self.history.front() {
                let wake = oldest + self.window;
                info!(
                    "Commit rate limit reached ({} per {:?}); waiting {:?}",
                    self.max_commits,
                    self.window,
                    wake.saturating_duration_since(now)
                );
                tokio::time::sleep_until(wake).await;
            }
        }
    }

    pub fn in_window(&self) -> usize {
        self.history.len()
    }
}
