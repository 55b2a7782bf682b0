//! Scheduler tiers.
//!
//! Each tier is an independent scheduler instance with its own queue and
//! dispatch thread. Tiers never block one another: a slow job only delays the
//! tier it runs on.

use std::sync::Arc;

use tracing::info;

use crate::error::SchedulerResult;
use crate::scheduler::Scheduler;

/// Scheduler tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Latency-sensitive work such as entity position updates and player ticks.
    Critical,
    /// Regular periodic work: announcements, moderation expiry, update checks.
    Main,
    /// Startup jobs and low-priority maintenance. Drains strictly in FIFO order.
    Background,
}

impl Tier {
    /// All tiers, in start order.
    pub const ALL: [Tier; 3] = [Tier::Critical, Tier::Main, Tier::Background];

    /// Name given to the tier's dispatch thread.
    pub fn thread_name(&self) -> String {
        format!("ember-{}", self)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Critical => write!(f, "critical"),
            Tier::Main => write!(f, "main"),
            Tier::Background => write!(f, "background"),
        }
    }
}

/// The three scheduler instances of a process.
pub struct Schedulers {
    critical: Arc<Scheduler>,
    main: Arc<Scheduler>,
    background: Arc<Scheduler>,
}

impl Schedulers {
    /// Start one scheduler per tier.
    pub fn start() -> SchedulerResult<Self> {
        let critical = Scheduler::start(Tier::Critical)?;
        let main = Scheduler::start(Tier::Main)?;
        let background = Scheduler::start(Tier::Background)?;
        info!("Schedulers started (critical, main, background)");

        Ok(Self {
            critical,
            main,
            background,
        })
    }

    /// Get the scheduler for a tier.
    pub fn get(&self, tier: Tier) -> &Arc<Scheduler> {
        match tier {
            Tier::Critical => &self.critical,
            Tier::Main => &self.main,
            Tier::Background => &self.background,
        }
    }

    /// Critical tier scheduler.
    pub fn critical(&self) -> &Arc<Scheduler> {
        &self.critical
    }

    /// Main tier scheduler.
    pub fn main(&self) -> &Arc<Scheduler> {
        &self.main
    }

    /// Background tier scheduler.
    pub fn background(&self) -> &Arc<Scheduler> {
        &self.background
    }

    /// Stop every tier.
    ///
    /// Tasks still queued are dropped without running.
    pub fn stop_all(&self) {
        for tier in Tier::ALL {
            self.get(tier).stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Critical.to_string(), "critical");
        assert_eq!(Tier::Main.to_string(), "main");
        assert_eq!(Tier::Background.to_string(), "background");
    }

    #[test]
    fn test_thread_name() {
        assert_eq!(Tier::Main.thread_name(), "ember-main");
    }

    #[test]
    fn test_schedulers_get_matches_tier() {
        let schedulers = Schedulers::start().unwrap();
        for tier in Tier::ALL {
            assert_eq!(schedulers.get(tier).tier(), tier);
        }
        assert_eq!(schedulers.main().tier(), Tier::Main);
        schedulers.stop_all();
    }
}
