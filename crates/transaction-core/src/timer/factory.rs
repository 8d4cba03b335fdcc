use std::sync::Arc;

use crate::timer::{TimerManager, TimerSettings};

/// Bundles the timer settings a machine should run with and the shared
/// [`TimerManager`] it schedules through. Each transaction logic holds
/// one, built by the manager with settings already adjusted for the
/// transport's reliability.
#[derive(Debug, Clone)]
pub struct TimerFactory {
    settings: TimerSettings,
    timer_manager: Arc<TimerManager>,
}

impl TimerFactory {
    pub fn new(settings: TimerSettings, timer_manager: Arc<TimerManager>) -> Self {
        TimerFactory {
            settings,
            timer_manager,
        }
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub fn timer_manager(&self) -> Arc<TimerManager> {
        self.timer_manager.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn factory_exposes_adjusted_settings() {
        let settings = TimerSettings::default().for_transport(true);
        let factory = TimerFactory::new(settings, Arc::new(TimerManager::new()));
        assert_eq!(factory.settings().wait_time_k, Duration::ZERO);
    }
}
