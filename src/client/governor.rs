use std::time::Duration;

use tokio::time::Instant;

/// Fixed-origin request pacer.
///
/// When throttled, each request owns one tick of `1 / rate` seconds counted
/// from the start of the run. The schedule advances by exactly one tick per
/// request whether or not the caller had to wait. A request slower than its
/// tick gets no sleep afterwards.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    state: State,
}

#[derive(Debug, Clone)]
enum State {
    Unthrottled,
    Throttled { tick: Duration, last_tick: Instant },
}

impl RateGovernor {
    pub fn unthrottled() -> Self {
        Self { state: State::Unthrottled }
    }

    /// # Panics
    ///
    /// If [`RateGovernor::tick_for`] rejects `rate`.
    pub fn throttled(rate: f64, start: Instant) -> Self {
        let tick = Self::tick_for(rate)
            .unwrap_or_else(|| panic!("target rate must be positive and at least one per Duration::MAX, got {}", rate));

        Self {
            state: State::Throttled { tick, last_tick: start },
        }
    }

    /// Tick length for `rate` requests per second, if `rate` is a finite
    /// positive number whose tick fits in a [`Duration`].
    pub fn tick_for(rate: f64) -> Option<Duration> {
        if !(rate.is_finite() && rate > 0.0) {
            return None;
        }
        Duration::try_from_secs_f64(1.0 / rate).ok()
    }

    pub fn new(rate: Option<f64>, start: Instant) -> Self {
        match rate {
            Some(rate) => Self::throttled(rate, start),
            None => Self::unthrottled(),
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self.state, State::Throttled { .. })
    }

    pub fn tick(&self) -> Option<Duration> {
        match self.state {
            State::Throttled { tick, .. } => Some(tick),
            State::Unthrottled => None,
        }
    }

    /// Advances the schedule for a request that completed at `now` and
    /// returns how long to sleep before issuing the next one.
    pub fn pace(&mut self, now: Instant) -> Option<Duration> {
        match &mut self.state {
            State::Unthrottled => None,
            State::Throttled { tick, last_tick } => {
                let next_tick = *last_tick + *tick;
                *last_tick = next_tick;

                next_tick
                    .checked_duration_since(now)
                    .filter(|pause| !pause.is_zero())
            }
        }
    }
}
