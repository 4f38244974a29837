//! # Polling Loop
//!
//! Runs one acquisition cycle per tick, publishes what it got and keeps the
//! count of consecutive failed cycles. Timeouts and decode failures are
//! tolerated up to the failure ceiling; past it the loop publishes the
//! "unavailable" sentinel once and stops with [`SmlError::FailStop`] rather
//! than leaving the last good value on the bus. Serial errors stop the loop
//! immediately.

use std::convert::Infallible;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::constants::{DEFAULT_FAILURE_CEILING, DEFAULT_TICK_PERIOD_MS};
use crate::error::SmlError;
use crate::measurement::{derive, DerivationPolicy, PublishedMeasurement};
use crate::publish::{Publisher, UpdateIndex};
use crate::reader::MeterReader;
use crate::sml::serial::ByteSource;

/// Timing and escalation settings of the loop.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub tick_period: Duration,
    /// Number of consecutive failed cycles tolerated; one more is fatal
    pub failure_ceiling: u32,
    /// Interval of the "still alive" log line, disabled when `None`
    pub sign_of_life: Option<Duration>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(DEFAULT_TICK_PERIOD_MS),
            failure_ceiling: DEFAULT_FAILURE_CEILING,
            sign_of_life: None,
        }
    }
}

/// Consecutive failure bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureState {
    consecutive: u32,
    ceiling: u32,
    last_error: Option<SmlError>,
}

impl FailureState {
    pub fn new(ceiling: u32) -> Self {
        Self {
            consecutive: 0,
            ceiling,
            last_error: None,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > 0 {
            debug!("Recovered after {} failed cycles", self.consecutive);
        }
        self.consecutive = 0;
        self.last_error = None;
    }

    /// Counts a failed cycle and returns the new count.
    pub fn record_failure(&mut self, err: &SmlError) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.last_error = Some(err.clone());
        self.consecutive
    }

    pub fn exceeded(&self) -> bool {
        self.consecutive > self.ceiling
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn last_error(&self) -> Option<&SmlError> {
        self.last_error.as_ref()
    }
}

/// Result of one tick that did not end the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Published {
        index: UpdateIndex,
        power_w: f64,
    },
    Failed {
        consecutive_failures: u32,
        error: SmlError,
    },
}

#[derive(Debug, Clone, Copy)]
struct LastUpdate {
    at: DateTime<Utc>,
    power_w: f64,
}

/// Ties reader, derivation and publisher together.
pub struct PollingLoop<S: ByteSource, P: Publisher> {
    reader: MeterReader<S>,
    publisher: P,
    policy: DerivationPolicy,
    config: PollingConfig,
    failures: FailureState,
    index: UpdateIndex,
    last_update: Option<LastUpdate>,
    last_sign_of_life: Instant,
}

impl<S: ByteSource, P: Publisher> PollingLoop<S, P> {
    pub fn new(
        reader: MeterReader<S>,
        publisher: P,
        policy: DerivationPolicy,
        config: PollingConfig,
    ) -> Self {
        let failures = FailureState::new(config.failure_ceiling);
        Self {
            reader,
            publisher,
            policy,
            config,
            failures,
            index: UpdateIndex::default(),
            last_update: None,
            last_sign_of_life: Instant::now(),
        }
    }

    pub fn failures(&self) -> &FailureState {
        &self.failures
    }

    pub fn update_index(&self) -> UpdateIndex {
        self.index
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn reader(&self) -> &MeterReader<S> {
        &self.reader
    }

    /// One acquisition cycle followed by publish or failure accounting.
    pub async fn tick(&mut self) -> Result<TickOutcome, SmlError> {
        match self.reader.read_sample(false).await {
            Ok(sample) => {
                self.failures.record_success();
                let measurement = derive(&sample, &self.policy);
                self.index = self.index.next();
                self.publisher.publish(&measurement, self.index)?;
                self.last_update = Some(LastUpdate {
                    at: Utc::now(),
                    power_w: sample.power_w,
                });
                debug!("House consumption: {:.0} W", sample.power_w);
                self.sign_of_life();
                Ok(TickOutcome::Published {
                    index: self.index,
                    power_w: sample.power_w,
                })
            }
            Err(e) if e.counts_as_cycle_failure() => {
                let consecutive = self.failures.record_failure(&e);
                warn!("Cycle failed ({consecutive} in a row): {e}");
                if self.failures.exceeded() {
                    return Err(self.fail_stop(e));
                }
                self.sign_of_life();
                Ok(TickOutcome::Failed {
                    consecutive_failures: consecutive,
                    error: e,
                })
            }
            Err(e) => {
                error!(
                    "{e} (after {} consecutive failed cycles)",
                    self.failures.consecutive()
                );
                Err(e)
            }
        }
    }

    /// Ticks until a fatal error. Ticks never overlap; a slow cycle delays
    /// the next tick instead of queueing extra ones.
    pub async fn run(&mut self) -> Result<Infallible, SmlError> {
        info!(
            "Polling every {} ms, giving up after {} consecutive failures",
            self.config.tick_period.as_millis(),
            self.config.failure_ceiling + 1
        );
        let mut ticker = interval(self.config.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await?;
        }
    }

    fn fail_stop(&mut self, last: SmlError) -> SmlError {
        let consecutive = self.failures.consecutive();
        error!("Meter unreadable for {consecutive} consecutive cycles, last error: {last}");
        if let Err(e) = self
            .publisher
            .publish(&PublishedMeasurement::unavailable(), self.index)
        {
            error!("Could not publish unavailable marker: {e}");
        }
        SmlError::FailStop {
            consecutive_failures: consecutive,
            last_error: last.to_string(),
        }
    }

    fn sign_of_life(&mut self) {
        let Some(period) = self.config.sign_of_life else {
            return;
        };
        if self.last_sign_of_life.elapsed() < period {
            return;
        }
        self.last_sign_of_life = Instant::now();
        match self.last_update {
            Some(last) => info!(
                "Last update: {}, last power: {:.0} W",
                last.at.to_rfc3339(),
                last.power_w
            ),
            None => info!("No successful update yet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_state_ceiling() {
        let err = SmlError::CycleTimeout { waited_ms: 6000 };
        let mut state = FailureState::new(2);
        assert_eq!(state.record_failure(&err), 1);
        assert_eq!(state.record_failure(&err), 2);
        assert!(!state.exceeded());
        assert_eq!(state.record_failure(&err), 3);
        assert!(state.exceeded());
        assert_eq!(state.last_error(), Some(&err));

        state.record_success();
        assert_eq!(state.consecutive(), 0);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_zero_ceiling_fails_on_first() {
        let mut state = FailureState::new(0);
        state.record_failure(&SmlError::MissingField("power".into()));
        assert!(state.exceeded());
    }
}
