//! Simulated car driving the publisher
//!
//! A [`CarSimulator`] random-walks a position and drains a battery; the
//! [`SimulationDriver`] steps it on a fixed interval and hands each snapshot
//! to a [`TelemetrySink`] on its own task, so a slow or failing publish never
//! delays the next tick.

use crate::config::SimulationSection;
use crate::error::ClientError;
use crate::protocol::CarMetadata;
use crate::simulation_span;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

/// Largest position change per tick, in degrees
pub const MAX_STEP_DEGREES: f64 = 0.0005;
/// Battery drain per tick, in percentage points
pub const MIN_DRAIN: f64 = 0.05;
pub const MAX_DRAIN: f64 = 0.3;
/// Below this the car is considered recharged to full
pub const RECHARGE_THRESHOLD: f64 = 5.0;

/// Destination of simulated telemetry
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Send one snapshot; returns the correlation id it was sent under
    async fn send(&self, snapshot: CarMetadata) -> Result<String, ClientError>;
}

#[derive(Debug)]
pub struct CarSimulator {
    latitude: f64,
    longitude: f64,
    battery: f64,
    rng: StdRng,
}

impl CarSimulator {
    pub fn new(latitude: f64, longitude: f64, battery: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            latitude,
            longitude,
            battery: battery.clamp(0.0, 100.0),
            rng,
        }
    }

    pub fn from_config(section: &SimulationSection) -> Self {
        Self::new(
            section.latitude,
            section.longitude,
            section.battery,
            section.seed,
        )
    }

    /// Advance one tick and return the new snapshot stamped now
    pub fn step(&mut self) -> CarMetadata {
        self.step_at(Utc::now())
    }

    pub fn step_at(&mut self, now: DateTime<Utc>) -> CarMetadata {
        self.latitude = (self.latitude
            + self.rng.gen_range(-MAX_STEP_DEGREES..=MAX_STEP_DEGREES))
        .clamp(-90.0, 90.0);
        self.longitude = (self.longitude
            + self.rng.gen_range(-MAX_STEP_DEGREES..=MAX_STEP_DEGREES))
        .clamp(-180.0, 180.0);

        self.battery = (self.battery - self.rng.gen_range(MIN_DRAIN..=MAX_DRAIN)).max(0.0);
        if self.battery < RECHARGE_THRESHOLD {
            info!("Battery at {:.2}%, recharging", self.battery);
            self.battery = 100.0;
        }

        self.snapshot_at(now)
    }

    pub fn snapshot_at(&self, timestamp: DateTime<Utc>) -> CarMetadata {
        CarMetadata {
            latitude: self.latitude,
            longitude: self.longitude,
            battery: self.battery,
            timestamp,
        }
    }
}

/// Shortest period the driver ticks at
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

pub struct SimulationDriver {
    simulator: CarSimulator,
    interval: Duration,
}

impl SimulationDriver {
    /// A zero interval is raised to [`MIN_TICK_INTERVAL`]
    pub fn new(simulator: CarSimulator, interval: Duration) -> Self {
        if interval < MIN_TICK_INTERVAL {
            warn!(requested = ?interval, "Simulation interval too short, using {:?}", MIN_TICK_INTERVAL);
        }
        Self {
            simulator,
            interval: interval.max(MIN_TICK_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn from_config(section: &SimulationSection) -> Self {
        Self::new(CarSimulator::from_config(section), section.interval())
    }

    /// Start ticking; the first snapshot is sent one interval from now
    pub fn start(self, sink: Arc<dyn TelemetrySink>) -> SimulationHandle {
        let ticks = Arc::new(AtomicU64::new(0));
        let tick_counter = Arc::clone(&ticks);
        let period = self.interval;
        let mut simulator = self.simulator;

        info!(interval = ?period, "Starting car simulation");
        let task = tokio::spawn(
            async move {
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    timer.tick().await;
                    let tick = tick_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let snapshot = simulator.step();
                    debug!(
                        tick,
                        latitude = snapshot.latitude,
                        longitude = snapshot.longitude,
                        battery = snapshot.battery,
                        "Simulation tick"
                    );

                    let sink = Arc::clone(&sink);
                    tokio::spawn(async move {
                        if let Err(e) = sink.send(snapshot).await {
                            warn!(tick, "Telemetry not sent: {}", e);
                        }
                    });
                }
            }
            .instrument(simulation_span!(interval_ms = period.as_millis() as u64)),
        );

        SimulationHandle { task, ticks }
    }
}

/// Running simulation; stopping cancels the timer, not in-flight sends
pub struct SimulationHandle {
    task: JoinHandle<()>,
    ticks: Arc<AtomicU64>,
}

impl SimulationHandle {
    pub fn stop(&self) {
        if !self.task.is_finished() {
            self.task.abort();
            info!(ticks = self.ticks(), "Car simulation stopped");
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
