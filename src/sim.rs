// Copyright 2026 Cornell University
// released under MIT License

//! # Simulation backends
//! The bridge only talks to the bus through the [`Simulation`] trait: read a line,
//! schedule a write, wait for an edge. [`Simulator`] is a small in-process
//! implementation of that contract, driven by a [`Clock`] task.
//!
//! Writes are *scheduled*: they become visible at the next simulation step, so
//! every task woken by the same edge samples the same values.
//!
//! The simulator relies on tokio's paused clock (`start_paused`) on a
//! current-thread runtime. Virtual time only advances once every task is
//! suspended, which guarantees that all tasks woken by one step have re-armed
//! their edge waits before the next step happens.

use crate::errors::{SimError, SimResult};
use crate::signal::{bv, Edge, SignalValue};
use baa::{BitVecValue, WidthInt};
use log::{debug, trace, warn};
use rustc_hash::FxHashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Granularity of tokio's timer. Shorter sleeps are rounded up to it.
const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// Capacity of the step-event channel. Waiters are woken on every step, so they
/// only fall behind if a task blocks the runtime.
const EVENT_CAPACITY: usize = 64;

/// The collaborator contract consumed by the bridge
pub trait Simulation: Clone + Send + Sync + 'static {
    /// Returns the current value of a named line
    fn read(&self, name: &str) -> SimResult<SignalValue>;

    /// Returns the current value of a named line as an integer,
    /// reading unresolvable values as 0
    fn read_int(&self, name: &str) -> SimResult<u64> {
        Ok(self.read(name)?.to_int())
    }

    /// Schedules `value` to appear on a named line at the next simulation step
    fn write(&self, name: &str, value: u64) -> SimResult<()>;

    /// Resolves at the next `edge` transition of a named line.
    /// The wait starts when this method is called, not when the future is first polled.
    fn edge(
        &self,
        name: &str,
        edge: Edge,
    ) -> impl Future<Output = SimResult<()>> + Send + 'static;

    /// Number of simulation steps taken so far
    fn now(&self) -> u64;
}

/// Index of a declared signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u32);

#[derive(Debug)]
struct Slot {
    name: String,
    width: WidthInt,
    value: SignalValue,
    /// Value scheduled by `write`, applied at the next step
    pending: Option<BitVecValue>,
}

/// Edges produced by one simulation step
#[derive(Debug)]
struct StepEvent {
    step: u64,
    edges: Vec<(SignalId, Edge)>,
}

#[derive(Debug)]
struct SimState {
    ids: FxHashMap<String, SignalId>,
    slots: Vec<Slot>,
    step: u64,
    /// `None` once the simulation has been stopped
    events: Option<broadcast::Sender<Arc<StepEvent>>>,
}

impl SimState {
    fn lookup(&self, name: &str) -> SimResult<SignalId> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownSignal(name.to_string()))
    }

    fn slot(&self, id: SignalId) -> &Slot {
        &self.slots[id.0 as usize]
    }
}

/// In-process implementation of [`Simulation`].
/// Cloning yields another handle to the same simulation.
#[derive(Debug, Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimState>>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SimState {
                ids: FxHashMap::default(),
                slots: vec![],
                step: 0,
                events: Some(events),
            })),
        }
    }

    // The lock is never held across an `.await`, so a poisoned lock only means
    // another task panicked between two plain field updates
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declares a line of the given `width`. Its value is unknown until first written.
    pub fn declare(&self, name: &str, width: WidthInt) -> SimResult<SignalId> {
        let mut state = self.state();
        if state.ids.contains_key(name) {
            return Err(SimError::DuplicateSignal(name.to_string()));
        }
        let id = SignalId(state.slots.len() as u32);
        state.slots.push(Slot {
            name: name.to_string(),
            width,
            value: SignalValue::Unknown(width),
            pending: None,
        });
        state.ids.insert(name.to_string(), id);
        debug!("Declared signal `{name}` ({width} bits) as {id:?}");
        Ok(id)
    }

    /// Applies all scheduled writes and wakes the tasks waiting on the resulting edges.
    /// Returns the number of the step that was just taken.
    pub fn step(&self) -> SimResult<u64> {
        let mut state = self.state();
        let events = state.events.clone().ok_or(SimError::Stopped)?;

        let mut edges = vec![];
        for (idx, slot) in state.slots.iter_mut().enumerate() {
            if let Some(next) = slot.pending.take() {
                let prev_level = slot.value.to_int();
                slot.value = SignalValue::Known(next);
                let next_level = slot.value.to_int();
                for edge in [Edge::Rising, Edge::Falling] {
                    if edge.matches(prev_level, next_level) {
                        edges.push((SignalId(idx as u32), edge));
                    }
                }
            }
        }
        state.step += 1;
        let step = state.step;
        drop(state);

        trace!("Step {step}: {} edge(s)", edges.len());
        // an error only means nobody is waiting on an edge right now
        let _ = events.send(Arc::new(StepEvent { step, edges }));
        Ok(step)
    }

    /// Stops the simulation: pending and future edge waits fail with `SimError::Stopped`
    pub fn stop(&self) {
        let mut state = self.state();
        if state.events.take().is_some() {
            debug!("Simulation stopped at step {}", state.step);
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().events.is_some()
    }

    /// Names of all declared signals, in declaration order
    pub fn signal_names(&self) -> Vec<String> {
        self.state().slots.iter().map(|s| s.name.clone()).collect()
    }

    fn subscribe(
        &self,
        name: &str,
    ) -> SimResult<(SignalId, broadcast::Receiver<Arc<StepEvent>>)> {
        let state = self.state();
        let id = state.lookup(name)?;
        let events = state.events.as_ref().ok_or(SimError::Stopped)?;
        Ok((id, events.subscribe()))
    }
}

impl Simulation for Simulator {
    fn read(&self, name: &str) -> SimResult<SignalValue> {
        let state = self.state();
        let id = state.lookup(name)?;
        Ok(state.slot(id).value.clone())
    }

    fn write(&self, name: &str, value: u64) -> SimResult<()> {
        let mut state = self.state();
        if state.events.is_none() {
            return Err(SimError::Stopped);
        }
        let id = state.lookup(name)?;
        let slot = &mut state.slots[id.0 as usize];
        let next = bv(value, slot.width).ok_or_else(|| SimError::ValueTooWide {
            signal: name.to_string(),
            value,
            width: slot.width,
        })?;
        trace!("Scheduling {name} <= {value}");
        slot.pending = Some(next);
        Ok(())
    }

    fn edge(
        &self,
        name: &str,
        edge: Edge,
    ) -> impl Future<Output = SimResult<()>> + Send + 'static {
        let subscription = self.subscribe(name);
        async move {
            let (id, mut events) = subscription?;
            loop {
                match events.recv().await {
                    Ok(event) if event.edges.contains(&(id, edge)) => {
                        trace!("{edge} edge on {id:?} at step {}", event.step);
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Edge waiter on {id:?} missed {skipped} step(s)")
                    }
                    Err(RecvError::Closed) => return Err(SimError::Stopped),
                }
            }
        }
    }

    fn now(&self) -> u64 {
        self.state().step
    }
}

/// Free-running clock: toggles a 1-bit signal every half `period`,
/// taking one simulation step per toggle.
/// Half a period must be a whole number of timer ticks, i.e. the period is a
/// positive multiple of 2ms of (virtual) time.
#[derive(Debug)]
pub struct Clock {
    sim: Simulator,
    signal: String,
    period: Duration,
}

impl Clock {
    pub fn new(sim: Simulator, signal: impl Into<String>, period: Duration) -> SimResult<Self> {
        let tick = 2 * TIMER_RESOLUTION.as_nanos();
        if period.is_zero() || period.as_nanos() % tick != 0 {
            return Err(SimError::ClockPeriod(period));
        }
        Ok(Self {
            sim,
            signal: signal.into(),
            period,
        })
    }

    /// Runs until the simulation is stopped. The first step drives the clock low,
    /// so the first rising edge happens half a period in.
    pub async fn run(self) -> SimResult<()> {
        let half_period = self.period / 2;
        let mut level = 0;
        debug!(
            "Starting clock `{}` with period {:?}",
            self.signal, self.period
        );
        loop {
            match self.sim.write(&self.signal, level).and_then(|_| self.sim.step()) {
                Ok(_) => {}
                Err(SimError::Stopped) => return Ok(()),
                Err(e) => return Err(e),
            }
            tokio::time::sleep(half_period).await;
            level ^= 1;
        }
    }

    /// Spawns the clock as a task on the current runtime
    pub fn start(self) -> JoinHandle<SimResult<()>> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    const PERIOD: Duration = Duration::from_millis(2);

    fn sim_with_clock() -> Simulator {
        let sim = Simulator::new();
        sim.declare("clk", 1).unwrap();
        sim.declare("data", 8).unwrap();
        sim
    }

    #[test]
    fn writes_become_visible_at_the_next_step() {
        let sim = sim_with_clock();
        assert_eq!(sim.read("data").unwrap(), SignalValue::Unknown(8));
        sim.write("data", 42).unwrap();
        assert!(!sim.read("data").unwrap().is_known());
        assert_eq!(sim.step().unwrap(), 1);
        assert_eq!(sim.read_int("data").unwrap(), 42);
        assert_eq!(sim.now(), 1);
    }

    #[test]
    fn last_write_in_a_step_wins() {
        let sim = sim_with_clock();
        sim.write("data", 1).unwrap();
        sim.write("data", 2).unwrap();
        sim.step().unwrap();
        assert_eq!(sim.read_int("data").unwrap(), 2);
    }

    #[test]
    fn rejects_unknown_duplicate_and_oversized() {
        let sim = sim_with_clock();
        assert_eq!(
            sim.read("busy"),
            Err(SimError::UnknownSignal("busy".to_string()))
        );
        assert_eq!(
            sim.declare("clk", 1),
            Err(SimError::DuplicateSignal("clk".to_string()))
        );
        assert_eq!(
            sim.write("data", 256),
            Err(SimError::ValueTooWide {
                signal: "data".to_string(),
                value: 256,
                width: 8
            })
        );
        assert_eq!(sim.signal_names(), vec!["clk", "data"]);
    }

    #[test]
    fn stop_rejects_further_activity() {
        let sim = sim_with_clock();
        assert!(sim.is_running());
        sim.stop();
        assert!(!sim.is_running());
        assert_eq!(sim.write("data", 1), Err(SimError::Stopped));
        assert_eq!(sim.step(), Err(SimError::Stopped));
    }

    async fn falling_edges(sim: &Simulator, n: usize) {
        for _ in 0..n {
            sim.edge("clk", Edge::Falling).await.unwrap();
        }
    }

    #[test]
    fn clock_period_must_be_whole_timer_ticks() {
        let sim = sim_with_clock();
        for period in [Duration::ZERO, Duration::from_nanos(10), Duration::from_millis(3)] {
            assert_eq!(
                Clock::new(sim.clone(), "clk", period).err(),
                Some(SimError::ClockPeriod(period))
            );
        }
        assert!(Clock::new(sim.clone(), "clk", Duration::from_millis(4)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn one_cycle_takes_one_period_of_virtual_time() {
        let sim = sim_with_clock();
        let period = Duration::from_millis(10);
        let clock = Clock::new(sim.clone(), "clk", period).unwrap().start();

        sim.edge("clk", Edge::Rising).await.unwrap();
        let first = Instant::now();
        let steps = sim.now();
        sim.edge("clk", Edge::Rising).await.unwrap();
        assert_eq!(first.elapsed(), period);
        assert_eq!(sim.now(), steps + 2);

        sim.stop();
        clock.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn edge_waits_follow_the_clock() {
        let sim = sim_with_clock();
        let clock = Clock::new(sim.clone(), "clk", PERIOD).unwrap().start();

        // step 1 drives clk low (x -> 0 is not an edge), step 2 rises, step 3 falls
        sim.edge("clk", Edge::Rising).await.unwrap();
        assert_eq!(sim.now(), 2);
        assert_eq!(sim.read_int("clk").unwrap(), 1);
        sim.edge("clk", Edge::Falling).await.unwrap();
        assert_eq!(sim.now(), 3);
        sim.edge("clk", Edge::Falling).await.unwrap();
        assert_eq!(sim.now(), 5);

        sim.stop();
        assert_eq!(sim.edge("clk", Edge::Rising).await, Err(SimError::Stopped));
        assert_eq!(clock.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn edges_on_data_lines() {
        let sim = sim_with_clock();
        let clock = Clock::new(sim.clone(), "clk", PERIOD).unwrap().start();

        let rise = sim.edge("data", Edge::Rising);
        sim.write("data", 1).unwrap();
        rise.await.unwrap();
        assert_eq!(sim.read_int("data").unwrap(), 1);

        // 1 -> 2 is neither a rising nor a falling edge of a boolean line
        let fall = sim.edge("data", Edge::Falling);
        sim.write("data", 2).unwrap();
        sim.edge("clk", Edge::Rising).await.unwrap();
        sim.write("data", 0).unwrap();
        tokio::select! {
            biased;
            _ = fall => panic!("2 -> 0 is not a falling edge"),
            _ = falling_edges(&sim, 5) => {}
        }

        sim.stop();
        clock.await.unwrap().unwrap();
    }
}
