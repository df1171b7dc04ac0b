use sitectl_host::HostError;
use sitectl_schema::ObjectState;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

impl WaitPolicy {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self { interval, budget }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    /// The budget ran out; carries the last observed state, if any.
    TimedOut(Option<ObjectState>),
    Cancelled,
}

impl WaitOutcome {
    pub fn reached(self) -> bool {
        self == WaitOutcome::Reached
    }
}

/// Poll `probe` until it reports `target`, the budget is spent, or
/// `should_stop` returns true.
///
/// The probe runs at least once. Transient probe errors count as a missed
/// tick; any other error is returned.
pub fn wait_for_state<P, S>(
    mut probe: P,
    target: ObjectState,
    policy: WaitPolicy,
    should_stop: S,
) -> Result<WaitOutcome, HostError>
where
    P: FnMut() -> Result<ObjectState, HostError>,
    S: Fn() -> bool,
{
    let started = Instant::now();
    let mut last = None;
    loop {
        if should_stop() {
            return Ok(WaitOutcome::Cancelled);
        }
        match probe() {
            Ok(state) if state == target => return Ok(WaitOutcome::Reached),
            Ok(state) => last = Some(state),
            Err(e) if e.is_transient() => debug!("state probe missed a tick: {e}"),
            Err(e) => return Err(e),
        }
        if started.elapsed() >= policy.budget {
            return Ok(WaitOutcome::TimedOut(last));
        }
        thread::sleep(policy.interval);
    }
}
