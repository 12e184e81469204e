use std::time::Duration;

use tokio::sync::mpsc;

use crate::database::Database;
use crate::server::device_map::{lock, EndpointType};
use crate::types::UnitId;

/// Shortest period accepted for a periodic update
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a periodic update task. The task stops when the handle is dropped.
#[derive(Debug)]
pub struct PeriodicUpdate {
    _tx: mpsc::Sender<()>,
}

impl PeriodicUpdate {
    /// Stop the periodic update
    ///
    /// An invocation of the callback that is already running completes normally.
    pub fn stop(self) {}

    pub(crate) fn spawn<F>(
        unit_id: UnitId,
        endpoint: EndpointType,
        period: Duration,
        callback: F,
    ) -> Self
    where
        F: FnMut(&mut Database) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(run(unit_id, endpoint, period.max(MIN_PERIOD), rx, callback));
        Self { _tx: tx }
    }
}

async fn run<F>(
    unit_id: UnitId,
    endpoint: EndpointType,
    period: Duration,
    mut shutdown: mpsc::Receiver<()>,
    mut callback: F,
) where
    F: FnMut(&mut Database),
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::debug!("periodic update stopped for unit: {}", unit_id);
                return;
            }
            _ = interval.tick() => {
                apply(&endpoint, &mut callback);
            }
        }
    }
}

fn apply<F>(endpoint: &EndpointType, callback: &mut F)
where
    F: FnMut(&mut Database),
{
    let mut guard = lock(endpoint);
    callback(&mut guard.database);
}
