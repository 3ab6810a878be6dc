//! Idle/keepalive supervisor: one task per connection running two independent
//! timers. The liveness ping goes out on a fixed period regardless of user
//! activity; it exists solely to stop intermediaries from reclaiming an idle
//! connection. The idle countdown is reset only by locally-detected user
//! activity and closes the transport with the reserved idle close code when
//! it reaches zero. Enforcement is advisory; the gateway is expected to hold
//! the authoritative boundary server-side.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::transport::{CLOSE_CODE_IDLE_TIMEOUT, Transport};

pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(5);

pub struct IdleSupervisor {
    activity: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl IdleSupervisor {
    /// Wraps a transport with a keepalive tick sending `keepalive_frame` and,
    /// when `idle_budget` is set, an inactivity countdown. The supervisor is
    /// torn down by dropping it, which must happen before its transport
    /// handle is discarded on reconnect.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        keepalive_frame: Vec<u8>,
        idle_budget: Option<Duration>,
    ) -> Self {
        let (activity, activity_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(supervise(
            transport,
            keepalive_frame,
            idle_budget,
            activity_rx,
        ));
        Self { activity, task }
    }

    /// Note a qualifying user-activity event (keystroke, pointer click).
    /// Remote traffic and the liveness ping never count.
    pub fn record_activity(&self) {
        let _ = self.activity.send(());
    }
}

impl Drop for IdleSupervisor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn supervise(
    transport: Arc<dyn Transport>,
    keepalive_frame: Vec<u8>,
    idle_budget: Option<Duration>,
    mut activity_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut keepalive = time::interval_at(Instant::now() + KEEPALIVE_PERIOD, KEEPALIVE_PERIOD);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut idle_deadline = idle_budget.map(|budget| Instant::now() + budget);

    loop {
        let idle_expiry = async {
            match idle_deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = keepalive.tick() => {
                if !transport.is_open() {
                    break;
                }
                if transport.send(keepalive_frame.clone()).await.is_err() {
                    break;
                }
            }
            _ = idle_expiry => {
                debug!(target: "gangway::supervisor", "idle budget exhausted, closing transport");
                transport.close(CLOSE_CODE_IDLE_TIMEOUT, "idle timeout").await;
                break;
            }
            activity = activity_rx.recv() => match activity {
                Some(()) => {
                    if let Some(budget) = idle_budget {
                        idle_deadline = Some(Instant::now() + budget);
                    }
                }
                None => break,
            }
        }
    }
}
