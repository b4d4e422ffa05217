//! Single-slot sync timer.
//!
//! The timer is owned by one actor task; callers talk to it through
//! [`SchedulerHandle`], so every arm/cancel is applied in arrival order and there
//! is never more than one pending timer. When the timer fires the actor drops
//! back to idle and posts a [`TimerFired`] message on the work queue handed to
//! [`start_scheduler`]. Whoever consumes that queue runs the sync cycle and arms
//! the next timer explicitly.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Posted on the work queue when an armed timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Sequence number of the arm that produced this fire.
    pub generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub armed: bool,
    /// Time left until the pending timer fires.
    pub fires_in: Option<Duration>,
    pub armed_total: u64,
    pub fired_total: u64,
    pub cancelled_total: u64,
}

pub enum SchedulerCommand {
    Arm(Duration),
    Cancel,
    Snapshot(oneshot::Sender<SchedulerStatus>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Replace any pending timer with one firing after `delay`. A zero delay
    /// leaves the scheduler idle.
    pub fn arm(&self, delay: Duration) {
        let _ = self.tx.send(SchedulerCommand::Arm(delay));
    }

    pub fn arm_secs(&self, secs: u64) {
        self.arm(Duration::from_secs(secs));
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(SchedulerCommand::Cancel);
    }

    pub async fn snapshot(&self) -> Option<SchedulerStatus> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SchedulerCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(SchedulerCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

struct Pending {
    generation: u64,
    deadline: Instant,
}

pub fn start_scheduler(fired: mpsc::UnboundedSender<TimerFired>) -> SchedulerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<SchedulerCommand>();
    let handle = SchedulerHandle { tx };

    tokio::spawn(async move {
        let mut pending: Option<Pending> = None;
        let mut generation: u64 = 0;
        let mut stats = SchedulerStatus::default();
        loop {
            let deadline = pending.as_ref().map(|p| p.deadline);
            tokio::select! {
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        SchedulerCommand::Arm(delay) => {
                            if pending.take().is_some() {
                                stats.cancelled_total += 1;
                                log::debug!("sync timer replaced");
                            }
                            if delay.is_zero() {
                                log::debug!("sync timer idle (delay 0)");
                                continue;
                            }
                            generation += 1;
                            pending = Some(Pending { generation, deadline: Instant::now() + delay });
                            stats.armed_total += 1;
                            log::debug!("sync timer armed for {}s (#{})", delay.as_secs(), generation);
                        }
                        SchedulerCommand::Cancel => {
                            if pending.take().is_some() {
                                stats.cancelled_total += 1;
                                log::debug!("sync timer cancelled");
                            }
                        }
                        SchedulerCommand::Snapshot(resp) => {
                            let now = Instant::now();
                            let _ = resp.send(SchedulerStatus {
                                armed: pending.is_some(),
                                fires_in: pending.as_ref().map(|p| p.deadline.saturating_duration_since(now)),
                                ..stats.clone()
                            });
                        }
                        SchedulerCommand::Shutdown(done) => {
                            let _ = done.send(());
                            break;
                        }
                    }
                }
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    if let Some(p) = pending.take() {
                        stats.fired_total += 1;
                        if fired.send(TimerFired { generation: p.generation }).is_err() {
                            log::warn!("sync worker gone; stopping timer");
                            break;
                        }
                    }
                }
            }
        }
        log::debug!("sync scheduler terminated");
    });

    handle
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn recv_fire(
        rx: &mut mpsc::UnboundedReceiver<TimerFired>,
        within: Duration,
    ) -> Option<TimerFired> {
        tokio::time::timeout(within, rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn fires_once_then_idle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = start_scheduler(tx);
        handle.arm(Duration::from_millis(30));
        assert!(handle.snapshot().await.unwrap().armed);

        let fired = recv_fire(&mut rx, Duration::from_millis(500)).await;
        assert_eq!(fired, Some(TimerFired { generation: 1 }));

        let status = handle.snapshot().await.unwrap();
        assert!(!status.armed);
        assert_eq!(status.fired_total, 1);
        // One-shot: nothing further without another arm.
        assert!(recv_fire(&mut rx, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn rearm_replaces_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = start_scheduler(tx);
        handle.arm(Duration::from_millis(40));
        handle.arm(Duration::from_millis(40));
        handle.arm(Duration::from_millis(40));

        let status = handle.snapshot().await.unwrap();
        assert!(status.armed);
        assert_eq!(status.armed_total, 3);
        assert_eq!(status.cancelled_total, 2);

        let fired = recv_fire(&mut rx, Duration::from_millis(500)).await;
        assert_eq!(fired, Some(TimerFired { generation: 3 }));
        assert!(recv_fire(&mut rx, Duration::from_millis(150)).await.is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = start_scheduler(tx);
        handle.cancel();
        handle.arm(Duration::from_millis(30));
        handle.cancel();
        handle.cancel();

        let status = handle.snapshot().await.unwrap();
        assert!(!status.armed);
        assert_eq!(status.cancelled_total, 1);
        assert!(recv_fire(&mut rx, Duration::from_millis(120)).await.is_none());
    }

    #[tokio::test]
    async fn zero_delay_disarms() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = start_scheduler(tx);
        handle.arm(Duration::from_millis(30));
        handle.arm(Duration::ZERO);
        assert!(!handle.snapshot().await.unwrap().armed);
        assert!(recv_fire(&mut rx, Duration::from_millis(120)).await.is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_actor() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = start_scheduler(tx);
        handle.shutdown().await;
        assert!(handle.snapshot().await.is_none());
    }
}
