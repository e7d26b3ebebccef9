use std::{future::Future, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

/// Fixed-period driver for balance refreshes.
///
/// Each tick is awaited before the next one is scheduled, so refreshes never overlap.
/// Stopping aborts the task, including a tick that is still in flight.
#[derive(Debug, Default)]
pub struct PollingScheduler {
    task: Option<JoinHandle<()>>,
}

impl PollingScheduler {
    pub const fn new() -> Self {
        Self { task: None }
    }

    /// Start ticking every `period`, first tick one period from now. Replaces any running task.
    pub fn start<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.task = Some(tokio::spawn(async move {
            loop {
                interval.tick().await;
                tick().await;
            }
        }));
        tracing::debug!(period_ms = period.as_millis(), "polling started");
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<()> + Send + 'static) {
        let n = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&n);
        (n, move || {
            c.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_fixed_period() {
        let (n, tick) = counter();
        let mut p = PollingScheduler::new();
        p.start(Duration::from_secs(5), tick);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(n.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(10_200)).await;
        assert_eq!(n.load(Ordering::SeqCst), 3);
        assert!(p.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_final() {
        let (n, tick) = counter();
        let mut p = PollingScheduler::new();
        p.start(Duration::from_secs(5), tick);
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        p.stop();
        p.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(n.load(Ordering::SeqCst), 1);
        assert!(!p.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_task() {
        let (n, tick) = counter();
        let (m, tick2) = counter();
        let mut p = PollingScheduler::new();
        p.start(Duration::from_secs(5), tick);
        p.start(Duration::from_secs(5), tick2);
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(n.load(Ordering::SeqCst), 0);
        assert_eq!(m.load(Ordering::SeqCst), 1);
    }
}
