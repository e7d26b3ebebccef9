use std::time::Duration;

/// How hard to try a provider call across the configured endpoints.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Full passes over the endpoint list.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each pause between rounds.
    pub jitter_max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            // Reads are cheap; keep the worst case well under one poll period.
            rounds: 2,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(2),
            jitter_max_ms: 200,
        }
    }
}

impl Backoff {
    /// Each endpoint once, no pause. Used for broadcasts, which are never repeated against an
    /// endpoint that already answered.
    pub const fn single_pass() -> Self {
        Self {
            rounds: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_max_ms: 0,
        }
    }

    fn pause_after(&self, round: usize) -> Duration {
        let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
        let factor = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let ms = base_ms.saturating_mul(factor).min(max_ms);
        let jitter = if cfg!(test) || self.jitter_max_ms == 0 {
            0
        } else {
            rand::random::<u64>() % self.jitter_max_ms.saturating_add(1)
        };
        Duration::from_millis(ms.saturating_add(jitter))
    }
}

/// Run `op` against each endpoint in order until one succeeds. After a full failed pass, pause
/// with exponential backoff before the next round. The last error is returned, labelled.
pub async fn across_endpoints<T, Fut>(
    endpoints: &[String],
    policy: &Backoff,
    mut op: impl FnMut(&str) -> Fut + Send,
    label: &'static str,
) -> eyre::Result<T>
where
    Fut: std::future::Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("no provider endpoints configured");
    }
    if policy.rounds == 0 {
        eyre::bail!("invalid backoff: rounds=0");
    }

    let mut last_err: Option<eyre::Report> = None;
    for round in 0..policy.rounds {
        for endpoint in endpoints {
            match op(endpoint).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, round, error = %e, "provider call failed");
                    last_err = Some(e);
                }
            }
        }
        if round.saturating_add(1) < policy.rounds {
            tokio::time::sleep(policy.pause_after(round)).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("no attempt made"))
        .wrap_err(label))
}
