//! Model Availability
//!
//! Probes every configured model and caches the outcome. Probes run in
//! small concurrent batches with a pause in between so a listing request
//! never fans out into a burst against the provider.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::application::config::ChatConfig;
use crate::domain::upstream::ChatUpstream;

/// Probe outcome for one logical model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAvailability {
    pub name: String,
    pub upstream_id: String,
    pub available: bool,
}

/// Probe outcome for every model, as of `checked_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilitySnapshot {
    pub models: Vec<ModelAvailability>,
    pub checked_at: DateTime<Utc>,
}

struct CachedSnapshot {
    taken_at: Instant,
    snapshot: Arc<AvailabilitySnapshot>,
}

/// Cached model probing
pub struct ModelAvailabilityService<U>
where
    U: ChatUpstream,
{
    upstream: Arc<U>,
    config: Arc<ChatConfig>,
    // Held across a refresh so concurrent callers share one probe round
    cache: Mutex<Option<CachedSnapshot>>,
}

impl<U> ModelAvailabilityService<U>
where
    U: ChatUpstream + Sync,
{
    pub fn new(upstream: Arc<U>, config: Arc<ChatConfig>) -> Self {
        Self {
            upstream,
            config,
            cache: Mutex::new(None),
        }
    }

    /// Cached snapshot, refreshed once older than the configured TTL
    pub async fn snapshot(&self) -> Arc<AvailabilitySnapshot> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.taken_at.elapsed() < self.config.availability_ttl {
                return cached.snapshot.clone();
            }
        }

        let snapshot = Arc::new(self.probe_all().await);
        *cache = Some(CachedSnapshot {
            taken_at: Instant::now(),
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    /// Forget the cached snapshot
    pub async fn reset(&self) {
        *self.cache.lock().await = None;
    }

    async fn probe_all(&self) -> AvailabilitySnapshot {
        let routes = &self.config.models;

        if !self.upstream.is_configured() {
            tracing::info!("Upstream not configured, reporting every model unavailable");
            return AvailabilitySnapshot {
                models: routes
                    .iter()
                    .map(|route| ModelAvailability {
                        name: route.name.clone(),
                        upstream_id: route.upstream_id.clone(),
                        available: false,
                    })
                    .collect(),
                checked_at: Utc::now(),
            };
        }

        let batch_size = self.config.probe_batch_size.max(1);
        let mut models = Vec::with_capacity(routes.len());

        for (index, batch) in routes.chunks(batch_size).enumerate() {
            if index > 0 && !self.config.probe_batch_pause.is_zero() {
                tokio::time::sleep(self.config.probe_batch_pause).await;
            }

            let outcomes = futures::future::join_all(
                batch
                    .iter()
                    .map(|route| self.upstream.probe(&route.upstream_id)),
            )
            .await;

            for (route, outcome) in batch.iter().zip(outcomes) {
                let available = match outcome {
                    Ok(available) => available,
                    Err(e) => {
                        tracing::debug!(model = %route.upstream_id, error = %e, "Model probe errored");
                        false
                    }
                };
                models.push(ModelAvailability {
                    name: route.name.clone(),
                    upstream_id: route.upstream_id.clone(),
                    available,
                });
            }
        }

        let available = models.iter().filter(|m| m.available).count();
        tracing::info!(
            available = available,
            total = models.len(),
            "Model availability refreshed"
        );

        AvailabilitySnapshot {
            models,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::upstream::{UpstreamError, UpstreamRequest, UpstreamStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts probes and tracks the widest concurrent batch
    #[derive(Default)]
    struct ProbeCounter {
        configured: bool,
        probes: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ChatUpstream for ProbeCounter {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn open_stream(
            &self,
            _request: &UpstreamRequest,
        ) -> Result<UpstreamStream, UpstreamError> {
            Err(UpstreamError::Network("unused".into()))
        }

        async fn probe(&self, model: &str) -> Result<bool, UpstreamError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if model.starts_with("anthropic/") {
                return Err(UpstreamError::Network("timeout".into()));
            }
            Ok(!model.starts_with("openai/"))
        }
    }

    fn config() -> Arc<ChatConfig> {
        Arc::new(ChatConfig {
            probe_batch_pause: Duration::ZERO,
            ..ChatConfig::default()
        })
    }

    #[tokio::test]
    async fn test_probes_in_batches_and_caches() {
        let upstream = Arc::new(ProbeCounter {
            configured: true,
            ..Default::default()
        });
        let config = config();
        let service = ModelAvailabilityService::new(upstream.clone(), config.clone());

        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.models.len(), config.models.len());
        assert_eq!(upstream.probes.load(Ordering::SeqCst), config.models.len());
        assert!(upstream.max_in_flight.load(Ordering::SeqCst) <= config.probe_batch_size);

        let gpt = snapshot.models.iter().find(|m| m.name == "gpt-4o").unwrap();
        assert!(!gpt.available);
        let claude = snapshot.models.iter().find(|m| m.name == "claude-3.5-sonnet").unwrap();
        assert!(!claude.available);
        let deepseek = snapshot.models.iter().find(|m| m.name == "deepseek-r1").unwrap();
        assert!(deepseek.available);

        // Second call is served from cache
        let cached = service.snapshot().await;
        assert!(Arc::ptr_eq(&snapshot, &cached));
        assert_eq!(upstream.probes.load(Ordering::SeqCst), config.models.len());

        service.reset().await;
        service.snapshot().await;
        assert_eq!(upstream.probes.load(Ordering::SeqCst), 2 * config.models.len());
    }

    #[tokio::test]
    async fn test_unconfigured_upstream_not_probed() {
        let upstream = Arc::new(ProbeCounter::default());
        let service = ModelAvailabilityService::new(upstream.clone(), config());

        let snapshot = service.snapshot().await;
        assert!(snapshot.models.iter().all(|m| !m.available));
        assert_eq!(upstream.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_ttl() {
        let upstream = Arc::new(ProbeCounter {
            configured: true,
            ..Default::default()
        });
        let config = config();
        let service = ModelAvailabilityService::new(upstream.clone(), config.clone());

        service.snapshot().await;
        tokio::time::advance(config.availability_ttl + Duration::from_secs(1)).await;
        service.snapshot().await;

        assert_eq!(upstream.probes.load(Ordering::SeqCst), 2 * config.models.len());
    }
}
