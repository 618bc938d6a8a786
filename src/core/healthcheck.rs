use std::{panic::AssertUnwindSafe, sync::Arc};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use eyre::Result;
use futures_util::FutureExt;
use http::StatusCode;

use crate::{
    core::{
        context::RequestContext, invoker::panic_message, request::HttpRequest,
        response::HttpResponse,
    },
    ports::{endpoint::Handler, health_probe::HealthProbe},
};

/// Ordered set of health probes shared by the healthcheck route.
///
/// Probes may be added while serving; readers take a lock-free snapshot.
#[derive(Default)]
pub struct HealthRegistry {
    probes: ArcSwap<Vec<Arc<dyn HealthProbe>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, probe: Arc<dyn HealthProbe>) {
        self.probes.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(probe.clone());
            next
        });
    }

    pub fn len(&self) -> usize {
        self.probes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the probes in registration order, stopping at the first failure.
    /// A probe that errors or panics counts as a failure.
    pub async fn is_healthy(&self) -> bool {
        let probes = self.probes.load_full();
        for (index, probe) in probes.iter().enumerate() {
            match AssertUnwindSafe(probe.check()).catch_unwind().await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    tracing::debug!(probe = index, "Health probe reported unhealthy");
                    return false;
                }
                Ok(Err(e)) => {
                    tracing::warn!(probe = index, "Health probe failed: {:#}", e);
                    return false;
                }
                Err(panic) => {
                    tracing::error!(
                        probe = index,
                        "Health probe panicked: {}",
                        panic_message(panic.as_ref())
                    );
                    return false;
                }
            }
        }
        true
    }
}

/// Terminal handler for the reserved healthcheck route.
pub struct HealthcheckEndpoint {
    registry: Arc<HealthRegistry>,
    good: StatusCode,
    bad: StatusCode,
}

impl HealthcheckEndpoint {
    pub fn new(registry: Arc<HealthRegistry>, good: StatusCode, bad: StatusCode) -> Self {
        Self {
            registry,
            good,
            bad,
        }
    }
}

#[async_trait]
impl Handler for HealthcheckEndpoint {
    async fn call(
        &self,
        _req: &mut HttpRequest,
        res: &mut HttpResponse,
        _ctx: &mut RequestContext,
    ) -> Result<()> {
        let status = if self.registry.is_healthy().await {
            self.good
        } else {
            self.bad
        };
        res.set_status(status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Fixed {
        healthy: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HealthProbe for Fixed {
        async fn check(&self) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.healthy)
        }
    }

    struct Broken;

    #[async_trait]
    impl HealthProbe for Broken {
        async fn check(&self) -> Result<bool> {
            Err(eyre::eyre!("database unreachable"))
        }
    }

    struct Exploding;

    #[async_trait]
    impl HealthProbe for Exploding {
        async fn check(&self) -> Result<bool> {
            panic!("connection pool poisoned")
        }
    }

    fn registry(results: &[bool]) -> (HealthRegistry, Vec<Arc<AtomicUsize>>) {
        let registry = HealthRegistry::new();
        let counters: Vec<_> = results
            .iter()
            .map(|&healthy| {
                let calls = Arc::new(AtomicUsize::new(0));
                registry.register(Arc::new(Fixed {
                    healthy,
                    calls: calls.clone(),
                }));
                calls
            })
            .collect();
        (registry, counters)
    }

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        assert!(HealthRegistry::new().is_healthy().await);
    }

    #[tokio::test]
    async fn test_all_passing_is_healthy() {
        let (registry, counters) = registry(&[true, true]);
        assert!(registry.is_healthy().await);
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[tokio::test]
    async fn test_first_failure_short_circuits() {
        let (registry, counters) = registry(&[true, false, true]);
        assert!(!registry.is_healthy().await);
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
        assert_eq!(counters[2].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_error_is_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(Arc::new(Broken));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_healthy().await);
    }

    #[tokio::test]
    async fn test_panicking_check_is_unhealthy() {
        let (registry, counters) = registry(&[true]);
        registry.register(Arc::new(Exploding));
        assert!(!registry.is_healthy().await);
        assert_eq!(counters[0].load(Ordering::SeqCst), 1);

        let endpoint = HealthcheckEndpoint::new(
            Arc::new(registry),
            StatusCode::OK,
            StatusCode::SERVICE_UNAVAILABLE,
        );
        let (parts, body) = http::Request::new(axum::body::Body::empty()).into_parts();
        let mut req = HttpRequest::from_parts(parts, body);
        let mut res = HttpResponse::new();
        let mut ctx = RequestContext::new(
            url::Url::parse("http://localhost/healthcheck").unwrap(),
            Default::default(),
        );
        endpoint.call(&mut req, &mut res, &mut ctx).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
