//! Table-driven endpoint fallback.
//!
//! Some gateways expose the same operation under different paths or payload
//! shapes depending on their version. Instead of nesting fallbacks, an adapter
//! lists its candidates as [`EndpointVariant`]s and hands them to
//! [`attempt_variants`], which tries them in order.

use std::future::Future;

use crate::{ErrorKind, ProviderError};

/// One candidate way of calling an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointVariant<S> {
    /// Path template, placeholders written as `{name}`
    pub path: &'static str,
    /// Payload shape the adapter builds for this candidate
    pub shape: S,
}

impl<S> EndpointVariant<S> {
    pub const fn new(path: &'static str, shape: S) -> Self {
        Self { path, shape }
    }
}

/// Substitute `{name}` placeholders in a path template.
#[must_use]
pub fn expand_path(template: &str, params: &[(&str, &str)]) -> String {
    params
        .iter()
        .fold(template.to_string(), |path, (name, value)| {
            path.replace(&format!("{{{name}}}"), value)
        })
}

/// Try each variant until one succeeds.
///
/// Only `Transport` failures move on to the next variant; `Auth`,
/// `Validation` and `RateLimited` are returned straight away because another
/// payload shape cannot fix them. When every variant fails the result is a
/// single `Transport` error for the provider.
pub async fn attempt_variants<S, T, F, Fut>(
    provider: &str,
    variants: &[EndpointVariant<S>],
    mut call: F,
) -> Result<T, ProviderError>
where
    S: Copy,
    F: FnMut(EndpointVariant<S>) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last_error: Option<ProviderError> = None;

    for (index, variant) in variants.iter().copied().enumerate() {
        match call(variant).await {
            Ok(value) => {
                if index > 0 {
                    tracing::debug!(
                        provider,
                        path = variant.path,
                        index,
                        "Endpoint variant succeeded after fallback"
                    );
                }
                return Ok(value);
            }
            Err(error) if error.kind == ErrorKind::Transport => {
                tracing::debug!(
                    provider,
                    path = variant.path,
                    index,
                    error = %error.detail,
                    "Endpoint variant failed, trying next"
                );
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    let detail = last_error.map_or_else(
        || "no endpoint variants configured".to_string(),
        |error| {
            format!(
                "all {} endpoint variants failed, last: {}",
                variants.len(),
                error.detail
            )
        },
    );
    Err(ProviderError::transport(provider, detail))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Shape {
        A,
        B,
        C,
    }

    const VARIANTS: [EndpointVariant<Shape>; 3] = [
        EndpointVariant::new("/v2/{instance}", Shape::A),
        EndpointVariant::new("/v1/{instance}", Shape::B),
        EndpointVariant::new("/legacy", Shape::C),
    ];

    #[test]
    fn test_expand_path() {
        assert_eq!(
            expand_path("/message/sendText/{instance}", &[("instance", "shop")]),
            "/message/sendText/shop"
        );
        assert_eq!(expand_path("/static", &[("instance", "shop")]), "/static");
    }

    #[tokio::test]
    async fn test_falls_through_transport_failures() {
        let tried = Arc::new(Mutex::new(Vec::new()));
        let result = attempt_variants("gw", &VARIANTS, |variant| {
            let tried = Arc::clone(&tried);
            async move {
                tried.lock().unwrap().push(variant.shape);
                if variant.shape == Shape::C {
                    Ok("id-1")
                } else {
                    Err(ProviderError::transport("gw", "404 Not Found"))
                }
            }
        })
        .await;

        assert_eq!(result, Ok("id-1"));
        assert_eq!(*tried.lock().unwrap(), vec![Shape::A, Shape::B, Shape::C]);
    }

    #[tokio::test]
    async fn test_stops_on_terminal_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<(), _> = attempt_variants("gw", &VARIANTS, |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::auth("gw", "401 Unauthorized"))
            }
        })
        .await;

        assert_eq!(result.map_err(|e| e.kind), Err(ErrorKind::Auth));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stops_on_rate_limit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<(), _> = attempt_variants("gw", &VARIANTS, |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::rate_limited("gw", "slow down", None))
            }
        })
        .await;

        assert_eq!(result.map_err(|e| e.kind), Err(ErrorKind::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_transport() {
        let result: Result<(), _> = attempt_variants("gw", &VARIANTS, |_| async {
            Err(ProviderError::transport("gw", "connection refused"))
        })
        .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Transport);
        assert_eq!(
            error.detail,
            "all 3 endpoint variants failed, last: connection refused"
        );
    }

    #[tokio::test]
    async fn test_empty_variant_list() {
        let result: Result<(), _> =
            attempt_variants::<Shape, _, _, _>("gw", &[], |_| async { Ok(()) }).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::Transport);
    }
}
