//! Ordered fallback lookups: the first source yielding a non-empty list wins.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

pub type Lookup<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<Vec<T>>> + Send + 'a>>;

/// Awaits `lookups` in order and returns the first non-empty result.
///
/// Later lookups are never polled once one succeeds. A failing lookup
/// is logged and skipped; if nothing non-empty is found and some lookup
/// failed, the last failure is returned instead of an empty list.
pub async fn first_non_empty<T>(lookups: Vec<(&'static str, Lookup<'_, T>)>) -> anyhow::Result<Vec<T>> {
    let mut last_err = None;

    for (name, lookup) in lookups {
        match lookup.await {
            Ok(found) if !found.is_empty() => {
                debug!(source = name, count = found.len(), "lookup resolved");
                return Ok(found);
            }
            Ok(_) => debug!(source = name, "lookup empty; falling back"),
            Err(e) => {
                warn!(source = name, error = %e, "lookup failed; falling back");
                last_err = Some(e.context(format!("lookup `{name}` failed")));
            }
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ready<'a>(v: anyhow::Result<Vec<u32>>) -> Lookup<'a, u32> {
        Box::pin(async move { v })
    }

    #[tokio::test]
    async fn first_non_empty_wins_and_later_are_not_polled() {
        let polled = Arc::new(AtomicBool::new(false));
        let flag = polled.clone();

        let out = first_non_empty(vec![
            ("empty", ready(Ok(vec![]))),
            ("primary", ready(Ok(vec![1, 2]))),
            (
                "never",
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(vec![9])
                }),
            ),
        ])
        .await
        .unwrap();

        assert_eq!(out, vec![1, 2]);
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failure_falls_through_to_next_source() {
        let out = first_non_empty(vec![
            ("db", ready(Err(anyhow::anyhow!("locked")))),
            ("env", ready(Ok(vec![3]))),
        ])
        .await
        .unwrap();
        assert_eq!(out, vec![3]);
    }

    #[tokio::test]
    async fn all_empty_is_empty_but_failure_is_reported() {
        let out = first_non_empty(vec![("a", ready(Ok(vec![]))), ("b", ready(Ok(vec![])))])
            .await
            .unwrap();
        assert!(out.is_empty());

        let err = first_non_empty(vec![
            ("db", ready(Err(anyhow::anyhow!("gone")))),
            ("env", ready(Ok(vec![]))),
        ])
        .await
        .unwrap_err();
        assert!(err.to_string().contains("db"));
    }
}
