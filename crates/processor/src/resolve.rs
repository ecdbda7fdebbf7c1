//! Drives an [`Outcome`] to a terminal result against a live read-model.
//!
//! Each `Fetch` is answered by one `get_object` call and the matching
//! continuation runs before the next read is issued, so reads within one
//! command happen strictly in the order the rule requested them. The loop is
//! iterative; chain depth is bounded only by what the rule produces.
//!
//! Transport failures are retried per the given [`RetryPolicy`]. With the
//! default policy that means forever, with a fixed delay: an unreachable
//! read-model stalls the command rather than failing it. Cycles are not
//! detected; rules must produce terminating chains.

use tracing::trace;

use cmdproc_infra::{CollaboratorError, ObjectReader, RetryPolicy};
use cmdproc_rules::{Outcome, TerminalOutcome};

pub async fn finalize(
    mut outcome: Outcome,
    reader: &dyn ObjectReader,
    retry: &RetryPolicy,
) -> Result<TerminalOutcome, CollaboratorError> {
    loop {
        let fetch = match outcome.into_terminal() {
            Ok(terminal) => return Ok(terminal),
            Err(fetch) => fetch,
        };

        let object_type = fetch.object_type().clone();
        let object_id = fetch.object_id().to_owned();
        let lookup = retry
            .run("get_object", || reader.get_object(&object_type, &object_id))
            .await?;

        trace!(
            object_type = %object_type,
            object_id = object_id.as_str(),
            ?lookup,
            "read resolved"
        );
        outcome = fetch.resume(lookup.into_option());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cmdproc_infra::{InMemoryReadModel, ObjectLookup};
    use cmdproc_rules::ObjectType;
    use serde_json::{Value as JsonValue, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const ITEM: ObjectType = ObjectType::from_static("item");

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::forever(Duration::from_millis(1))
    }

    /// Fails the first `failures` reads, then delegates.
    struct FlakyReader {
        inner: InMemoryReadModel,
        failures: u32,
        calls: AtomicU32,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectReader for FlakyReader {
        async fn get_object(
            &self,
            object_type: &ObjectType,
            object_id: &str,
        ) -> Result<ObjectLookup, CollaboratorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(CollaboratorError::Transport(format!("refused #{n}")));
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("{object_type}/{object_id}"));
            self.inner.get_object(object_type, object_id).await
        }
    }

    fn flaky(failures: u32) -> FlakyReader {
        FlakyReader {
            inner: InMemoryReadModel::new(),
            failures,
            calls: AtomicU32::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn terminal_outcomes_need_no_reads() {
        let reader = flaky(0);
        let out = finalize(Outcome::failed("nope"), &reader, &fast_retry())
            .await
            .unwrap();

        assert_eq!(out.reason(), Some("nope"));
        assert_eq!(reader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_reads_until_the_read_model_answers() {
        let reader = flaky(3);
        reader.inner.insert(ITEM, "a", json!({"n": 1}));

        let outcome = Outcome::fetch_found(ITEM, "a", |value: JsonValue| {
            Outcome::succeeded([cmdproc_events::Event::new("seen", value)])
        });
        let out = finalize(outcome, &reader, &fast_retry()).await.unwrap();

        assert!(out.is_success());
        assert_eq!(out.events()[0].data(), &json!({"n": 1}));
        assert_eq!(reader.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn chained_reads_run_in_request_order() {
        let reader = flaky(0);
        reader.inner.insert(ITEM, "first", json!({"next": "second"}));

        let outcome = Outcome::fetch_found(ITEM, "first", |value: JsonValue| {
            let next = value["next"].as_str().unwrap_or_default().to_string();
            Outcome::ensure_absent(ITEM, next, "second exists", || {
                Outcome::succeeded([])
            })
        });
        let out = finalize(outcome, &reader, &fast_retry()).await.unwrap();

        assert!(out.is_success());
        assert_eq!(*reader.log.lock().unwrap(), vec!["item/first", "item/second"]);
    }

    #[tokio::test]
    async fn bounded_policy_surfaces_the_error() {
        let reader = flaky(u32::MAX);
        let policy = RetryPolicy::fixed(2, Duration::from_millis(1));

        let err = finalize(Outcome::fetch_found(ITEM, "a", |_| Outcome::succeeded([])), &reader, &policy)
            .await
            .unwrap_err();

        assert!(matches!(err, CollaboratorError::Transport(_)));
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
    }
}
