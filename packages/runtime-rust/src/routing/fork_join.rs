//! Bounded fan-out/fan-in over a set of routes.
//!
//! [`ForkJoinStrategy`] runs every [`RoutingPair`] as a task on a
//! [`JoinSet`], gated by a semaphore shared by all executions of the
//! strategy. Outcomes are collected by sequence, failures are either
//! gathered (`delay_errors`) or fail fast, and a deadline turns every pair
//! still pending into a [`RouteFailure::TimedOut`]. A route task that panics
//! is reported as an execution failure of its own sequence.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use gather_core::{merge_variables, Message};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::config::ForkJoinConfig;
use super::error::{CompositeRoutingError, ForkJoinError};
use super::merger::{CollectList, CollectMap, ResultMerger};
use super::outcome::{RouteFailure, RouteOutcome};
use super::pair::RoutingPair;
use super::route::{Route, RouteError};

/// Executes a fan-out and merges its results into one message.
pub struct ForkJoinStrategy {
    config: ForkJoinConfig,
    merger: Arc<dyn ResultMerger>,
    permits: Arc<Semaphore>,
}

impl ForkJoinStrategy {
    /// Creates a strategy merging with `merger`.
    ///
    /// # Errors
    ///
    /// Returns [`ForkJoinError::InvalidConfig`] if `max_concurrency` is 0.
    pub fn new(
        config: ForkJoinConfig,
        merger: impl ResultMerger + 'static,
    ) -> Result<Self, ForkJoinError> {
        if config.max_concurrency == 0 {
            return Err(ForkJoinError::InvalidConfig {
                reason: "max_concurrency must be at least 1".to_string(),
            });
        }
        let permits = Arc::new(Semaphore::new(
            config.max_concurrency.min(Semaphore::MAX_PERMITS),
        ));
        Ok(Self {
            config,
            merger: Arc::new(merger),
            permits,
        })
    }

    /// Strategy producing a sequence-ordered list of results.
    ///
    /// # Errors
    ///
    /// See [`ForkJoinStrategy::new`].
    pub fn collect_list(config: ForkJoinConfig) -> Result<Self, ForkJoinError> {
        Self::new(config, CollectList)
    }

    /// Strategy producing results keyed by sequence.
    ///
    /// # Errors
    ///
    /// See [`ForkJoinStrategy::new`].
    pub fn collect_map(config: ForkJoinConfig) -> Result<Self, ForkJoinError> {
        Self::new(config, CollectMap)
    }

    #[must_use]
    pub fn config(&self) -> &ForkJoinConfig {
        &self.config
    }

    /// Sends a copy of `message` to every route and merges the results.
    ///
    /// # Errors
    ///
    /// Returns [`ForkJoinError::Composite`] when routes failed or timed out
    /// (and partial failure is not tolerated), [`ForkJoinError::Merge`] if
    /// the merger rejects the results, or [`ForkJoinError::InvalidConfig`]
    /// if two pairs share a sequence.
    pub async fn execute(
        &self,
        message: &Message,
        routes: &[Arc<dyn Route>],
    ) -> Result<Message, ForkJoinError> {
        self.execute_pairs(message, RoutingPair::for_routes(message, routes))
            .await
    }

    /// Executes prepared pairs, e.g. from [`RoutingPair::split`].
    ///
    /// The outgoing message derives from `original`; result variables are
    /// layered over it last-wins in sequence order.
    ///
    /// # Errors
    ///
    /// Same as [`ForkJoinStrategy::execute`].
    pub async fn execute_pairs(
        &self,
        original: &Message,
        pairs: Vec<RoutingPair>,
    ) -> Result<Message, ForkJoinError> {
        let routes = pairs.len();
        let span = info_span!(
            "fork_join",
            routes = routes,
            max_concurrency = self.config.max_concurrency,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = self.join(original, pairs).await;

            let outcome = match &result {
                Ok(_) => "ok",
                Err(_) => "error",
            };
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);
            tracing::info!(routes, duration_ms, outcome, "fork-join complete");

            result
        }
        .instrument(span)
        .await
    }

    async fn join(
        &self,
        original: &Message,
        pairs: Vec<RoutingPair>,
    ) -> Result<Message, ForkJoinError> {
        let total = pairs.len();
        let mut results = BTreeMap::new();
        let mut failures = BTreeMap::new();

        for (sequence, outcome) in self.dispatch(pairs).await? {
            match outcome.result {
                Ok(message) => {
                    results.insert(sequence, message);
                }
                Err(failure) => {
                    metrics::counter!("gather_route_failures_total", "kind" => failure.kind())
                        .increment(1);
                    warn!(sequence, route = %failure.route(), error = %failure, "route failed");
                    failures.insert(sequence, failure);
                }
            }
        }

        let tolerated = self.config.tolerate_partial_failure
            && self.config.delay_errors
            && !results.is_empty();
        if !failures.is_empty() && !tolerated {
            return Err(CompositeRoutingError { total, failures }.into());
        }

        let payload = self.merger.merge(&results, original)?;
        let mut merged = original.derive(payload);
        merge_variables(&mut merged.variables, results.values().map(|m| &m.variables));
        Ok(merged)
    }

    /// Runs every pair and returns the outcomes keyed by sequence.
    ///
    /// Under fail-fast, pairs cut short by the first failure report nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ForkJoinError::InvalidConfig`] if two pairs share a
    /// sequence. Nothing is spawned in that case.
    pub async fn dispatch(
        &self,
        pairs: Vec<RoutingPair>,
    ) -> Result<BTreeMap<usize, RouteOutcome>, ForkJoinError> {
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = pairs.iter().map(|p| p.sequence).find(|s| !seen.insert(*s)) {
            return Err(ForkJoinError::InvalidConfig {
                reason: format!("duplicate routing sequence {duplicate}"),
            });
        }

        let cancel = CancellationToken::new();
        let deadline = self.config.timeout.map(|timeout| Instant::now() + timeout);
        let mut pending: BTreeMap<usize, String> = BTreeMap::new();
        let mut sequences: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut outcomes = BTreeMap::new();
        let mut tasks = JoinSet::new();

        for RoutingPair {
            sequence,
            route,
            message,
        } in pairs
        {
            pending.insert(sequence, route.name().to_string());
            let permits = Arc::clone(&self.permits);
            let token = cancel.child_token();
            let task = tasks.spawn(async move {
                let result = run_pair(route, message, permits, token).await;
                (sequence, result)
            });
            sequences.insert(task.id(), sequence);
        }

        let delay_errors = self.config.delay_errors;
        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                let (sequence, result) = match joined {
                    Ok(finished) => finished,
                    Err(err) if err.is_cancelled() => continue,
                    Err(err) => match sequences.get(&err.id()) {
                        Some(&sequence) => {
                            warn!(sequence, error = %err, "route task panicked");
                            let error = RouteError::Internal(anyhow::anyhow!("route task panicked: {err}"));
                            (sequence, Err(error))
                        }
                        None => {
                            warn!(error = %err, "unknown route task panicked");
                            continue;
                        }
                    },
                };
                let Some(route) = pending.remove(&sequence) else {
                    continue;
                };
                let failed = result.is_err();
                debug!(sequence, route = %route, failed, "route finished");
                let result = result.map_err(|error| RouteFailure::Execution {
                    route: route.clone(),
                    error,
                });
                outcomes.insert(
                    sequence,
                    RouteOutcome {
                        sequence,
                        route,
                        result,
                    },
                );
                if failed && !delay_errors {
                    return true;
                }
            }
            false
        };

        let (timed_out, failed_fast) = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, drain).await {
                Ok(failed_fast) => (false, failed_fast),
                Err(_) => (true, false),
            },
            None => (false, drain.await),
        };

        cancel.cancel();
        tasks.shutdown().await;

        if failed_fast {
            return Ok(outcomes);
        }
        for (sequence, route) in pending {
            let failure = match self.config.timeout {
                Some(timeout) if timed_out => RouteFailure::TimedOut {
                    route: route.clone(),
                    timeout,
                },
                _ => RouteFailure::Execution {
                    route: route.clone(),
                    error: RouteError::Internal(anyhow::anyhow!("route task panicked")),
                },
            };
            outcomes.insert(
                sequence,
                RouteOutcome {
                    sequence,
                    route,
                    result: Err(failure),
                },
            );
        }
        Ok(outcomes)
    }
}

/// Waits for a permit, then runs the route until it finishes or `cancel`
/// fires. The result is stamped with the pair's group correlation.
async fn run_pair(
    route: Arc<dyn Route>,
    message: Message,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) -> Result<Message, RouteError> {
    let _permit = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(RouteError::Cancelled),
        permit = permits.acquire_owned() => permit.map_err(|e| RouteError::Internal(e.into()))?,
    };

    let stamp = message.group_correlation;
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RouteError::Cancelled),
        result = route.process(message, cancel.clone()) => result,
    };
    result.map(|out| match stamp {
        Some(gc) => out.with_group_correlation(gc),
        None => out,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use gather_core::{Payload, Value};

    use super::*;
    use crate::routing::route::route_fn;

    fn upper(name: &str) -> Arc<dyn Route> {
        route_fn(name, |msg: Message, _cancel| async move {
            let text = msg.payload_text().unwrap_or_default().to_uppercase();
            Ok(msg.derive(text))
        })
    }

    fn failing(name: &str) -> Arc<dyn Route> {
        route_fn(name, |_msg: Message, _cancel| async move {
            Err(RouteError::failed("downstream rejected"))
        })
    }

    fn sleeper(name: &str, millis: u64, var: &'static str) -> Arc<dyn Route> {
        route_fn(name, move |msg: Message, _cancel| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(msg.derive(var).with_variable("winner", var))
        })
    }

    fn panicking(name: &str) -> Arc<dyn Route> {
        route_fn(name, |msg: Message, _cancel| async move {
            if msg.payload_text().is_some() {
                panic!("route exploded");
            }
            Ok(msg)
        })
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = ForkJoinConfig {
            max_concurrency: 0,
            ..ForkJoinConfig::default()
        };
        assert!(matches!(
            ForkJoinStrategy::collect_list(config),
            Err(ForkJoinError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn collect_list_in_sequence_order() {
        let strategy = ForkJoinStrategy::collect_list(ForkJoinConfig::default()).unwrap();
        let routes = vec![upper("a"), upper("b")];
        let inbound = Message::new("hi").with_correlation_id("req-1");

        let out = strategy.execute(&inbound, &routes).await.unwrap();
        assert_eq!(out.correlation_id, "req-1");
        let Payload::Messages(list) = out.payload else {
            panic!("expected a list");
        };
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|m| m.payload_text().as_deref() == Some("HI")));
        let sequences: Vec<_> = list
            .iter()
            .map(|m| m.group_correlation.unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1]);
    }

    #[tokio::test]
    async fn collect_map_keys_by_sequence() {
        let strategy = ForkJoinStrategy::collect_map(ForkJoinConfig::default()).unwrap();
        let routes = vec![upper("a"), upper("b"), upper("c")];

        let out = strategy.execute(&Message::new("x"), &routes).await.unwrap();
        let Payload::MessageMap(map) = out.payload else {
            panic!("expected a map");
        };
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), vec!["0", "1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let routes: Vec<Arc<dyn Route>> = (0..5)
            .map(|i| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                route_fn(format!("slow-{i}"), move |msg: Message, _cancel| {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(msg)
                    }
                })
            })
            .collect();

        let strategy = ForkJoinStrategy::collect_list(ForkJoinConfig {
            max_concurrency: 2,
            ..ForkJoinConfig::default()
        })
        .unwrap();
        let out = strategy.execute(&Message::new("x"), &routes).await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert!(matches!(out.payload, Payload::Messages(ref list) if list.len() == 5));
    }

    #[tokio::test(start_paused = true)]
    async fn single_permit_runs_routes_in_sequence_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let routes: Vec<Arc<dyn Route>> = (0..3)
            .map(|i| {
                let log = Arc::clone(&log);
                route_fn(format!("step-{i}"), move |msg: Message, _cancel| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().push(format!("start-{i}"));
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        log.lock().push(format!("end-{i}"));
                        Ok(msg)
                    }
                })
            })
            .collect();
        let strategy = ForkJoinStrategy::collect_list(ForkJoinConfig {
            max_concurrency: 1,
            ..ForkJoinConfig::default()
        })
        .unwrap();

        strategy.execute(&Message::new("x"), &routes).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["start-0", "end-0", "start-1", "end-1", "start-2", "end-2"]
        );
    }

    #[tokio::test]
    async fn delayed_errors_collect_exactly_the_failure() {
        let strategy = ForkJoinStrategy::collect_list(ForkJoinConfig::default()).unwrap();
        let routes = vec![upper("a"), failing("b"), upper("c")];

        let err = strategy
            .execute(&Message::new("x"), &routes)
            .await
            .unwrap_err();
        let ForkJoinError::Composite(composite) = err else {
            panic!("expected composite error");
        };
        assert_eq!(composite.total, 3);
        assert_eq!(composite.failures.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert!(matches!(
            composite.failure(1),
            Some(RouteFailure::Execution { route, error: RouteError::Failed { .. } }) if route == "b"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn variables_merge_last_wins_by_sequence() {
        let strategy = ForkJoinStrategy::collect_list(ForkJoinConfig::default()).unwrap();
        // Sequence 0 finishes last, sequence 1 still wins.
        let routes = vec![sleeper("slow", 100, "zero"), sleeper("fast", 1, "one")];
        let inbound = Message::new("x")
            .with_variable("winner", "original")
            .with_variable("kept", true);

        let out = strategy.execute(&inbound, &routes).await.unwrap();
        assert_eq!(out.variables.get("winner"), Some(&Value::from("one")));
        assert_eq!(out.variables.get("kept"), Some(&Value::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_pending_routes_into_timeouts() {
        let strategy = ForkJoinStrategy::collect_list(ForkJoinConfig {
            timeout: Some(Duration::from_millis(100)),
            ..ForkJoinConfig::default()
        })
        .unwrap();
        let routes = vec![upper("quick"), sleeper("stuck", 10_000, "late")];

        let err = strategy
            .execute(&Message::new("x"), &routes)
            .await
            .unwrap_err();
        let ForkJoinError::Composite(composite) = err else {
            panic!("expected composite error");
        };
        assert!(composite.failure(0).is_none());
        assert_eq!(composite.timed_out().collect::<Vec<_>>(), vec![1]);
        assert!(matches!(
            composite.failure(1),
            Some(RouteFailure::TimedOut { timeout, .. }) if *timeout == Duration::from_millis(100)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_route_is_an_execution_failure_not_a_timeout() {
        let strategy = ForkJoinStrategy::collect_list(ForkJoinConfig {
            timeout: Some(Duration::from_millis(100)),
            ..ForkJoinConfig::default()
        })
        .unwrap();
        let routes = vec![upper("ok"), panicking("boom"), sleeper("stuck", 10_000, "late")];

        let err = strategy
            .execute(&Message::new("x"), &routes)
            .await
            .unwrap_err();
        let ForkJoinError::Composite(composite) = err else {
            panic!("expected composite error");
        };
        assert!(composite.failure(0).is_none());
        assert!(matches!(
            composite.failure(1),
            Some(RouteFailure::Execution { route, error: RouteError::Internal(_) }) if route == "boom"
        ));
        assert_eq!(composite.timed_out().collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn duplicate_sequences_are_rejected() {
        let strategy = ForkJoinStrategy::collect_map(ForkJoinConfig::default()).unwrap();
        let inbound = Message::new("x");
        let mut pairs = RoutingPair::for_routes(&inbound, &[upper("a"), upper("b")]);
        pairs[1].sequence = 0;

        let err = strategy.execute_pairs(&inbound, pairs).await.unwrap_err();
        assert!(matches!(
            err,
            ForkJoinError::InvalidConfig { ref reason } if reason == "duplicate routing sequence 0"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_skips_remaining_routes() {
        let started = Arc::new(AtomicUsize::new(0));
        let counted = {
            let started = Arc::clone(&started);
            route_fn("counted", move |msg: Message, _cancel| {
                started.fetch_add(1, Ordering::SeqCst);
                async move { Ok(msg) }
            })
        };
        let strategy = ForkJoinStrategy::collect_list(ForkJoinConfig {
            max_concurrency: 1,
            delay_errors: false,
            ..ForkJoinConfig::default()
        })
        .unwrap();
        let routes = vec![failing("first"), sleeper("blocker", 1_000, "b"), counted];

        let err = strategy
            .execute(&Message::new("x"), &routes)
            .await
            .unwrap_err();
        let ForkJoinError::Composite(composite) = err else {
            panic!("expected composite error");
        };
        assert_eq!(composite.failures.keys().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tolerated_partial_failure_merges_successes() {
        let config = ForkJoinConfig {
            tolerate_partial_failure: true,
            ..ForkJoinConfig::default()
        };
        let strategy = ForkJoinStrategy::collect_map(config.clone()).unwrap();
        let out = strategy
            .execute(&Message::new("x"), &[upper("a"), failing("b")])
            .await
            .unwrap();
        let Payload::MessageMap(map) = out.payload else {
            panic!("expected a map");
        };
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), vec!["0"]);

        // Nothing succeeded: still a composite error.
        let strategy = ForkJoinStrategy::collect_map(config).unwrap();
        let err = strategy
            .execute(&Message::new("x"), &[failing("a"), failing("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, ForkJoinError::Composite(ref c) if c.failures.len() == 2));
    }

    #[tokio::test]
    async fn split_pairs_and_custom_merger() {
        let concat = |results: &BTreeMap<usize, Message>, _original: &Message| {
            let joined: Vec<String> = results.values().filter_map(Message::payload_text).collect();
            Ok::<_, crate::routing::merger::MergeError>(Payload::from(joined.join("+")))
        };
        let strategy = ForkJoinStrategy::new(ForkJoinConfig::default(), concat).unwrap();
        let inbound = Message::new(Value::Array(vec![
            Value::from("a"),
            Value::from("b"),
            Value::from("c"),
        ]));

        let pairs = RoutingPair::split(&upper("upper"), &inbound);
        let out = strategy.execute_pairs(&inbound, pairs).await.unwrap();
        assert_eq!(out.payload_text().as_deref(), Some("A+B+C"));
    }

    #[tokio::test]
    async fn no_routes_merges_empty() {
        let strategy = ForkJoinStrategy::collect_list(ForkJoinConfig::default()).unwrap();
        let out = strategy.execute(&Message::new("x"), &[]).await.unwrap();
        assert_eq!(out.payload, Payload::Messages(Vec::new()));
    }
}
