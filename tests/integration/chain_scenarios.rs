//! Ordering, short-circuit, continuation and cancellation behavior of the chain.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;

use filter_chain::config::ChainConfig;
use filter_chain::filter::PathPattern;
use filter_chain::{
    around_fn, blocking_around_fn, handler_fn, request_fn, response_fn, BlockingHandler,
    BlockingPool, Continuation, ContinuationState, Error, FilterChainExecutor, FilterEntry,
    FilterRegistry, FilterResult, Request, Response, SHORT_CIRCUITED_BY,
};

use crate::helpers::*;

fn traced_around(trace: &Trace, name: &'static str, order: i32) -> FilterEntry {
    let trace = trace.clone();
    FilterEntry::around(around_fn(move |mut cont: Continuation| {
        let trace = trace.clone();
        async move {
            trace.push(format!("{} in", name));
            let res = cont.proceed_async().await;
            trace.push(format!("{} out", name));
            res
        }
    }))
    .name(name)
    .order(order)
}

#[tokio::test]
async fn test_short_circuit_seen_by_entered_around_filter() {
    let trace = Trace::default();
    let seen = trace.clone();

    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around(around_fn(move |mut cont: Continuation| {
                let seen = seen.clone();
                async move {
                    cont.request_mut()?.set_attribute("foo", "bar");
                    let res = cont.proceed_async().await?;
                    seen.push(res.body_str().unwrap_or_default());
                    Ok(res)
                }
            }))
            .name("A")
            .order(0),
        )
        .unwrap()
        .with(
            FilterEntry::request(request_fn(|req: Request| {
                let foo = req.attributes().get_str("foo").unwrap_or("missing");
                Ok(FilterResult::Stop(Response::ok(format!("fixed by B, foo={}", foo))))
            }))
            .name("B")
            .order(1),
        )
        .unwrap();

    let (executor, calls) = executor(registry);
    let res = executor.execute(request("/anything")).await.unwrap();

    assert_eq!(res.body_str(), Some("fixed by B, foo=bar"));
    assert_eq!(res.attributes().get_str(SHORT_CIRCUITED_BY), Some("B"));
    assert_eq!(trace.events(), vec!["fixed by B, foo=bar"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_entry_follows_order_and_unwind_mirrors_it() {
    let trace = Trace::default();
    let request_trace = trace.clone();
    let response_trace = trace.clone();

    // Registered out of order on purpose
    let registry = FilterRegistry::new()
        .with(traced_around(&trace, "Z", 5))
        .unwrap()
        .with(traced_around(&trace, "X", -1))
        .unwrap()
        .with(
            FilterEntry::response(response_fn(move |_req: &Request, res: Response| {
                response_trace.push("P out");
                Ok(res)
            }))
            .name("P")
            .order(4),
        )
        .unwrap()
        .with(
            FilterEntry::request(request_fn(move |req: Request| {
                request_trace.push("R");
                Ok(FilterResult::Next(req))
            }))
            .name("R")
            .order(0),
        )
        .unwrap()
        .with(traced_around(&trace, "Y", 3))
        .unwrap();

    let (executor, calls) = executor(registry);
    assert_eq!(executor.registry().names(), vec!["X", "R", "Y", "P", "Z"]);

    executor.execute(request("/ordered")).await.unwrap();
    assert_eq!(
        trace.events(),
        vec!["X in", "R", "Y in", "Z in", "Z out", "P out", "Y out", "X out"]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_equal_order_keeps_registration_order() {
    let trace = Trace::default();
    let registry = FilterRegistry::new()
        .with(traced_around(&trace, "first", 0))
        .unwrap()
        .with(traced_around(&trace, "second", 0))
        .unwrap();

    let (executor, _) = executor(registry);
    executor.execute(request("/")).await.unwrap();
    assert_eq!(
        trace.events(),
        vec!["first in", "second in", "second out", "first out"]
    );
}

#[tokio::test]
async fn test_short_circuit_skips_later_filters_and_handler() {
    let trace = Trace::default();
    let registry = FilterRegistry::new()
        .with(traced_around(&trace, "outer", 0))
        .unwrap()
        .with(
            FilterEntry::request(request_fn(|_req: Request| {
                Ok(FilterResult::Stop(
                    Response::empty(StatusCode::FORBIDDEN).with_body("denied"),
                ))
            }))
            .name("deny")
            .order(1),
        )
        .unwrap()
        .with(traced_around(&trace, "inner", 2))
        .unwrap();

    let (executor, calls) = executor(registry);
    let res = executor.execute(request("/private")).await.unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(trace.events(), vec!["outer in", "outer out"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_around_without_proceed_short_circuits() {
    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around(around_fn(|_cont: Continuation| async {
                Ok(Response::empty(StatusCode::TOO_MANY_REQUESTS))
            }))
            .name("limit"),
        )
        .unwrap();

    let (executor, calls) = executor(registry);
    let res = executor.execute(request("/")).await.unwrap();

    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.attributes().get_str(SHORT_CIRCUITED_BY), Some("limit"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_response_filter_sees_final_short_circuit_response() {
    let trace = Trace::default();
    let observed = trace.clone();

    let registry = FilterRegistry::new()
        .with(
            FilterEntry::response(response_fn(move |_req: &Request, res: Response| {
                observed.push(format!(
                    "{} {}",
                    res.status().as_u16(),
                    res.attributes().get_str(SHORT_CIRCUITED_BY).unwrap_or("-")
                ));
                Ok(res)
            }))
            .name("observer")
            .order(0),
        )
        .unwrap()
        .with(
            FilterEntry::request(request_fn(|_req: Request| {
                Ok(FilterResult::Stop(Response::empty(StatusCode::UNAUTHORIZED)))
            }))
            .name("auth")
            .order(1),
        )
        .unwrap();

    let (executor, _) = executor(registry);
    executor.execute(request("/")).await.unwrap();
    assert_eq!(trace.events(), vec!["401 auth"]);
}

#[tokio::test]
async fn test_proceed_twice_is_rejected_and_first_call_completes() {
    let trace = Trace::default();
    let seen = trace.clone();

    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around(around_fn(move |mut cont: Continuation| {
                let seen = seen.clone();
                async move {
                    let first = cont.proceed_async();
                    match cont.proceed_async().await {
                        Err(Error::ContinuationReuse { .. }) => seen.push("reuse rejected"),
                        Err(e) => seen.push(format!("unexpected error {}", e)),
                        Ok(_) => seen.push("second proceed ran"),
                    }
                    first.await
                }
            }))
            .name("twice"),
        )
        .unwrap();

    let (executor, calls) = executor(registry);
    let res = executor.execute(request("/once")).await.unwrap();

    assert_eq!(res.body_str(), Some("/once"));
    assert_eq!(trace.events(), vec!["reuse rejected"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mutation_visible_downstream_only() {
    let trace = Trace::default();
    let before = trace.clone();
    let after = trace.clone();

    let registry = FilterRegistry::new()
        .with(
            FilterEntry::request(request_fn(move |req: Request| {
                before.push(format!("before sees tag: {}", req.attributes().contains("tag")));
                Ok(FilterResult::Next(req))
            }))
            .name("before")
            .order(0),
        )
        .unwrap()
        .with(
            FilterEntry::around(around_fn(|mut cont: Continuation| async move {
                cont.request_mut()?.set_attribute("tag", "mutated");
                cont.proceed_async().await
            }))
            .name("mutator")
            .order(1),
        )
        .unwrap()
        .with(
            FilterEntry::request(request_fn(move |req: Request| {
                after.push(format!("after sees tag: {}", req.attributes().contains("tag")));
                Ok(FilterResult::Next(req))
            }))
            .name("after")
            .order(2),
        )
        .unwrap();

    let handler = Arc::new(handler_fn(|req: Request| async move {
        let tag = req.attributes().get_str("tag").unwrap_or("none").to_string();
        Ok(Response::ok(tag))
    }));
    let executor = FilterChainExecutor::new(registry, handler, pool());

    let res = executor.execute(request("/")).await.unwrap();
    assert_eq!(res.body_str(), Some("mutated"));
    assert_eq!(
        trace.events(),
        vec!["before sees tag: false", "after sees tag: true"]
    );
}

#[tokio::test]
async fn test_replace_request_before_proceed() {
    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around(around_fn(|mut cont: Continuation| async move {
                cont.replace_request(request("/rewritten"))?;
                let twice = cont.replace_request(request("/again"));
                assert!(matches!(twice, Err(Error::ContinuationReuse { .. })));
                cont.proceed_async().await
            }))
            .name("rewrite"),
        )
        .unwrap();

    let (executor, _) = executor(registry);
    let res = executor.execute(request("/original")).await.unwrap();
    assert_eq!(res.body_str(), Some("/rewritten"));
}

#[tokio::test]
async fn test_zero_filters_returns_handler_response_unchanged() {
    let handler = Arc::new(handler_fn(|_req: Request| async {
        Ok(Response::empty(StatusCode::CREATED)
            .with_header("x-handler", "yes")
            .with_body("made"))
    }));
    let executor = FilterChainExecutor::new(FilterRegistry::new(), handler, pool());

    let res = executor.execute(request("/items")).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.header("x-handler"), Some("yes"));
    assert_eq!(res.body_str(), Some("made"));
    assert!(!res.attributes().contains(SHORT_CIRCUITED_BY));
}

#[tokio::test]
async fn test_deferred_request_filter() {
    let registry = FilterRegistry::new()
        .with(
            FilterEntry::request(request_fn(|req: Request| {
                Ok(FilterResult::deferred(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if req.path().starts_with("/deny") {
                        Ok(FilterResult::Stop(Response::empty(StatusCode::FORBIDDEN)))
                    } else {
                        Ok(FilterResult::Next(req))
                    }
                }))
            }))
            .name("lookup"),
        )
        .unwrap();

    let (executor, calls) = executor(registry);

    let res = executor.execute(request("/allow")).await.unwrap();
    assert_eq!(res.body_str(), Some("/allow"));

    let res = executor.execute(request("/deny/me")).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_filters_run_off_the_event_loop() {
    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around_blocking(blocking_around_fn(|mut cont: Continuation| {
                let on_runtime = tokio::runtime::Handle::try_current().is_ok();
                let res = cont.proceed()?;
                Ok(res.with_header("x-on-runtime", on_runtime.to_string()))
            }))
            .name("sync_around")
            .order(0),
        )
        .unwrap()
        .with(
            FilterEntry::request(request_fn(|mut req: Request| {
                std::thread::sleep(Duration::from_millis(5));
                req.set_attribute("checked", true);
                Ok(FilterResult::Next(req))
            }))
            .name("sync_check")
            .order(1)
            .blocking(),
        )
        .unwrap();

    let (executor, calls) = executor(registry);
    let res = executor.execute(request("/sync")).await.unwrap();

    assert_eq!(res.body_str(), Some("/sync"));
    assert_eq!(res.header("x-on-runtime"), Some("false"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_blocking_proceed_on_event_loop_is_rejected() {
    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around(around_fn(|mut cont: Continuation| async move {
                cont.proceed()
            }))
            .name("misplaced"),
        )
        .unwrap();

    let (executor, calls) = executor(registry);
    let err = executor.execute(request("/")).await.unwrap_err();

    assert!(matches!(err, Error::BlockingOnEventLoop));
    assert!(err.is_contract_violation());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_reaches_entered_filters() {
    let trace = Trace::default();
    let seen = trace.clone();

    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around(around_fn(move |mut cont: Continuation| {
                let seen = seen.clone();
                async move {
                    assert_eq!(cont.state(), ContinuationState::Created);
                    let result = cont.proceed_async().await;
                    match &result {
                        Err(Error::Cancelled) => seen.push("cancelled"),
                        Err(e) => seen.push(format!("error {}", e)),
                        Ok(res) => seen.push(format!("response {}", res.status())),
                    }
                    result
                }
            }))
            .name("watcher"),
        )
        .unwrap();

    let handler = Arc::new(handler_fn(|_req: Request| async {
        std::future::pending::<()>().await;
        Ok(Response::ok("never"))
    }));
    let executor = Arc::new(FilterChainExecutor::new(registry, handler, pool()));

    let cancel = CancellationToken::new();
    let run = {
        let executor = Arc::clone(&executor);
        let cancel = cancel.clone();
        tokio::spawn(async move { executor.execute_with_cancel(request("/slow"), cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("chain did not stop after cancellation")
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(trace.events(), vec!["cancelled"]);
}

#[tokio::test]
async fn test_request_timeout_cancels_chain() {
    let trace = Trace::default();
    let registry = FilterRegistry::new()
        .with(traced_around(&trace, "outer", 0))
        .unwrap();

    let handler = Arc::new(handler_fn(|_req: Request| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Response::ok("late"))
    }));
    let executor = FilterChainExecutor::new(registry, handler, pool())
        .with_config(ChainConfig::default().with_request_timeout(Duration::from_millis(50)));

    let started = Instant::now();
    let err = executor.execute(request("/slow")).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(trace.events(), vec!["outer in", "outer out"]);
}

fn pending_handler() -> Arc<dyn filter_chain::ResponseProducer> {
    Arc::new(handler_fn(|_req: Request| async {
        std::future::pending::<()>().await;
        Ok(Response::ok("never"))
    }))
}

/// Around filter that keeps working for a while after proceed returns.
fn slow_unwinding_around(trace: &Trace, name: &'static str, order: i32) -> FilterEntry {
    let trace = trace.clone();
    FilterEntry::around(around_fn(move |mut cont: Continuation| {
        let trace = trace.clone();
        async move {
            trace.push(format!("{} in", name));
            let res = cont.proceed_async().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            trace.push(format!("{} out", name));
            res
        }
    }))
    .name(name)
    .order(order)
}

async fn cancel_after(
    executor: Arc<FilterChainExecutor>,
    delay: Duration,
) -> filter_chain::Result<Response> {
    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { executor.execute_with_cancel(request("/slow"), cancel).await })
    };

    tokio::time::sleep(delay).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("chain did not stop after cancellation")
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_unwinds_nested_filters_in_reverse() {
    let trace = Trace::default();
    let registry = FilterRegistry::new()
        .with(traced_around(&trace, "outer", 0))
        .unwrap()
        .with(slow_unwinding_around(&trace, "inner", 1))
        .unwrap();
    let executor = Arc::new(FilterChainExecutor::new(registry, pending_handler(), pool()));

    let result = cancel_after(executor, Duration::from_millis(50)).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    // Complete as soon as the chain returns; nothing unwinds later
    assert_eq!(
        trace.events(),
        vec!["outer in", "inner in", "inner out", "outer out"]
    );
}

#[tokio::test]
async fn test_request_timeout_unwinds_nested_filters_in_reverse() {
    let trace = Trace::default();
    let registry = FilterRegistry::new()
        .with(traced_around(&trace, "outer", 0))
        .unwrap()
        .with(slow_unwinding_around(&trace, "inner", 1))
        .unwrap();
    let executor = FilterChainExecutor::new(registry, pending_handler(), pool())
        .with_config(ChainConfig::default().with_request_timeout(Duration::from_millis(50)));

    let err = executor.execute(request("/slow")).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(
        trace.events(),
        vec!["outer in", "inner in", "inner out", "outer out"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_unwinds_entered_blocking_filter() {
    let trace = Trace::default();
    let seen = trace.clone();
    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around_blocking(blocking_around_fn(move |mut cont: Continuation| {
                seen.push("sync in");
                let res = cont.proceed();
                std::thread::sleep(Duration::from_millis(20));
                match &res {
                    Err(Error::Cancelled) => seen.push("sync out cancelled"),
                    _ => seen.push("sync out"),
                }
                res
            }))
            .name("sync")
            .order(0),
        )
        .unwrap()
        .with(slow_unwinding_around(&trace, "inner", 1))
        .unwrap();
    let executor = Arc::new(FilterChainExecutor::new(registry, pending_handler(), pool()));

    let result = cancel_after(Arc::clone(&executor), Duration::from_millis(50)).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(
        trace.events(),
        vec!["sync in", "inner in", "inner out", "sync out cancelled"]
    );
    assert_eq!(executor.pool().pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_work_inside_blocking_filter_on_one_worker() {
    let one = Arc::new(BlockingPool::with_capacity(1, 16, "it-one").unwrap());
    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around_blocking(blocking_around_fn(|mut cont: Continuation| {
                let res = cont.proceed()?;
                Ok(res.with_header("x-outer", "sync"))
            }))
            .name("outer-sync")
            .order(0),
        )
        .unwrap()
        .with(
            FilterEntry::around_blocking(blocking_around_fn(|mut cont: Continuation| {
                cont.proceed()
            }))
            .name("inner-sync")
            .order(1),
        )
        .unwrap()
        .with(
            FilterEntry::request(request_fn(|mut req: Request| {
                req.set_attribute("thread", current_thread_name());
                Ok(FilterResult::Next(req))
            }))
            .name("tag-thread")
            .order(2)
            .blocking(),
        )
        .unwrap()
        .with(
            FilterEntry::response(response_fn(|_req: &Request, res: Response| {
                Ok(res.with_header("x-response-thread", current_thread_name()))
            }))
            .name("response-thread")
            .order(3)
            .blocking(),
        )
        .unwrap();
    let handler = Arc::new(BlockingHandler::new(Arc::clone(&one), |req: Request| {
        let thread = req.attributes().get_str("thread").unwrap_or_default().to_string();
        Ok(Response::ok(thread))
    }));
    let executor = FilterChainExecutor::new(registry, handler, Arc::clone(&one));

    let res = tokio::time::timeout(Duration::from_secs(5), executor.execute(request("/")))
        .await
        .expect("request waited on a worker it holds")
        .unwrap();

    assert_eq!(res.body_str(), Some("it-one-0"));
    assert_eq!(res.header("x-response-thread"), Some("it-one-0"));
    assert_eq!(res.header("x-outer"), Some("sync"));
}

fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_filter_error_travels_outward() {
    let trace = Trace::default();
    let seen = trace.clone();

    let registry = FilterRegistry::new()
        .with(
            FilterEntry::around(around_fn(move |mut cont: Continuation| {
                let seen = seen.clone();
                async move {
                    match cont.proceed_async().await {
                        Err(e) => {
                            seen.push(e.kind());
                            Ok(Response::empty(StatusCode::BAD_GATEWAY))
                        }
                        ok => ok,
                    }
                }
            }))
            .name("recover")
            .order(0),
        )
        .unwrap()
        .with(
            FilterEntry::request(request_fn(|_req: Request| {
                Err(Error::filter("validate", "missing header"))
            }))
            .name("validate")
            .order(1),
        )
        .unwrap();

    let (executor, calls) = executor(registry);
    let res = executor.execute(request("/")).await.unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(trace.events(), vec!["filter"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_ant_pattern_scenarios() {
    let single = PathPattern::parse("/a/*/c").unwrap();
    assert!(single.matches("/a/b/c"));
    assert!(!single.matches("/a/b/d/c"));

    let rest = PathPattern::parse("/a/**").unwrap();
    assert!(rest.matches("/a"));
    assert!(rest.matches("/a/b"));
    assert!(rest.matches("/a/b/c"));
    assert!(!rest.matches("/ab"));
}

#[test]
fn test_resolve_by_pattern_and_method() {
    let mut registry = FilterRegistry::new();
    registry
        .register(
            FilterEntry::request(request_fn(|req: Request| Ok(FilterResult::Next(req))))
                .name("api_writes")
                .pattern("/api/**")
                .method(Method::POST),
        )
        .unwrap();
    registry
        .register(
            FilterEntry::request(request_fn(|req: Request| Ok(FilterResult::Next(req))))
                .name("everything"),
        )
        .unwrap();
    registry.freeze();

    assert_eq!(
        registry.resolve("/api/items", &Method::POST).names(),
        vec!["api_writes", "everything"]
    );
    assert_eq!(
        registry.resolve("/api/items", &Method::GET).names(),
        vec!["everything"]
    );
    assert_eq!(
        registry.resolve("/other", &Method::POST).names(),
        vec!["everything"]
    );
}

#[test]
fn test_registration_after_freeze_is_rejected() {
    let mut registry = FilterRegistry::new();
    registry
        .register(FilterEntry::request(request_fn(|req: Request| {
            Ok(FilterResult::Next(req))
        })))
        .unwrap();
    registry.freeze();

    let err = registry
        .register(FilterEntry::request(request_fn(|req: Request| {
            Ok(FilterResult::Next(req))
        })))
        .unwrap_err();

    assert!(matches!(err, Error::RegistryFrozen));
    assert_eq!(registry.len(), 1);
}
