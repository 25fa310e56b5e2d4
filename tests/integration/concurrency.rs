//! Concurrent requests through one executor stay isolated.

use std::sync::Arc;
use std::time::Duration;

use filter_chain::{
    around_fn, blocking_around_fn, handler_fn, request_fn, Continuation, ContinuationState, Error,
    FilterChainExecutor, FilterEntry, FilterRegistry, FilterResult, Request, Response,
};

use crate::helpers::*;

fn tagged_request(id: usize) -> Request {
    let mut req = request(&format!("/item/{}", id));
    req.headers_mut()
        .insert("x-id", id.to_string().parse().unwrap());
    req
}

fn isolation_registry() -> FilterRegistry {
    FilterRegistry::new()
        .with(
            FilterEntry::request(request_fn(|mut req: Request| {
                let id = req.header("x-id").unwrap_or_default().to_string();
                req.set_attribute("id", id);
                Ok(FilterResult::Next(req))
            }))
            .name("tag")
            .pattern("/item/*")
            .order(0),
        )
        .unwrap()
        .with(
            FilterEntry::around(around_fn(|mut cont: Continuation| async move {
                if cont.state() != ContinuationState::Created {
                    return Err(Error::filter("check", "continuation already used"));
                }
                let id = cont
                    .request()?
                    .attributes()
                    .get_str("id")
                    .unwrap_or_default()
                    .to_string();
                tokio::task::yield_now().await;

                let res = cont.proceed_async().await?;
                if res.body_str() != Some(id.as_str()) {
                    return Err(Error::filter("check", "response crossed requests"));
                }
                Ok(res)
            }))
            .name("check")
            .order(1),
        )
        .unwrap()
}

fn attribute_echo() -> Arc<dyn filter_chain::ResponseProducer> {
    Arc::new(handler_fn(|req: Request| async move {
        tokio::time::sleep(Duration::from_millis(1)).await;
        let id = req.attributes().get_str("id").unwrap_or_default().to_string();
        Ok(Response::ok(id))
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_isolated() {
    let executor = Arc::new(FilterChainExecutor::new(
        isolation_registry(),
        attribute_echo(),
        pool(),
    ));

    let tasks: Vec<_> = (0..64)
        .map(|id| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { (id, executor.execute(tagged_request(id)).await) })
        })
        .collect();

    for task in tasks {
        let (id, result) = task.await.unwrap();
        let res = result.unwrap();
        assert_eq!(res.body_str(), Some(id.to_string().as_str()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_blocking_filters_are_isolated() {
    let registry = isolation_registry()
        .with(
            FilterEntry::around_blocking(blocking_around_fn(|mut cont: Continuation| {
                let id = cont.request()?.header("x-id").unwrap_or_default().to_string();
                let res = cont.proceed()?;
                Ok(res.with_header("x-seen-by-blocking", id))
            }))
            .name("sync")
            .order(2),
        )
        .unwrap();
    let executor = Arc::new(FilterChainExecutor::new(registry, attribute_echo(), pool()));

    let tasks: Vec<_> = (0..16)
        .map(|id| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { (id, executor.execute(tagged_request(id)).await) })
        })
        .collect();

    for task in tasks {
        let (id, result) = task.await.unwrap();
        let res = result.unwrap();
        let expected = id.to_string();
        assert_eq!(res.body_str(), Some(expected.as_str()));
        assert_eq!(res.header("x-seen-by-blocking"), Some(expected.as_str()));
    }
}
