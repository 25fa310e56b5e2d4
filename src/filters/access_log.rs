//! Access logging filter.

use std::time::Instant;

use async_trait::async_trait;

use crate::core::Result;
use crate::core::Response;
use crate::filter::{AroundFilter, Continuation, FilterEntry, SHORT_CIRCUITED_BY};
use crate::logging::{log_access, AccessRecord};

/// Writes one JSON access line per request, after the response is known.
///
/// Register it first (lowest order) so it wraps every other filter and
/// sees short-circuits and errors too.
pub struct AccessLog {
    service: String,
}

impl AccessLog {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Entry wrapping every path, ordered before all other filters.
    pub fn entry(service: impl Into<String>) -> FilterEntry {
        FilterEntry::around(Self::new(service))
            .name("access_log")
            .order(i32::MIN)
    }
}

#[async_trait]
impl AroundFilter for AccessLog {
    fn name(&self) -> &'static str {
        "access_log"
    }

    async fn filter(&self, mut cont: Continuation) -> Result<Response> {
        let started = Instant::now();
        let req = cont.request()?;
        let method = req.method().to_string();
        let path = req.path().to_string();
        let query = req.query().map(str::to_string);
        let request_id = req.request_id().unwrap_or("-").to_string();
        let ua = req.user_agent().map(str::to_string);

        let result = cont.proceed_async().await;

        let (status, bytes, short_circuit, error) = match &result {
            Ok(res) => (
                res.status().as_u16(),
                res.body_len(),
                res.attributes().get_str(SHORT_CIRCUITED_BY).map(str::to_string),
                None,
            ),
            Err(e) if e.is_cancelled() => (499, 0, None, Some(e.kind())),
            Err(e) => (500, 0, None, Some(e.kind())),
        };

        log_access(
            &self.service,
            &AccessRecord {
                request_id: &request_id,
                method: &method,
                path: &path,
                query: query.as_deref(),
                status,
                bytes,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                short_circuit: short_circuit.as_deref(),
                error,
                ua: ua.as_deref(),
            },
        );

        result
    }
}
