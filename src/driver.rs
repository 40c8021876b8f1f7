//! The request driver: the only component that performs I/O.
//!
//! One dispatch turns a prepared request into a completed round trip
//! against the cluster, looping over nodes supplied by the per-query
//! selector. Each attempt is budgeted by two independent timers: the
//! connect timeout covers fetch start until OK headers, the read timeout
//! covers OK headers until the body is fully consumed. Redirects are
//! handled manually so they can be charged to the selector's budget.
//!
//! Cleanup relies on drop order: abandoning the send future aborts the
//! in-flight request, and dropping a `Response` releases its connection,
//! so every early `return`/`continue` leaves no timer or socket behind.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Method, Response};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    events::{Event, LogSettings},
    selector::{base_url, is_redirect_status, Failure, NodeSelector},
    wire::ExecuteResponse,
    Result, RqliteError,
};

/// A fully prepared request, independent of which node serves it.
pub(crate) struct RequestPlan {
    pub method: Method,
    pub path: String,
    /// Encoded query string without the leading `?`; may be empty.
    pub query: String,
    /// Serialized JSON body for POST requests.
    pub body: Option<String>,
    pub start_event: Event,
    pub response_event: Event,
}

impl RequestPlan {
    fn url_for(&self, node: &Url) -> Url {
        let mut url = node.clone();
        url.set_path(&self.path);
        url.set_query((!self.query.is_empty()).then_some(self.query.as_str()));
        url
    }
}

/// How a response body consumer failed.
pub(crate) enum ConsumeError {
    /// Transport-level problem; feed the selector and try the next node.
    Retry(Failure),
    /// Surfaced to the caller as-is, no further attempts.
    Fatal(RqliteError),
}

/// Consumes the body of an OK response. Invoked once per successful
/// header exchange; a retried attempt gets a fresh response.
#[async_trait]
pub(crate) trait ResponseConsumer: Send {
    type Output: Send;

    async fn consume(&mut self, response: Response) -> std::result::Result<Self::Output, ConsumeError>;
}

/// Parses the response body as a query/execute JSON envelope.
pub(crate) struct JsonConsumer;

#[async_trait]
impl ResponseConsumer for JsonConsumer {
    type Output = ExecuteResponse;

    async fn consume(
        &mut self,
        response: Response,
    ) -> std::result::Result<ExecuteResponse, ConsumeError> {
        let body = response
            .text()
            .await
            .map_err(|err| ConsumeError::Retry(Failure::Fetch(err.to_string())))?;
        serde_json::from_str(&body).map_err(|err| {
            ConsumeError::Retry(Failure::Fetch(format!("invalid response body: {err}")))
        })
    }
}

pub(crate) struct Driver<'a> {
    pub http: &'a reqwest::Client,
    pub log: &'a LogSettings,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl Driver<'_> {
    pub(crate) async fn dispatch<C: ResponseConsumer>(
        &self,
        selector: &mut dyn NodeSelector,
        plan: &RequestPlan,
        cancel: &CancellationToken,
        consumer: &mut C,
    ) -> Result<C::Output> {
        self.log
            .emit(plan.start_event, &format!("{} {}", plan.method, plan.path));

        let mut follow: Option<Url> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(RqliteError::Canceled);
            }

            let node = match follow.take() {
                Some(target) => target,
                None => match selector.select_node().await {
                    Ok(node) => node,
                    Err(RqliteError::HostsExhausted { log }) => {
                        if log {
                            self.log.emit(
                                Event::HostsExhausted,
                                &format!("no host produced a response for {}", plan.path),
                            );
                        }
                        return Err(RqliteError::HostsExhausted { log });
                    }
                    Err(err) => return Err(err),
                },
            };
            let url = plan.url_for(&node);

            let mut request = self.http.request(plan.method.clone(), url.clone());
            if let Some(body) = &plan.body {
                request = request
                    .header(header::CONTENT_TYPE, "application/json; charset=UTF-8")
                    .body(body.clone());
            }

            let started = Instant::now();
            let sent = tokio::select! {
                _ = cancel.cancelled() => return Err(RqliteError::Canceled),
                sent = tokio::time::timeout(self.connect_timeout, request.send()) => sent,
            };
            let response = match sent {
                Err(_) => {
                    self.log
                        .emit(Event::ConnectTimeout, &format!("connect timeout for {url}"));
                    selector.on_failure(&Failure::ConnectTimeout).await?;
                    continue;
                }
                Ok(Err(err)) => {
                    self.log
                        .emit(Event::FetchError, &format!("{url}: {err}"));
                    selector.on_failure(&Failure::Fetch(err.to_string())).await?;
                    continue;
                }
                Ok(Ok(response)) => response,
            };

            if let Some(threshold) = self.log.slow_query_threshold {
                let to_headers = started.elapsed();
                if to_headers > threshold {
                    self.log.emit(
                        Event::SlowQuery,
                        &format!("headers from {url} after {to_headers:?}"),
                    );
                }
            }

            let status = response.status();
            if is_redirect_status(status.as_u16()) {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                drop(response);

                let Some(location) = location else {
                    self.log.emit(
                        Event::NonOkResponse,
                        &format!("{status} without Location from {url}"),
                    );
                    selector
                        .on_failure(&Failure::Body(format!("{status} without Location")))
                        .await?;
                    continue;
                };
                let Ok(target) = Url::parse(&location) else {
                    self.log.emit(
                        Event::NonOkResponse,
                        &format!("unusable redirect target '{location}' from {url}"),
                    );
                    selector.on_failure(&Failure::Body(location)).await?;
                    continue;
                };

                let decision = selector.on_redirect(&target);
                if decision.follow {
                    let next = decision.target.unwrap_or_else(|| base_url(&target));
                    if decision.log {
                        self.log.emit(
                            Event::FollowRedirect,
                            &format!("{url} redirected to {next}"),
                        );
                    }
                    follow = Some(next);
                } else if decision.log {
                    self.log.emit(
                        Event::FollowRedirect,
                        &format!("max redirects exceeded at {url}"),
                    );
                }
                continue;
            }

            if !status.is_success() {
                self.log
                    .emit(Event::NonOkResponse, &format!("{status} from {url}"));
                drop(response);
                selector
                    .on_failure(&Failure::Status(status.as_u16()))
                    .await?;
                continue;
            }

            // OK headers: switch from the connect budget to the read budget.
            let consumed = tokio::select! {
                _ = cancel.cancelled() => return Err(RqliteError::Canceled),
                consumed = tokio::time::timeout(self.response_timeout, consumer.consume(response)) => consumed,
            };
            match consumed {
                Err(_) => {
                    self.log
                        .emit(Event::ReadTimeout, &format!("read timeout for {url}"));
                    selector.on_failure(&Failure::ReadTimeout).await?;
                    continue;
                }
                Ok(Err(ConsumeError::Retry(failure))) => {
                    self.log
                        .emit(Event::FetchError, &format!("{url}: {failure}"));
                    selector.on_failure(&failure).await?;
                    continue;
                }
                Ok(Err(ConsumeError::Fatal(err))) => return Err(err),
                Ok(Ok(output)) => {
                    selector.on_success();
                    self.log
                        .emit(plan.response_event, &format!("{status} from {url}"));
                    return Ok(output);
                }
            }
        }
    }
}
