use std::{borrow::Cow, fmt, path::Path, sync::Arc, time::Duration};

use reqwest::{redirect, Method};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    backup::{BackupFormat, StreamConsumer},
    driver::{Driver, JsonConsumer, RequestPlan},
    events::Event,
    explain::ExplainPlan,
    options::{ConnectionOptions, Consistency},
    params::{Operation, Params},
    selector::{DefaultSelectorFactory, QuerySpec, SelectorFactory},
    sql::{classify, SqlCommand},
    types::{BulkResult, ResultItem},
    wire::{self, ExecuteResponse, STALE_READ},
    Result, RqliteError,
};

/// Per-call settings for [`Cursor::execute`].
#[derive(Clone, Debug)]
pub struct ExecuteOptions {
    /// Turn a per-operation SQL error into [`RqliteError::Sql`] instead
    /// of returning it as data on the result.
    pub raise_on_error: bool,
    pub read_consistency: Option<Consistency>,
    pub freshness: Option<String>,
    pub cancel: Option<CancellationToken>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            raise_on_error: true,
            read_consistency: None,
            freshness: None,
            cancel: None,
        }
    }
}

/// Per-call settings for [`Cursor::execute_many`].
#[derive(Clone, Debug)]
pub struct ExecuteManyOptions {
    pub raise_on_error: bool,
    /// Run the batch atomically: a mid-batch SQL failure rolls back the
    /// operations before it. Either way the batch is one consensus entry.
    pub transaction: bool,
    pub cancel: Option<CancellationToken>,
}

impl Default for ExecuteManyOptions {
    fn default() -> Self {
        Self {
            raise_on_error: true,
            transaction: true,
            cancel: None,
        }
    }
}

/// Per-call settings for [`Cursor::explain`].
#[derive(Clone, Debug, Default)]
pub struct ExplainOptions {
    pub read_consistency: Option<Consistency>,
    pub freshness: Option<String>,
    pub cancel: Option<CancellationToken>,
}

/// Per-call settings for [`Connection::backup`].
#[derive(Clone, Debug, Default)]
pub struct BackupOptions {
    /// Consistency hint consumed by the node selector (the server cannot
    /// redirect a streamed backup); `Weak`/`Strong` locate the leader
    /// client-side first.
    pub read_consistency: Option<Consistency>,
    pub freshness: Option<String>,
    pub cancel: Option<CancellationToken>,
}

/// Client for a cluster of nodes exposing the SQLite HTTP API.
///
/// Holds the immutable host list and configuration; every request is an
/// independent round trip with its own node-selection state, so one
/// connection can serve any number of concurrent calls.
#[derive(Clone)]
pub struct Connection {
    http: reqwest::Client,
    hosts: Arc<[Url]>,
    options: ConnectionOptions,
    factory: Arc<dyn SelectorFactory>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("hosts", &self.hosts)
            .field("options", &self.options)
            .finish()
    }
}

impl Connection {
    /// Creates a connection over one or more node base URLs.
    ///
    /// Fails when the list is empty or a URL does not parse as an
    /// absolute `http`/`https` base.
    pub fn new<I, S>(hosts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for host in hosts {
            let host = host.as_ref();
            let url = Url::parse(host)
                .map_err(|err| RqliteError::Config(format!("invalid host URL '{host}': {err}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(RqliteError::Config(format!(
                    "host URL '{host}' must use http or https"
                )));
            }
            parsed.push(url);
        }
        if parsed.is_empty() {
            return Err(RqliteError::Config(
                "at least one host URL is required".to_owned(),
            ));
        }

        // Redirects are followed by the dispatcher, not the HTTP layer,
        // so they can be charged against the selector's budget.
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| RqliteError::Config(format!("failed to build HTTP client: {err}")))?;

        let hosts: Arc<[Url]> = parsed.into();
        let options = ConnectionOptions::default();
        let factory = Self::build_factory(&hosts, &http, &options);
        Ok(Self {
            http,
            hosts,
            options,
            factory,
        })
    }

    /// Applies connection options such as timeouts and retry budgets.
    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self.factory = Self::build_factory(&self.hosts, &self.http, &self.options);
        self
    }

    fn build_factory(
        hosts: &Arc<[Url]>,
        http: &reqwest::Client,
        options: &ConnectionOptions,
    ) -> Arc<dyn SelectorFactory> {
        options.selector_factory.clone().unwrap_or_else(|| {
            Arc::new(DefaultSelectorFactory::new(
                hosts.clone(),
                http.clone(),
                Duration::from_millis(options.timeout_ms),
                options.max_redirects,
                options.max_attempts_per_host,
            ))
        })
    }

    pub fn hosts(&self) -> &[Url] {
        &self.hosts
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Derives a cursor: a short-lived scope for consistency selection.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            conn: self,
            consistency: None,
            freshness: None,
        }
    }

    /// Executes a single statement through a default cursor.
    pub async fn execute<P: Into<Params>>(
        &self,
        sql: &str,
        params: P,
        options: ExecuteOptions,
    ) -> Result<ResultItem> {
        self.cursor().execute(sql, params, options).await
    }

    /// Executes a batch of statements through a default cursor.
    pub async fn execute_many<I>(&self, ops: I, options: ExecuteManyOptions) -> Result<BulkResult>
    where
        I: IntoIterator,
        I::Item: Into<Operation>,
    {
        self.cursor().execute_many(ops, options).await
    }

    /// Explains a statement through a default cursor.
    pub async fn explain<P: Into<Params>>(
        &self,
        sql: &str,
        params: P,
        options: ExplainOptions,
    ) -> Result<ExplainPlan> {
        self.cursor().explain(sql, params, options).await
    }

    /// Streams a backup of the database into `writer`, returning the
    /// number of bytes written. Nothing is buffered in memory.
    pub async fn backup<W>(
        &self,
        format: BackupFormat,
        writer: &mut W,
        options: BackupOptions,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let cancel = options.cancel.clone().unwrap_or_default();
        let level = options
            .read_consistency
            .unwrap_or(self.options.read_consistency);
        let freshness = options
            .freshness
            .as_deref()
            .unwrap_or(&self.options.freshness);

        let plan = RequestPlan {
            method: Method::GET,
            path: "/db/backup".to_owned(),
            query: format.query().to_owned(),
            body: None,
            start_event: Event::BackupStart,
            response_event: Event::BackupEnd,
        };
        let mut selector = self.factory.per_query(QuerySpec {
            consistency: level,
            freshness,
            path: &plan.path,
            cancel: cancel.clone(),
        });
        let mut consumer = StreamConsumer::new(writer);
        self.driver()
            .dispatch(selector.as_mut(), &plan, &cancel, &mut consumer)
            .await
    }

    /// Streams a backup into a freshly created file. The partial file is
    /// removed when the backup fails.
    pub async fn backup_to_file(
        &self,
        format: BackupFormat,
        path: impl AsRef<Path>,
        options: BackupOptions,
    ) -> Result<u64> {
        let path = path.as_ref();
        let mut file = tokio::fs::File::create(path).await?;
        match self.backup(format, &mut file, options).await {
            Ok(total) => Ok(total),
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                Err(err)
            }
        }
    }

    fn driver(&self) -> Driver<'_> {
        Driver {
            http: &self.http,
            log: &self.options.log,
            connect_timeout: Duration::from_millis(self.options.timeout_ms),
            response_timeout: Duration::from_millis(self.options.response_timeout_ms),
        }
    }

    async fn run(
        &self,
        plan: RequestPlan,
        consistency: Consistency,
        freshness: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecuteResponse> {
        let mut selector = self.factory.per_query(QuerySpec {
            consistency,
            freshness,
            path: &plan.path,
            cancel: cancel.clone(),
        });
        self.driver()
            .dispatch(selector.as_mut(), &plan, cancel, &mut JsonConsumer)
            .await
    }

    async fn run_read(
        &self,
        op: &Operation,
        level: Consistency,
        freshness: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecuteResponse> {
        let body = wire::encode_operations(std::slice::from_ref(op))?;
        let mut query = format!("level={}", level.as_str());
        match level {
            Consistency::None => {
                query.push_str("&freshness=");
                query.push_str(freshness);
            }
            // Leader-served reads ask misdirected nodes to redirect us.
            _ => query.push_str("&redirect"),
        }
        let plan = RequestPlan {
            method: Method::POST,
            path: "/db/query".to_owned(),
            query,
            body: Some(body),
            start_event: Event::ReadStart,
            response_event: Event::ReadResponse,
        };
        self.run(plan, level, freshness, cancel).await
    }

    async fn run_write(
        &self,
        ops: &[Operation],
        transaction: bool,
        cancel: &CancellationToken,
    ) -> Result<ExecuteResponse> {
        let body = wire::encode_operations(ops)?;
        let mut query = String::from("redirect");
        if transaction {
            query.push_str("&transaction");
        }
        let plan = RequestPlan {
            method: Method::POST,
            path: "/db/execute".to_owned(),
            query,
            body: Some(body),
            start_event: Event::WriteStart,
            response_event: Event::WriteResponse,
        };
        self.run(plan, Consistency::Strong, &self.options.freshness, cancel)
            .await
    }
}

/// Short-lived consistency scope over a [`Connection`].
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    conn: &'a Connection,
    consistency: Option<Consistency>,
    freshness: Option<String>,
}

impl Cursor<'_> {
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn with_freshness(mut self, freshness: impl Into<String>) -> Self {
        self.freshness = Some(freshness.into());
        self
    }

    fn read_level(&self, per_call: Option<Consistency>) -> Consistency {
        per_call
            .or(self.consistency)
            .unwrap_or(self.conn.options.read_consistency)
    }

    fn read_freshness<'f>(&'f self, per_call: Option<&'f str>) -> &'f str {
        per_call
            .or(self.freshness.as_deref())
            .unwrap_or(&self.conn.options.freshness)
    }

    /// Executes a single statement.
    ///
    /// Reads go to the query endpoint at the resolved consistency level;
    /// a `none`-level read answered with a stale-read error is retried
    /// once at `weak`. Writes always run at strong consistency.
    pub async fn execute<P: Into<Params>>(
        &self,
        sql: &str,
        params: P,
        options: ExecuteOptions,
    ) -> Result<ResultItem> {
        let cancel = options.cancel.clone().unwrap_or_default();
        let op = Operation::new(sql, params);

        let response = if classify(sql).is_read() {
            let level = self.read_level(options.read_consistency);
            let freshness = self.read_freshness(options.freshness.as_deref());
            self.read_with_stale_retry(&op, level, freshness, &cancel)
                .await?
        } else {
            self.conn.run_write(std::slice::from_ref(&op), false, &cancel).await?
        };
        unwrap_single(response, options.raise_on_error)
    }

    /// Executes a batch of statements in one request.
    ///
    /// Accepts anything convertible into [`Operation`]s: `(sql, params)`
    /// tuples, bare SQL strings, or [`Operation::zip`] over parallel
    /// lists. When the server aborts mid-batch the result carries fewer
    /// items than operations were submitted.
    pub async fn execute_many<I>(&self, ops: I, options: ExecuteManyOptions) -> Result<BulkResult>
    where
        I: IntoIterator,
        I::Item: Into<Operation>,
    {
        let ops: Vec<Operation> = ops.into_iter().map(Into::into).collect();
        let cancel = options.cancel.clone().unwrap_or_default();

        let response = self.conn.run_write(&ops, options.transaction, &cancel).await?;
        if let Some(error) = response.error {
            return Err(RqliteError::Server(error));
        }
        let results = response
            .results
            .ok_or_else(|| RqliteError::Protocol("response missing results".to_owned()))?;
        let bulk = BulkResult::new(results);
        if options.raise_on_error {
            if let Some((index, message)) = bulk.first_error() {
                return Err(RqliteError::Sql {
                    index,
                    message: message.to_owned(),
                });
            }
        }
        Ok(bulk)
    }

    /// Returns the query plan for a statement.
    ///
    /// Statements that are not already EXPLAINs are prefixed with
    /// `EXPLAIN QUERY PLAN`. Strong consistency is clamped to weak; a
    /// plan never needs a consensus round.
    pub async fn explain<P: Into<Params>>(
        &self,
        sql: &str,
        params: P,
        options: ExplainOptions,
    ) -> Result<ExplainPlan> {
        let text: Cow<'_, str> = match classify(sql) {
            SqlCommand::Explain | SqlCommand::ExplainQueryPlan => Cow::Borrowed(sql),
            _ => Cow::Owned(format!("EXPLAIN QUERY PLAN {sql}")),
        };
        let cancel = options.cancel.clone().unwrap_or_default();
        let level = match self.read_level(options.read_consistency) {
            Consistency::Strong => Consistency::Weak,
            level => level,
        };
        let freshness = self.read_freshness(options.freshness.as_deref());
        let op = Operation::new(text.as_ref(), params);

        let response = self
            .read_with_stale_retry(&op, level, freshness, &cancel)
            .await?;
        let item = unwrap_single(response, true)?;
        Ok(ExplainPlan::from_rows(item.results().unwrap_or(&[])))
    }

    async fn read_with_stale_retry(
        &self,
        op: &Operation,
        level: Consistency,
        freshness: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecuteResponse> {
        let response = self.conn.run_read(op, level, freshness, cancel).await?;
        if level == Consistency::None && response.error.as_deref() == Some(STALE_READ) {
            self.conn.options.log.emit(
                Event::ReadStale,
                "stale response; retrying once at weak consistency",
            );
            return self
                .conn
                .run_read(op, Consistency::Weak, freshness, cancel)
                .await;
        }
        Ok(response)
    }
}

fn unwrap_single(response: ExecuteResponse, raise_on_error: bool) -> Result<ResultItem> {
    if let Some(error) = response.error {
        return Err(RqliteError::Server(error));
    }
    let results = response
        .results
        .ok_or_else(|| RqliteError::Protocol("response missing results".to_owned()))?;
    let [item]: [wire::RawResultItem; 1] = results.try_into().map_err(|items: Vec<_>| {
        RqliteError::Protocol(format!("expected exactly one result, got {}", items.len()))
    })?;
    let item = ResultItem::from(item);
    if raise_on_error {
        if let Some(message) = item.error() {
            return Err(RqliteError::Sql {
                index: 0,
                message: message.to_owned(),
            });
        }
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::{unwrap_single, Connection};
    use crate::{
        wire::{ExecuteResponse, RawResultItem},
        RqliteError,
    };

    #[test]
    fn rejects_empty_host_list() {
        let err = Connection::new(Vec::<String>::new()).expect_err("must fail");
        assert!(matches!(err, RqliteError::Config(_)));
    }

    #[test]
    fn rejects_unparsable_and_non_http_hosts() {
        assert!(matches!(
            Connection::new(["not a url"]).expect_err("must fail"),
            RqliteError::Config(_)
        ));
        assert!(matches!(
            Connection::new(["ftp://node0:4001"]).expect_err("must fail"),
            RqliteError::Config(_)
        ));
    }

    #[test]
    fn debug_lists_hosts_without_internals() {
        let conn = Connection::new(["http://node0:4001"]).expect("must build");
        let debug = format!("{conn:?}");
        assert!(debug.contains("node0"));
        assert!(debug.contains("max_attempts_per_host"));
    }

    #[test]
    fn unwrap_single_raises_top_level_server_error() {
        let response = ExecuteResponse {
            results: None,
            error: Some("not leader".to_owned()),
        };
        assert!(matches!(
            unwrap_single(response, true).expect_err("must fail"),
            RqliteError::Server(message) if message == "not leader"
        ));
    }

    #[test]
    fn unwrap_single_requires_exactly_one_result() {
        let missing = ExecuteResponse {
            results: None,
            error: None,
        };
        assert!(matches!(
            unwrap_single(missing, true).expect_err("must fail"),
            RqliteError::Protocol(_)
        ));

        let two = ExecuteResponse {
            results: Some(vec![RawResultItem::default(), RawResultItem::default()]),
            error: None,
        };
        assert!(matches!(
            unwrap_single(two, true).expect_err("must fail"),
            RqliteError::Protocol(_)
        ));
    }

    #[test]
    fn unwrap_single_honors_raise_on_error() {
        let item = RawResultItem {
            error: Some("no such table: missing".to_owned()),
            ..RawResultItem::default()
        };

        let raised = unwrap_single(
            ExecuteResponse {
                results: Some(vec![item.clone()]),
                error: None,
            },
            true,
        )
        .expect_err("must raise");
        assert!(matches!(raised, RqliteError::Sql { index: 0, .. }));

        let kept = unwrap_single(
            ExecuteResponse {
                results: Some(vec![item]),
                error: None,
            },
            false,
        )
        .expect("must keep error as data");
        assert!(kept.error().is_some());
    }
}
