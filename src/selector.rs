//! Per-query node selection.
//!
//! A selector lives for exactly one dispatched request. The dispatcher
//! asks it for nodes, reports failures and redirects back to it, and the
//! selector decides rotation, redirect budgets, backoff, and when to
//! give up with hosts-exhausted.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    backoff::backoff,
    options::Consistency,
    random::{random_range, random_shuffle},
    Result, RqliteError,
};

/// Classified outcome of one failed node attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    ConnectTimeout,
    ReadTimeout,
    /// Request could not be sent or its body could not be read.
    Fetch(String),
    /// Non-2xx, non-redirect status.
    Status(u16),
    /// Response was delivered but its content was unusable.
    Body(String),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectTimeout => write!(f, "connect timeout"),
            Self::ReadTimeout => write!(f, "read timeout"),
            Self::Fetch(detail) => write!(f, "fetch error: {detail}"),
            Self::Status(status) => write!(f, "unexpected status {status}"),
            Self::Body(detail) => write!(f, "unusable response: {detail}"),
        }
    }
}

/// What to do with a redirect the dispatcher just received.
#[derive(Clone, Debug)]
pub struct RedirectDecision {
    pub follow: bool,
    /// Overrides the dispatcher's derived follow target when set.
    pub target: Option<Url>,
    pub log: bool,
}

/// Node-selection callbacks driven by the dispatcher, one instance per
/// query.
#[async_trait]
pub trait NodeSelector: Send {
    /// Next node to contact, or `HostsExhausted` once budgets are spent.
    async fn select_node(&mut self) -> Result<Url>;

    /// The request against the current node succeeded.
    fn on_success(&mut self) {}

    /// The request against the current node failed. May sleep (backoff)
    /// before returning; fails only with `Canceled`.
    async fn on_failure(&mut self, failure: &Failure) -> Result<()>;

    /// The current node answered with a redirect to `location`.
    fn on_redirect(&mut self, location: &Url) -> RedirectDecision;
}

/// Per-query inputs handed to a [`SelectorFactory`].
pub struct QuerySpec<'a> {
    pub consistency: Consistency,
    pub freshness: &'a str,
    pub path: &'a str,
    pub cancel: CancellationToken,
}

/// Builds one selector per query. Implementations should precompute
/// anything expensive up front; `per_query` runs on every request.
pub trait SelectorFactory: Send + Sync {
    fn per_query(&self, spec: QuerySpec<'_>) -> Box<dyn NodeSelector>;
}

/// Strips path, query and fragment, leaving the bare scheme-host-port
/// base the host list is made of.
pub(crate) fn base_url(url: &Url) -> Url {
    let mut base = url.clone();
    base.set_path("");
    base.set_query(None);
    base.set_fragment(None);
    base
}

/// Random rotation selector.
///
/// The first selection costs one random index; the permutation over the
/// remaining hosts is only materialized if a second node is needed.
/// `max_attempts` is inclusive: each host is attempted at most that many
/// times in total.
pub struct RandomSelector {
    hosts: Arc<[Url]>,
    cancel: CancellationToken,
    max_redirects: u32,
    max_attempts: u32,
    initial_index: usize,
    shuffled: Option<Vec<usize>>,
    cursor: usize,
    loops: u32,
    selections: u32,
    redirects: u32,
}

impl RandomSelector {
    pub fn new(
        hosts: Arc<[Url]>,
        cancel: CancellationToken,
        max_redirects: u32,
        max_attempts: u32,
    ) -> Self {
        let initial_index = random_range(hosts.len());
        Self {
            hosts,
            cancel,
            max_redirects,
            max_attempts,
            initial_index,
            shuffled: None,
            cursor: 0,
            loops: 0,
            selections: 0,
            redirects: 0,
        }
    }

    fn at_pass_end(&self) -> bool {
        match &self.shuffled {
            Some(order) => self.cursor >= order.len(),
            None => false,
        }
    }
}

#[async_trait]
impl NodeSelector for RandomSelector {
    async fn select_node(&mut self) -> Result<Url> {
        // Redirects are budgeted per node, not per query.
        self.redirects = 0;
        let n = self.hosts.len();

        if n == 1 {
            if self.selections >= self.max_attempts {
                return Err(RqliteError::HostsExhausted { log: true });
            }
            self.selections += 1;
            return Ok(self.hosts[0].clone());
        }

        if self.shuffled.is_none() && self.cursor == 0 {
            self.cursor = 1;
            return Ok(self.hosts[self.initial_index].clone());
        }

        // Second selection: pin the already-attempted initial host at the
        // front and shuffle the rest behind it.
        let initial_index = self.initial_index;
        let order = self.shuffled.get_or_insert_with(|| {
            let mut order = Vec::with_capacity(n);
            order.push(initial_index);
            for k in random_shuffle(n - 1) {
                order.push(if k < initial_index { k } else { k + 1 });
            }
            order
        });
        if self.cursor >= order.len() {
            self.loops += 1;
            if self.loops >= self.max_attempts {
                return Err(RqliteError::HostsExhausted { log: true });
            }
            *order = random_shuffle(n);
            self.cursor = 0;
        }
        let host = self.hosts[order[self.cursor]].clone();
        self.cursor += 1;
        Ok(host)
    }

    async fn on_failure(&mut self, _failure: &Failure) -> Result<()> {
        if self.hosts.len() == 1 {
            if self.selections < self.max_attempts {
                return backoff(self.selections.saturating_sub(1), &self.cancel).await;
            }
            return Ok(());
        }
        // Sleep only between passes, and not after the final one.
        if self.at_pass_end() && self.loops + 1 < self.max_attempts {
            return backoff(self.loops, &self.cancel).await;
        }
        Ok(())
    }

    fn on_redirect(&mut self, _location: &Url) -> RedirectDecision {
        if self.redirects >= self.max_redirects {
            return RedirectDecision {
                follow: false,
                target: None,
                log: true,
            };
        }
        self.redirects += 1;
        RedirectDecision {
            follow: true,
            target: None,
            log: true,
        }
    }
}

enum LeaderState {
    Probing(RandomSelector),
    Settled(RandomSelector),
}

/// Leader-discovery selector.
///
/// Before the first real attempt it probes nodes (in the wrapped random
/// selector's order) with a trivial weak read asking for a redirect. A
/// redirect names the leader; an OK answer means the probed node is the
/// leader itself. Once settled it delegates to a fresh random selector
/// so the real request keeps full retry budgets.
pub struct LeaderSelector {
    http: reqwest::Client,
    hosts: Arc<[Url]>,
    cancel: CancellationToken,
    connect_timeout: Duration,
    max_redirects: u32,
    max_attempts: u32,
    state: LeaderState,
}

impl LeaderSelector {
    pub fn new(
        http: reqwest::Client,
        hosts: Arc<[Url]>,
        cancel: CancellationToken,
        connect_timeout: Duration,
        max_redirects: u32,
        max_attempts: u32,
    ) -> Self {
        let probing = RandomSelector::new(
            hosts.clone(),
            cancel.clone(),
            max_redirects,
            max_attempts,
        );
        Self {
            http,
            hosts,
            cancel,
            connect_timeout,
            max_redirects,
            max_attempts,
            state: LeaderState::Probing(probing),
        }
    }

    fn inner_mut(&mut self) -> &mut RandomSelector {
        match &mut self.state {
            LeaderState::Probing(inner) | LeaderState::Settled(inner) => inner,
        }
    }
}

#[async_trait]
impl NodeSelector for LeaderSelector {
    async fn select_node(&mut self) -> Result<Url> {
        loop {
            let node = match &mut self.state {
                LeaderState::Settled(inner) => return inner.select_node().await,
                LeaderState::Probing(inner) => inner.select_node().await?,
            };
            if self.cancel.is_cancelled() {
                return Err(RqliteError::Canceled);
            }
            match probe_node(&self.http, self.connect_timeout, &node, &self.cancel).await? {
                ProbeOutcome::Leader(leader) => {
                    self.state = LeaderState::Settled(RandomSelector::new(
                        self.hosts.clone(),
                        self.cancel.clone(),
                        self.max_redirects,
                        self.max_attempts,
                    ));
                    return Ok(leader);
                }
                ProbeOutcome::Failed(failure) => {
                    tracing::debug!(node = %node, "leader probe failed: {failure}");
                    if let LeaderState::Probing(inner) = &mut self.state {
                        inner.on_failure(&failure).await?;
                    }
                }
            }
        }
    }

    fn on_success(&mut self) {
        self.inner_mut().on_success();
    }

    async fn on_failure(&mut self, failure: &Failure) -> Result<()> {
        self.inner_mut().on_failure(failure).await
    }

    fn on_redirect(&mut self, location: &Url) -> RedirectDecision {
        self.inner_mut().on_redirect(location)
    }
}

enum ProbeOutcome {
    Leader(Url),
    Failed(Failure),
}

const PROBE_BODY: &str = r#"[["SELECT 1"]]"#;

async fn probe_node(
    http: &reqwest::Client,
    connect_timeout: Duration,
    node: &Url,
    cancel: &CancellationToken,
) -> Result<ProbeOutcome> {
    let mut probe_url = node.clone();
    probe_url.set_path("/db/query");
    probe_url.set_query(Some("level=weak&redirect"));

    let send = http
        .post(probe_url)
        .header(header::CONTENT_TYPE, "application/json; charset=UTF-8")
        .body(PROBE_BODY)
        .send();
    let sent = tokio::select! {
        _ = cancel.cancelled() => return Err(RqliteError::Canceled),
        sent = tokio::time::timeout(connect_timeout, send) => sent,
    };

    let response = match sent {
        Err(_) => return Ok(ProbeOutcome::Failed(Failure::ConnectTimeout)),
        Ok(Err(err)) => return Ok(ProbeOutcome::Failed(Failure::Fetch(err.to_string()))),
        Ok(Ok(response)) => response,
    };

    let status = response.status();
    if is_redirect_status(status.as_u16()) {
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let Some(location) = location else {
            return Ok(ProbeOutcome::Failed(Failure::Body(format!(
                "{status} without Location"
            ))));
        };
        if !location.starts_with("http") {
            return Ok(ProbeOutcome::Failed(Failure::Body(location)));
        }
        return match Url::parse(&location) {
            Ok(parsed) => Ok(ProbeOutcome::Leader(base_url(&parsed))),
            Err(_) => Ok(ProbeOutcome::Failed(Failure::Body(location))),
        };
    }
    if status.is_success() {
        return Ok(ProbeOutcome::Leader(node.clone()));
    }
    Ok(ProbeOutcome::Failed(Failure::Status(status.as_u16())))
}

pub(crate) fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Default routing: backups go through leader discovery (the server
/// cannot redirect a streamed backup, and they run far faster against
/// the leader); everything else uses plain random rotation.
pub(crate) struct DefaultSelectorFactory {
    hosts: Arc<[Url]>,
    http: reqwest::Client,
    connect_timeout: Duration,
    max_redirects: u32,
    max_attempts: u32,
}

impl DefaultSelectorFactory {
    pub(crate) fn new(
        hosts: Arc<[Url]>,
        http: reqwest::Client,
        connect_timeout: Duration,
        max_redirects: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            hosts,
            http,
            connect_timeout,
            max_redirects,
            max_attempts,
        }
    }
}

impl SelectorFactory for DefaultSelectorFactory {
    fn per_query(&self, spec: QuerySpec<'_>) -> Box<dyn NodeSelector> {
        let wants_leader =
            spec.path.starts_with("/db/backup") && spec.consistency.requires_leader();
        if wants_leader {
            Box::new(LeaderSelector::new(
                self.http.clone(),
                self.hosts.clone(),
                spec.cancel,
                self.connect_timeout,
                self.max_redirects,
                self.max_attempts,
            ))
        } else {
            Box::new(RandomSelector::new(
                self.hosts.clone(),
                spec.cancel,
                self.max_redirects,
                self.max_attempts,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{base_url, Failure, NodeSelector, RandomSelector};
    use crate::RqliteError;
    use std::{collections::HashMap, sync::Arc};
    use tokio_util::sync::CancellationToken;
    use url::Url;

    fn hosts(n: usize) -> Arc<[Url]> {
        (0..n)
            .map(|i| Url::parse(&format!("http://node{i}.local:4001")).expect("must parse"))
            .collect()
    }

    #[tokio::test]
    async fn one_pass_covers_every_host_exactly_once() {
        let hosts = hosts(4);
        let mut selector =
            RandomSelector::new(hosts.clone(), CancellationToken::new(), 2, 1);

        let mut counts: HashMap<Url, usize> = HashMap::new();
        for _ in 0..4 {
            let node = selector.select_node().await.expect("must select");
            *counts.entry(node).or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 1));

        let err = selector.select_node().await.expect_err("must exhaust");
        assert!(matches!(err, RqliteError::HostsExhausted { log: true }));
    }

    #[tokio::test(start_paused = true)]
    async fn each_pass_covers_all_hosts_up_to_the_attempt_budget() {
        let hosts = hosts(3);
        let mut selector =
            RandomSelector::new(hosts.clone(), CancellationToken::new(), 2, 2);

        let mut counts: HashMap<Url, usize> = HashMap::new();
        for _ in 0..6 {
            let node = selector.select_node().await.expect("must select");
            *counts.entry(node.clone()).or_default() += 1;
            selector
                .on_failure(&Failure::ConnectTimeout)
                .await
                .expect("must absorb failure");
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 2));

        let err = selector.select_node().await.expect_err("must exhaust");
        assert!(matches!(err, RqliteError::HostsExhausted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn single_host_budget_is_inclusive() {
        let hosts = hosts(1);
        let mut selector =
            RandomSelector::new(hosts.clone(), CancellationToken::new(), 2, 2);

        for _ in 0..2 {
            let node = selector.select_node().await.expect("must select");
            assert_eq!(node, hosts[0]);
            selector
                .on_failure(&Failure::Status(503))
                .await
                .expect("must absorb failure");
        }
        let err = selector.select_node().await.expect_err("must exhaust");
        assert!(matches!(err, RqliteError::HostsExhausted { .. }));
    }

    #[tokio::test]
    async fn redirect_budget_resets_on_each_selection() {
        let hosts = hosts(2);
        let mut selector =
            RandomSelector::new(hosts.clone(), CancellationToken::new(), 2, 2);
        let target = Url::parse("http://leader.local:4001/").expect("must parse");

        selector.select_node().await.expect("must select");
        assert!(selector.on_redirect(&target).follow);
        assert!(selector.on_redirect(&target).follow);
        let decision = selector.on_redirect(&target);
        assert!(!decision.follow);
        assert!(decision.log);

        selector.select_node().await.expect("must select");
        assert!(selector.on_redirect(&target).follow);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_pass_boundary_backoff() {
        let hosts = hosts(1);
        let cancel = CancellationToken::new();
        let mut selector = RandomSelector::new(hosts, cancel.clone(), 2, 3);

        selector.select_node().await.expect("must select");
        cancel.cancel();
        let err = selector
            .on_failure(&Failure::ConnectTimeout)
            .await
            .expect_err("must cancel");
        assert!(matches!(err, RqliteError::Canceled));
    }

    #[test]
    fn base_url_strips_path_query_and_fragment() {
        let url = Url::parse("http://node0.local:4001/db/query?level=weak#frag")
            .expect("must parse");
        assert_eq!(base_url(&url).as_str(), "http://node0.local:4001/");
    }
}
