//! Named log events surfaced through `tracing`.
//!
//! Every event can be enabled or disabled on its own, carries its own
//! severity, and truncates its message to a configurable cap before it
//! reaches the subscriber.

use std::time::Duration;

use tracing::Level;

/// The closed set of events the dispatcher emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    ReadStart,
    ReadResponse,
    ReadStale,
    WriteStart,
    WriteResponse,
    FollowRedirect,
    FetchError,
    ConnectTimeout,
    ReadTimeout,
    HostsExhausted,
    NonOkResponse,
    BackupStart,
    BackupEnd,
    SlowQuery,
}

impl Event {
    pub(crate) const ALL: [Event; 14] = [
        Event::ReadStart,
        Event::ReadResponse,
        Event::ReadStale,
        Event::WriteStart,
        Event::WriteResponse,
        Event::FollowRedirect,
        Event::FetchError,
        Event::ConnectTimeout,
        Event::ReadTimeout,
        Event::HostsExhausted,
        Event::NonOkResponse,
        Event::BackupStart,
        Event::BackupEnd,
        Event::SlowQuery,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Event::ReadStart => "read_start",
            Event::ReadResponse => "read_response",
            Event::ReadStale => "read_stale",
            Event::WriteStart => "write_start",
            Event::WriteResponse => "write_response",
            Event::FollowRedirect => "follow_redirect",
            Event::FetchError => "fetch_error",
            Event::ConnectTimeout => "connect_timeout",
            Event::ReadTimeout => "read_timeout",
            Event::HostsExhausted => "hosts_exhausted",
            Event::NonOkResponse => "non_ok_response",
            Event::BackupStart => "backup_start",
            Event::BackupEnd => "backup_end",
            Event::SlowQuery => "slow_query",
        }
    }

    fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|event| *event == self)
            .unwrap_or(0)
    }

    fn default_level(self) -> Level {
        match self {
            Event::ReadStart
            | Event::ReadResponse
            | Event::WriteStart
            | Event::WriteResponse
            | Event::BackupStart
            | Event::BackupEnd => Level::DEBUG,
            Event::ReadStale | Event::FollowRedirect => Level::INFO,
            Event::FetchError
            | Event::ConnectTimeout
            | Event::ReadTimeout
            | Event::HostsExhausted
            | Event::NonOkResponse
            | Event::SlowQuery => Level::WARN,
        }
    }
}

/// Per-event emission settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventSettings {
    pub enabled: bool,
    pub level: Level,
    pub max_message_len: usize,
}

const DEFAULT_MESSAGE_CAP: usize = 256;

/// Settings for the full event set plus the slow-query threshold.
#[derive(Clone, Debug)]
pub struct LogSettings {
    events: [EventSettings; Event::ALL.len()],
    /// When set, `slow_query` fires if request start to header arrival
    /// exceeds this.
    pub slow_query_threshold: Option<Duration>,
}

impl Default for LogSettings {
    fn default() -> Self {
        let mut events = [EventSettings {
            enabled: true,
            level: Level::DEBUG,
            max_message_len: DEFAULT_MESSAGE_CAP,
        }; Event::ALL.len()];
        for event in Event::ALL {
            events[event.index()].level = event.default_level();
        }
        Self {
            events,
            slow_query_threshold: None,
        }
    }
}

impl LogSettings {
    pub fn settings(&self, event: Event) -> EventSettings {
        self.events[event.index()]
    }

    pub fn set(&mut self, event: Event, settings: EventSettings) {
        self.events[event.index()] = settings;
    }

    pub fn with_event(mut self, event: Event, settings: EventSettings) -> Self {
        self.set(event, settings);
        self
    }

    pub fn disable(&mut self, event: Event) {
        self.events[event.index()].enabled = false;
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    pub(crate) fn emit(&self, event: Event, message: &str) {
        let settings = self.settings(event);
        if !settings.enabled {
            return;
        }
        let message = truncate(message, settings.max_message_len);
        if settings.level == Level::ERROR {
            tracing::error!(event = event.name(), "{message}");
        } else if settings.level == Level::WARN {
            tracing::warn!(event = event.name(), "{message}");
        } else if settings.level == Level::INFO {
            tracing::info!(event = event.name(), "{message}");
        } else if settings.level == Level::DEBUG {
            tracing::debug!(event = event.name(), "{message}");
        } else {
            tracing::trace!(event = event.name(), "{message}");
        }
    }
}

fn truncate(message: &str, cap: usize) -> &str {
    if message.len() <= cap {
        return message;
    }
    let mut end = cap;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
