use std::time::Duration;

/// Kinds of trouble the buffer loop backs off from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Setback {
    SinkUnavailable,
    FetchFailed,
    EmptyFeed,
    ReauthFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshReason {
    TooManyFailures,
    StaleSession,
}

impl RefreshReason {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            RefreshReason::TooManyFailures => "too many consecutive failures",
            RefreshReason::StaleSession => "no successful fetch for too long",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BackoffPolicy {
    pub(crate) max_consecutive_failures: u32,
    pub(crate) stale_after: Duration,
    pub(crate) failure_delay: Duration,
    pub(crate) empty_feed_delay: Duration,
    pub(crate) reauth_cooldown: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            stale_after: Duration::from_secs(30 * 60),
            failure_delay: Duration::from_secs(10),
            empty_feed_delay: Duration::from_secs(15),
            reauth_cooldown: Duration::from_secs(120),
        }
    }
}

impl BackoffPolicy {
    pub(crate) fn delay_for(&self, setback: Setback) -> Duration {
        match setback {
            Setback::SinkUnavailable | Setback::FetchFailed => self.failure_delay,
            Setback::EmptyFeed => self.empty_feed_delay,
            Setback::ReauthFailed => self.reauth_cooldown,
        }
    }

    pub(crate) fn refresh_reason(
        &self,
        consecutive_failures: u32,
        since_success: Duration,
    ) -> Option<RefreshReason> {
        if consecutive_failures > self.max_consecutive_failures {
            Some(RefreshReason::TooManyFailures)
        } else if since_success > self.stale_after {
            Some(RefreshReason::StaleSession)
        } else {
            None
        }
    }
}
