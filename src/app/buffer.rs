//! The buffer control loop: keeps the player's queue inside the target
//! window, deduplicates reels and rides out source failures.
//!
//! `BufferManager::step` makes one decision and reports how long to sleep
//! before the next one; `run` strings steps together until shutdown.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use super::policy::{BackoffPolicy, Setback};
use super::shutdown::Shutdown;
use crate::player::{PlaybackSink, SinkError};
use crate::source::{ContentSource, Cursor, Page, SourceError};

pub(crate) trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Filling,
    Steady,
    Reauthenticating,
    Backoff { until: Instant },
}

/// Session-local loop state. Owned by the manager; nothing else mutates it.
#[derive(Debug)]
pub(crate) struct BufferState {
    pub(crate) cursor: Cursor,
    pub(crate) seen: HashSet<String>,
    pub(crate) consecutive_failures: u32,
    pub(crate) last_success: Instant,
}

impl BufferState {
    fn new(now: Instant) -> Self {
        Self {
            cursor: Cursor::Start,
            seen: HashSet::new(),
            consecutive_failures: 0,
            last_success: now,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Targets {
    pub(crate) forward: usize,
    pub(crate) backward: usize,
    pub(crate) fetch_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopTiming {
    pub(crate) poll_interval: Duration,
    pub(crate) cleanup_interval: Duration,
    /// Gap between consecutive enqueue commands.
    pub(crate) enqueue_pacing: Duration,
    /// Delay before re-checking the window after a productive fetch.
    pub(crate) refill_delay: Duration,
}

impl LoopTiming {
    pub(crate) fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            cleanup_interval: Duration::from_secs(5 * 60),
            enqueue_pacing: Duration::from_millis(500),
            refill_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AppendReport {
    pub(crate) added: usize,
    pub(crate) duplicates: usize,
    pub(crate) failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageOutcome {
    Advanced { added: usize },
    /// Nothing new: empty page or only reels already queued this session.
    Exhausted,
    SinkFailed,
}

pub(crate) struct BufferManager<S, P, C = SystemClock> {
    source: S,
    sink: P,
    clock: C,
    state: BufferState,
    phase: Phase,
    targets: Targets,
    timing: LoopTiming,
    policy: BackoffPolicy,
    last_cleanup: Instant,
    /// Set while cooling down from a failed reauthentication.
    retry_reauth: bool,
}

impl<S, P, C> BufferManager<S, P, C>
where
    S: ContentSource,
    P: PlaybackSink,
    C: Clock,
{
    pub(crate) fn new(
        source: S,
        sink: P,
        clock: C,
        targets: Targets,
        timing: LoopTiming,
        policy: BackoffPolicy,
    ) -> Self {
        let now = clock.now();
        Self {
            source,
            sink,
            clock,
            state: BufferState::new(now),
            phase: Phase::Filling,
            targets,
            timing,
            policy,
            last_cleanup: now,
            retry_reauth: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &BufferState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn sink_mut(&mut self) -> &mut P {
        &mut self.sink
    }

    #[cfg(test)]
    pub(crate) fn sink(&self) -> &P {
        &self.sink
    }

    pub(crate) fn into_parts(self) -> (S, P) {
        (self.source, self.sink)
    }

    /// Startup fill. Unlike the loop, failures here are fatal.
    pub(crate) fn initial_fill(&mut self, count: usize) -> Result<usize> {
        let page = self
            .source
            .fetch_page(&Cursor::Start, count)
            .map_err(|err| anyhow!("initial fetch failed: {err}"))?;
        if page.urls.is_empty() {
            return Err(anyhow!("initial fetch returned no playable reels"));
        }
        let now = self.clock.now();
        match self.apply_page(page, now) {
            PageOutcome::Advanced { added } => Ok(added),
            PageOutcome::SinkFailed => Err(anyhow!("player rejected every initial reel")),
            PageOutcome::Exhausted => Err(anyhow!("initial fetch returned no playable reels")),
        }
    }

    pub(crate) fn run(&mut self, shutdown: &Shutdown) {
        tracing::info!(
            forward = self.targets.forward,
            backward = self.targets.backward,
            "buffer manager started"
        );
        while !shutdown.is_triggered() {
            let delay = self.step();
            if shutdown.wait_timeout(delay) {
                break;
            }
        }
        tracing::info!(seen = self.state.seen.len(), "buffer manager stopped");
    }

    /// One pass of the control loop. Returns how long to sleep before the
    /// next pass. Never fails: every external error becomes a backoff.
    pub(crate) fn step(&mut self) -> Duration {
        let now = self.clock.now();

        if now.saturating_duration_since(self.last_cleanup) >= self.timing.cleanup_interval {
            self.last_cleanup = now;
            self.cleanup();
        }

        if let Phase::Backoff { until } = self.phase {
            if now < until {
                return (until - now).min(self.timing.poll_interval);
            }
            self.phase = if self.retry_reauth {
                Phase::Reauthenticating
            } else {
                Phase::Steady
            };
        }

        if self.phase == Phase::Reauthenticating {
            return self.reauthenticate(now);
        }

        let remaining = match self.remaining_window() {
            Ok(remaining) => remaining,
            Err(err) => {
                tracing::warn!("could not read player queue: {err}");
                return self.back_off(Setback::SinkUnavailable, now);
            }
        };

        if remaining >= self.targets.forward {
            self.phase = Phase::Steady;
            return self.timing.poll_interval;
        }

        self.phase = Phase::Filling;
        let since_success = now.saturating_duration_since(self.state.last_success);
        if let Some(reason) = self
            .policy
            .refresh_reason(self.state.consecutive_failures, since_success)
        {
            tracing::info!(
                failures = self.state.consecutive_failures,
                "refreshing session: {}",
                reason.as_str()
            );
            self.phase = Phase::Reauthenticating;
            return self.reauthenticate(now);
        }

        tracing::debug!(
            remaining,
            target = self.targets.forward,
            cursor = %self.state.cursor,
            "window below target, fetching"
        );
        self.fill(now)
    }

    fn fill(&mut self, now: Instant) -> Duration {
        match self
            .source
            .fetch_page(&self.state.cursor, self.targets.fetch_count)
        {
            Ok(page) => match self.apply_page(page, now) {
                PageOutcome::Advanced { added } => {
                    tracing::info!(added, seen = self.state.seen.len(), "queued new reels");
                    self.timing.refill_delay
                }
                PageOutcome::Exhausted => {
                    self.state.consecutive_failures += 1;
                    tracing::warn!("feed returned nothing new, restarting it from the top");
                    self.back_off(Setback::EmptyFeed, now)
                }
                PageOutcome::SinkFailed => {
                    tracing::warn!("player rejected every reel of the page");
                    self.back_off(Setback::SinkUnavailable, now)
                }
            },
            Err(SourceError::AuthRequired) => {
                tracing::warn!("source session expired");
                self.phase = Phase::Reauthenticating;
                Duration::ZERO
            }
            Err(err) => {
                self.state.consecutive_failures += 1;
                tracing::warn!(
                    failures = self.state.consecutive_failures,
                    "fetch failed: {err}"
                );
                self.back_off(Setback::FetchFailed, now)
            }
        }
    }

    fn reauthenticate(&mut self, now: Instant) -> Duration {
        match self.source.reauthenticate() {
            Ok(()) => {
                tracing::info!("session refreshed");
                self.retry_reauth = false;
                self.state.consecutive_failures = 0;
                self.state.last_success = now;
                self.phase = Phase::Filling;
                Duration::ZERO
            }
            Err(err) => {
                tracing::warn!("reauthentication failed: {err}");
                self.retry_reauth = true;
                self.back_off(Setback::ReauthFailed, now)
            }
        }
    }

    /// Enter backoff. The returned sleep is capped at the poll interval so
    /// cleanup keeps its cadence during long cooldowns.
    fn back_off(&mut self, setback: Setback, now: Instant) -> Duration {
        let delay = self.policy.delay_for(setback);
        self.phase = Phase::Backoff { until: now + delay };
        delay.min(self.timing.poll_interval)
    }

    /// Reels queued ahead of the playback head. An idle player has none,
    /// whatever its playlist still holds.
    fn remaining_window(&mut self) -> Result<usize, SinkError> {
        let Some(position) = self.sink.playback_position()? else {
            return Ok(0);
        };
        let length = self.sink.playlist_length()?;
        Ok(length.saturating_sub(position))
    }

    pub(crate) fn apply_page(&mut self, page: Page, now: Instant) -> PageOutcome {
        let report = self.append_urls(&page.urls);
        tracing::debug!(
            added = report.added,
            duplicates = report.duplicates,
            failed = report.failed,
            "page appended"
        );
        if report.added > 0 {
            self.state.cursor = page.next_cursor;
            self.state.consecutive_failures = 0;
            self.state.last_success = now;
            PageOutcome::Advanced {
                added: report.added,
            }
        } else if report.failed > 0 {
            PageOutcome::SinkFailed
        } else {
            self.state.cursor = Cursor::Start;
            PageOutcome::Exhausted
        }
    }

    /// Enqueue unseen URLs in feed order. A URL only enters the seen-set
    /// once the player accepted it.
    pub(crate) fn append_urls(&mut self, urls: &[String]) -> AppendReport {
        let mut report = AppendReport::default();
        let mut sent_any = false;
        for url in urls {
            if self.state.seen.contains(url) {
                report.duplicates += 1;
                continue;
            }
            if sent_any && !self.timing.enqueue_pacing.is_zero() {
                thread::sleep(self.timing.enqueue_pacing);
            }
            sent_any = true;
            match self.sink.enqueue(url) {
                Ok(()) => {
                    self.state.seen.insert(url.clone());
                    report.added += 1;
                }
                Err(err) => {
                    tracing::warn!(url = %url, "enqueue failed: {err}");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Drop reels behind the playback head beyond the retention target.
    /// Returns how many were removed.
    pub(crate) fn cleanup(&mut self) -> usize {
        let position = match self.sink.playback_position() {
            Ok(Some(position)) => position,
            Ok(None) => {
                tracing::debug!("cleanup skipped, player is idle");
                return 0;
            }
            Err(err) => {
                tracing::warn!("cleanup skipped, could not read position: {err}");
                return 0;
            }
        };
        let to_remove = position.saturating_sub(self.targets.backward);
        let mut removed = 0;
        for _ in 0..to_remove {
            if let Err(err) = self.sink.dequeue_first() {
                tracing::warn!(removed, "cleanup stopped early: {err}");
                break;
            }
            removed += 1;
        }
        if removed > 0 {
            tracing::debug!(removed, "trimmed played reels");
        }
        removed
    }
}
