//! Per-channel pacing of provider calls.
//!
//! A [`PacingController`] gates every send on its channel:
//! - at most `concurrency` tokens are outstanding at once
//! - two grants are at least `inter_message_delay_ms` (plus random jitter) apart
//! - at most `max_per_hour` / `max_per_day` grants per wall-clock hour / day
//! - grants only happen inside the configured daily send window
//!
//! Windows and caps use local wall-clock time read through a [`Clock`]. Caps
//! are fixed windows that reset at the top of the hour and at local midnight.
//! One controller exists per channel and is shared by every campaign on it.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use herald_common::Channel;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::Instant,
};

/// Upper bound for a single wall-clock wait, so clock changes are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Source of local wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Daily `[start, end)` window in which sends are allowed.
///
/// A window whose `start` is after its `end` wraps midnight, so
/// `22:00-06:00` allows sends overnight. `start == end` is open all day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl SendWindow {
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        match self.start.cmp(&self.end) {
            std::cmp::Ordering::Equal => true,
            std::cmp::Ordering::Less => self.start <= time && time < self.end,
            std::cmp::Ordering::Greater => time >= self.start || time < self.end,
        }
    }

    /// Wait until the window next opens; zero when it is open now.
    #[must_use]
    pub fn until_open(&self, now: NaiveDateTime) -> Duration {
        if self.contains(now.time()) {
            return Duration::ZERO;
        }

        let today = now.date().and_time(self.start);
        let next = if today > now {
            today
        } else {
            today + TimeDelta::days(1)
        };

        (next - now).to_std().unwrap_or_default()
    }
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&value, "%H:%M:%S"))
            .map_err(|e| D::Error::custom(format!("invalid time of day {value:?}: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Provider calls allowed in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Minimum gap between two grants (in milliseconds)
    #[serde(default)]
    pub inter_message_delay_ms: u64,

    /// Extra random gap drawn from `[0, jitter_ms]` for every grant
    #[serde(default)]
    pub jitter_ms: u64,

    #[serde(default)]
    pub max_per_hour: Option<u32>,

    #[serde(default)]
    pub max_per_day: Option<u32>,

    #[serde(default)]
    pub window: Option<SendWindow>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            inter_message_delay_ms: 0,
            jitter_ms: 0,
            max_per_hour: None,
            max_per_day: None,
            window: None,
        }
    }
}

const fn default_concurrency() -> usize {
    1
}

type HourKey = (NaiveDate, u32);

fn hour_key(now: NaiveDateTime) -> HourKey {
    (now.date(), now.hour())
}

/// Time left until the top of the next hour.
fn until_next_hour(now: NaiveDateTime) -> Duration {
    let elapsed = TimeDelta::seconds(i64::from(now.minute() * 60 + now.second()))
        + TimeDelta::nanoseconds(i64::from(now.nanosecond() % 1_000_000_000));
    (TimeDelta::hours(1) - elapsed).to_std().unwrap_or_default()
}

/// Time left until local midnight.
fn until_midnight(now: NaiveDateTime) -> Duration {
    now.date()
        .succ_opt()
        .map(|tomorrow| tomorrow.and_time(NaiveTime::MIN) - now)
        .and_then(|left| left.to_std().ok())
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct Usage {
    hour: Option<(HourKey, u32)>,
    day: Option<(NaiveDate, u32)>,
    last_grant: Option<Instant>,
    /// Gap drawn for the next grant, kept across cancelled acquisitions
    next_gap: Option<Duration>,
}

impl Usage {
    fn sent_this_hour(&self, now: NaiveDateTime) -> u32 {
        match self.hour {
            Some((key, count)) if key == hour_key(now) => count,
            _ => 0,
        }
    }

    fn sent_today(&self, now: NaiveDateTime) -> u32 {
        match self.day {
            Some((date, count)) if date == now.date() => count,
            _ => 0,
        }
    }

    fn record(&mut self, now: NaiveDateTime, at: Instant) {
        self.hour = Some((hour_key(now), self.sent_this_hour(now) + 1));
        self.day = Some((now.date(), self.sent_today(now) + 1));
        self.last_grant = Some(at);
        self.next_gap = None;
    }

    /// Take back a grant made at `granted`, if its hour and day are still
    /// the ones being counted.
    fn unrecord(&mut self, granted: NaiveDateTime) {
        if let Some((key, count)) = &mut self.hour
            && *key == hour_key(granted)
        {
            *count = count.saturating_sub(1);
        }
        if let Some((date, count)) = &mut self.day
            && *date == granted.date()
        {
            *count = count.saturating_sub(1);
        }
    }
}

#[derive(Debug, Error)]
pub enum PacingError {
    #[error("Pacing controller for {0} is closed")]
    Closed(Channel),
}

/// Permission to make one provider call. Dropping it frees the concurrency
/// slot.
#[derive(Debug)]
pub struct PacingToken {
    channel: Channel,
    granted_at: Instant,
    /// Local wall-clock time of the grant, for caps
    granted_local: NaiveDateTime,
    _permit: OwnedSemaphorePermit,
}

impl PacingToken {
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    pub const fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacingStats {
    pub channel: Channel,
    pub concurrency: usize,
    pub in_flight: usize,
    pub sent_this_hour: u32,
    pub sent_today: u32,
    pub max_per_hour: Option<u32>,
    pub max_per_day: Option<u32>,
    pub window_open: bool,
}

pub struct PacingController {
    channel: Channel,
    config: PacingConfig,
    concurrency: usize,
    permits: Arc<Semaphore>,
    /// Serialises the timing gate; tokio's mutex hands the lock out in FIFO
    /// order, so waiters are granted in arrival order
    gate: tokio::sync::Mutex<()>,
    usage: Mutex<Usage>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for PacingController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacingController")
            .field("channel", &self.channel)
            .field("config", &self.config)
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl PacingController {
    #[must_use]
    pub fn new(channel: Channel, config: PacingConfig) -> Self {
        Self::with_clock(channel, config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(channel: Channel, config: PacingConfig, clock: Arc<dyn Clock>) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            channel,
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
            gate: tokio::sync::Mutex::new(()),
            usage: Mutex::new(Usage::default()),
            clock,
            config,
        }
    }

    pub const fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Wait until a send is permitted.
    ///
    /// The concurrency slot is taken first, then the timing gate (window,
    /// caps, inter-message delay) is passed. Cancelling the returned future
    /// gives the slot back.
    pub async fn acquire(&self) -> Result<PacingToken, PacingError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PacingError::Closed(self.channel))?;

        let _gate = self.gate.lock().await;

        loop {
            let wait = self.next_wait();
            if wait.is_zero() {
                break;
            }

            tracing::trace!(
                channel = %self.channel,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Pacing gate holding send"
            );
            tokio::time::sleep(wait.min(MAX_SLEEP)).await;
        }

        let granted_at = Instant::now();
        let granted_local = self.clock.now();
        self.usage.lock().record(granted_local, granted_at);

        Ok(PacingToken {
            channel: self.channel,
            granted_at,
            granted_local,
            _permit: permit,
        })
    }

    /// Give a token back once its provider call has completed.
    pub fn release(&self, token: PacingToken) {
        drop(token);
    }

    /// Give a token back without having made a provider call, so it does not
    /// count against the hourly and daily caps. The inter-message gap still
    /// runs from its grant.
    pub fn forfeit(&self, token: PacingToken) {
        self.usage.lock().unrecord(token.granted_local);
        drop(token);
    }

    /// Stop handing out tokens; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.permits.close();
    }

    /// How long the gate must stay closed from now.
    fn next_wait(&self) -> Duration {
        let now = self.clock.now();
        let mut usage = self.usage.lock();

        if let Some(window) = &self.config.window {
            let wait = window.until_open(now);
            if !wait.is_zero() {
                return wait;
            }
        }

        if let Some(max) = self.config.max_per_hour
            && usage.sent_this_hour(now) >= max
        {
            return until_next_hour(now).max(Duration::from_millis(1));
        }

        if let Some(max) = self.config.max_per_day
            && usage.sent_today(now) >= max
        {
            return until_midnight(now).max(Duration::from_millis(1));
        }

        if let Some(last) = usage.last_grant {
            let gap = *usage.next_gap.get_or_insert_with(|| self.draw_gap());
            let ready_at = last + gap;
            let current = Instant::now();
            if ready_at > current {
                return ready_at - current;
            }
        }

        Duration::ZERO
    }

    fn draw_gap(&self) -> Duration {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.config.jitter_ms)
        };
        Duration::from_millis(self.config.inter_message_delay_ms.saturating_add(jitter))
    }

    #[must_use]
    pub fn stats(&self) -> PacingStats {
        let now = self.clock.now();
        let usage = self.usage.lock();

        PacingStats {
            channel: self.channel,
            concurrency: self.concurrency,
            in_flight: self
                .concurrency
                .saturating_sub(self.permits.available_permits()),
            sent_this_hour: usage.sent_this_hour(now),
            sent_today: usage.sent_today(now),
            max_per_hour: self.config.max_per_hour,
            max_per_day: self.config.max_per_day,
            window_open: self
                .config
                .window
                .is_none_or(|window| window.contains(now.time())),
        }
    }
}
