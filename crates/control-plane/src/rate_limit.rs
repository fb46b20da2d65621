use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use axum::http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    pub reset_after: Duration,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    pub fn allowed(limit: usize, remaining: usize, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_after,
            retry_after: None,
        }
    }

    pub fn limited(limit: usize, reset_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_after,
            retry_after: Some(reset_after),
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.limit == 0 {
            return headers;
        }

        headers.insert(
            HeaderName::from_static("x-ratelimit-limit"),
            header_value(self.limit as u64),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            header_value(self.remaining as u64),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-reset"),
            header_value(duration_to_seconds(self.reset_after)),
        );
        if let Some(retry_after) = self.retry_after {
            headers.insert(RETRY_AFTER, header_value(duration_to_seconds(retry_after)));
        }

        headers
    }
}

fn header_value(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).expect("valid header value")
}

fn duration_to_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    let mut rounded = if nanos == 0 { secs } else { secs + 1 };
    if rounded == 0 {
        rounded = 1;
    }
    rounded
}

/// Sliding-window limiter keyed by agent token id.
///
/// Windows for tokens that have gone quiet are dropped lazily on
/// access, so a churning fleet does not grow the map without bound.
#[derive(Debug)]
pub struct AgentRateLimiter {
    capacity: usize,
    window: Duration,
    events: HashMap<Uuid, VecDeque<Instant>>,
}

impl AgentRateLimiter {
    pub fn per_minute(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1) as usize,
            window: Duration::from_secs(60),
            events: HashMap::new(),
        }
    }

    pub fn acquire(&mut self, token_id: Uuid) -> RateLimitDecision {
        let now = Instant::now();
        self.events
            .retain(|_, window| window.back().is_some_and(|last| now.duration_since(*last) <= self.window));

        let window_len = self.window;
        let events = self.events.entry(token_id).or_default();
        while let Some(front) = events.front() {
            if now.duration_since(*front) > window_len {
                events.pop_front();
            } else {
                break;
            }
        }

        if events.len() >= self.capacity {
            let reset_after = events
                .front()
                .map(|front| window_len.saturating_sub(now.duration_since(*front)))
                .unwrap_or(window_len);
            return RateLimitDecision::limited(self.capacity, reset_after);
        }

        events.push_back(now);
        let remaining = self.capacity.saturating_sub(events.len());
        let reset_after = events
            .front()
            .map(|front| window_len.saturating_sub(now.duration_since(*front)))
            .unwrap_or(window_len);
        RateLimitDecision::allowed(self.capacity, remaining, reset_after)
    }
}
