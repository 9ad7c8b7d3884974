//! Admin alerting over a plain JSON webhook.
//!
//! `AlertLayer` forwards ERROR-level tracing events to the configured
//! webhook, with rate limiting and deduplication so a cascading failure
//! does not flood the channel. `notify` posts ad-hoc messages (new booking,
//! cancellation) without ever blocking the request that triggered them.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Minimum gap between webhook posts.
const MIN_INTERVAL: Duration = Duration::from_secs(15);
/// Window during which a repeated error message is suppressed.
const DEDUP_WINDOW: Duration = Duration::from_secs(120);

/// Fire-and-forget webhook post. Spawned onto the runtime; failures are
/// logged and dropped.
pub fn notify(webhook_url: &str, text: &str) {
    if webhook_url.is_empty() {
        return;
    }
    let url = webhook_url.to_string();
    let body = serde_json::json!({ "text": text });
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        if let Err(e) = client.post(&url).json(&body).send().await {
            tracing::warn!("webhook notification failed: {}", e);
        }
    });
}

// ── Layer ──

pub struct AlertLayer {
    webhook_url: String,
    http: reqwest::Client,
    state: Mutex<Throttle>,
}

struct Throttle {
    last_sent: Instant,
    /// message hash → when it was last sent
    recent: HashMap<u64, Instant>,
}

impl AlertLayer {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
            state: Mutex::new(Throttle {
                last_sent: Instant::now() - MIN_INTERVAL,
                recent: HashMap::new(),
            }),
        }
    }

    fn should_send(&self, hash: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        state
            .recent
            .retain(|_, sent| now.duration_since(*sent) < DEDUP_WINDOW);

        if state.recent.contains_key(&hash) {
            return false;
        }
        if now.duration_since(state.last_sent) < MIN_INTERVAL {
            return false;
        }

        state.last_sent = now;
        state.recent.insert(hash, now);
        true
    }
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let hash = {
            let mut h = DefaultHasher::new();
            message.hash(&mut h);
            h.finish()
        };
        if !self.should_send(hash) {
            return;
        }

        let target = event.metadata().target();
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let text = format!("[navalha] ERROR {timestamp}\n{message}\n({target})");

        let url = self.webhook_url.clone();
        let client = self.http.clone();
        tokio::spawn(async move {
            let _ = client
                .post(&url)
                .json(&serde_json::json!({ "text": text }))
                .send()
                .await;
        });
    }
}

// ── Field visitor ──

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    fn message(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if self.message.is_empty() {
            extras.join(", ")
        } else {
            format!("{} ({})", self.message, extras.join(", "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        if field.name() == "message" {
            self.message = val;
        } else {
            self.fields.push((field.name().to_string(), val));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> AlertLayer {
        AlertLayer::new("https://hooks.example.com/alerts".into())
    }

    #[test]
    fn test_first_alert_allowed() {
        assert!(layer().should_send(1));
    }

    #[test]
    fn test_rate_limit_suppresses_burst() {
        let l = layer();
        assert!(l.should_send(1));
        assert!(!l.should_send(2)); // different message, too soon
    }

    #[test]
    fn test_duplicate_suppressed_past_rate_limit() {
        let l = layer();
        assert!(l.should_send(1));
        l.state.lock().unwrap().last_sent = Instant::now() - MIN_INTERVAL;
        assert!(!l.should_send(1)); // same hash within dedup window
    }

    #[test]
    fn test_new_message_allowed_past_rate_limit() {
        let l = layer();
        assert!(l.should_send(1));
        l.state.lock().unwrap().last_sent = Instant::now() - MIN_INTERVAL;
        assert!(l.should_send(2));
    }

    #[test]
    fn test_dedup_expires() {
        let l = layer();
        assert!(l.should_send(1));
        {
            let mut s = l.state.lock().unwrap();
            s.last_sent = Instant::now() - MIN_INTERVAL;
            s.recent
                .insert(1, Instant::now() - DEDUP_WINDOW - Duration::from_secs(1));
        }
        assert!(l.should_send(1));
    }

    #[test]
    fn test_visitor_combines_fields() {
        let mut v = MessageVisitor::default();
        v.message = "insert failed".into();
        v.fields.push(("appointment_id".into(), "a1".into()));
        assert_eq!(v.message(), "insert failed (appointment_id=a1)");
    }

    #[test]
    fn test_visitor_fields_only() {
        let v = MessageVisitor {
            message: String::new(),
            fields: vec![("error".into(), "timeout".into())],
        };
        assert_eq!(v.message(), "error=timeout");
    }
}
