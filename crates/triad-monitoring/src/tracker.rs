use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Clicks on one element within this window count toward rage detection.
const RAGE_CLICK_WINDOW: Duration = Duration::from_secs(2);
const RAGE_CLICK_THRESHOLD: usize = 5;

const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(1800);

struct ClickEvent {
    element: String,
    page: String,
    at: Instant,
}

/// One named user action with whatever context it was captured with.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub action_type: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

struct SessionActivity {
    user: String,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    last_touch: Instant,
    clicks: Vec<ClickEvent>,
    page_views: Vec<String>,
    actions: Vec<ActionRecord>,
}

impl SessionActivity {
    fn new(user: &str) -> Self {
        let now = Utc::now();
        Self {
            user: user.to_string(),
            started_at: now,
            last_activity: now,
            last_touch: Instant::now(),
            clicks: Vec::new(),
            page_views: Vec::new(),
            actions: Vec::new(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.last_touch = Instant::now();
    }

    fn recent_clicks_on(&self, element: &str, now: Instant, window: Duration) -> usize {
        self.clicks
            .iter()
            .filter(|click| {
                click.element == element && now.duration_since(click.at) <= window
            })
            .count()
    }
}

/// Serializable per-session roll-up for activity queries.
///
/// Clicks and page views come back as counts; actions come back in full
/// with their context.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub clicks: usize,
    pub page_views: usize,
    pub actions: Vec<ActionRecord>,
}

/// In-memory user interaction store with rage-click detection.
///
/// Sessions are created on first sight and expire after a fixed idle
/// timeout. Tracking never fails and never blocks on anything but the
/// session map lock.
pub struct InteractionTracker {
    sessions: RwLock<HashMap<String, SessionActivity>>,
    session_timeout: Duration,
}

impl InteractionTracker {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SESSION_TIMEOUT)
    }

    pub fn with_timeout(session_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            session_timeout,
        }
    }

    /// Records a click and checks for rage clicking on the element.
    pub fn track_click(&self, user: &str, session_id: &str, element: &str, page: &str) {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| new_session(user, session_id));
        session.touch();
        session.clicks.push(ClickEvent {
            element: element.to_string(),
            page: page.to_string(),
            at: now,
        });

        let burst = session.recent_clicks_on(element, now, RAGE_CLICK_WINDOW);
        if burst >= RAGE_CLICK_THRESHOLD {
            if let Some(click) = session.clicks.last() {
                warn!(
                    user,
                    session_id,
                    element,
                    page = %click.page,
                    clicks = burst,
                    "rage clicking detected, user may be frustrated"
                );
            }
        }
    }

    /// Records a page view.
    pub fn track_page_view(&self, user: &str, session_id: &str, page: &str) {
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| new_session(user, session_id));
        session.touch();
        session.page_views.push(page.to_string());
    }

    /// Records a named user action, with optional free-form context.
    pub fn track_action(&self, user: &str, session_id: &str, action: &str, context: Option<Value>) {
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| new_session(user, session_id));
        session.touch();
        session.actions.push(ActionRecord {
            action_type: action.to_string(),
            at: Utc::now(),
            context,
        });
    }

    /// Session summaries for one user, oldest session first.
    pub fn user_activity(&self, user: &str) -> Vec<SessionSummary> {
        let sessions = self.sessions.read();
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .filter(|(_, session)| session.user == user)
            .map(|(id, session)| SessionSummary {
                session_id: id.clone(),
                user: session.user.clone(),
                started_at: session.started_at,
                last_activity: session.last_activity,
                clicks: session.clicks.len(),
                page_views: session.page_views.len(),
                actions: session.actions.clone(),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.started_at);
        summaries
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drops sessions idle longer than the timeout.
    ///
    /// Returns how many sessions were removed.
    pub fn cleanup_expired_sessions(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| now.duration_since(session.last_touch) < self.session_timeout);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, "expired idle sessions");
        }
        removed
    }
}

impl Default for InteractionTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn new_session(user: &str, session_id: &str) -> SessionActivity {
    debug!(user, session_id, "session started");
    SessionActivity::new(user)
}
