//! Fixtures shared by the unit tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;

use portail_types::api::MarkAllReadResponse;
use portail_types::{Notification, NotificationId, Reader, Role};

use crate::api::NotificationApi;
use crate::error::{Error, Result};
use crate::session::Session;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

/// Admin notification `id`, `ts_secs` after a fixed base time.
pub fn notification(id: u64, ts_secs: i64, viewed: bool) -> Notification {
    let mut n = Notification::new(
        id,
        format!("notification {}", id),
        Role::admin(),
        base_time() + chrono::Duration::seconds(ts_secs),
    );
    n.viewed = viewed;
    n
}

/// In-memory [`NotificationApi`] that records what it was asked.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    notifications: Vec<Notification>,
    view_failure: Option<u16>,
    fail_all: bool,
    views: Vec<NotificationId>,
    fetches: usize,
    mark_all_calls: usize,
    read_by_calls: Vec<(NotificationId, String)>,
    fetch_gate: Option<Arc<Notify>>,
    view_gate: Option<Arc<Notify>>,
}

impl FakeApi {
    pub fn with(notifications: Vec<Notification>) -> Self {
        let api = Self::default();
        api.state.lock().notifications = notifications;
        api
    }

    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        self.state.lock().notifications = notifications;
    }

    /// Make `mark_viewed` answer with this status (None = succeed).
    pub fn fail_views(&self, status: Option<u16>) {
        self.state.lock().view_failure = status;
    }

    /// Make every call fail with a 500.
    pub fn fail_all(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    /// Hold `fetch` until the returned handle is notified.
    pub fn gate_fetch(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().fetch_gate = Some(gate.clone());
        gate
    }

    /// Hold the next view call (either endpoint) until the handle is
    /// notified. Later calls go straight through.
    pub fn gate_next_view(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().view_gate = Some(gate.clone());
        gate
    }

    /// Notifications as the fake backend currently holds them.
    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.clone()
    }

    pub fn read_by_calls(&self) -> Vec<(NotificationId, String)> {
        self.state.lock().read_by_calls.clone()
    }

    pub fn view_calls(&self) -> Vec<NotificationId> {
        self.state.lock().views.clone()
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().fetches
    }

    pub fn mark_all_calls(&self) -> usize {
        self.state.lock().mark_all_calls
    }
}

fn server_error() -> Error {
    Error::Fetch { status: Some(500), message: "Internal Server Error".into() }
}

impl NotificationApi for FakeApi {
    fn fetch<'a>(&'a self, _session: &'a Session) -> BoxFuture<'a, Result<Vec<Notification>>> {
        Box::pin(async move {
            let gate = {
                let mut state = self.state.lock();
                state.fetches += 1;
                state.fetch_gate.clone()
            };
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let state = self.state.lock();
            if state.fail_all {
                return Err(server_error());
            }
            Ok(state.notifications.clone())
        })
    }

    fn mark_viewed<'a>(&'a self, _session: &'a Session, id: &'a NotificationId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let gate = {
                let mut state = self.state.lock();
                state.views.push(id.clone());
                state.view_gate.take()
            };
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let mut state = self.state.lock();
            state.view_outcome()?;
            if let Some(n) = state.notifications.iter_mut().find(|n| &n.id == id) {
                n.viewed = true;
            }
            Ok(())
        })
    }

    fn mark_all_read<'a>(&'a self, _session: &'a Session) -> BoxFuture<'a, Result<MarkAllReadResponse>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            state.mark_all_calls += 1;
            if state.fail_all {
                return Err(server_error());
            }
            let mut updated = 0;
            for n in state.notifications.iter_mut().filter(|n| !n.viewed) {
                n.viewed = true;
                updated += 1;
            }
            Ok(MarkAllReadResponse {
                message: "All notifications marked as read".into(),
                updated_count: updated,
            })
        })
    }

    fn unread_count<'a>(&'a self, _session: &'a Session) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let state = self.state.lock();
            if state.fail_all {
                return Err(server_error());
            }
            Ok(state.notifications.iter().filter(|n| !n.viewed).count() as u64)
        })
    }

    fn mark_read_by<'a>(&'a self, session: &'a Session, id: &'a NotificationId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let personnel = session.reader_query()?.personnel_id;
            let gate = {
                let mut state = self.state.lock();
                state.read_by_calls.push((id.clone(), personnel.clone()));
                state.view_gate.take()
            };
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let mut state = self.state.lock();
            state.view_outcome()?;
            if let Some(n) = state.notifications.iter_mut().find(|n| &n.id == id) {
                n.mark_read(&Reader::Personnel(personnel));
            }
            Ok(())
        })
    }

    fn mark_all_read_by_user<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let reader = Reader::Personnel(session.reader_query()?.personnel_id);
            let mut state = self.state.lock();
            state.mark_all_calls += 1;
            if state.fail_all {
                return Err(server_error());
            }
            for n in state.notifications.iter_mut() {
                n.mark_read(&reader);
            }
            Ok(())
        })
    }

    fn unread_count_for_user<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let reader = Reader::Personnel(session.reader_query()?.personnel_id);
            let state = self.state.lock();
            if state.fail_all {
                return Err(server_error());
            }
            Ok(state.notifications.iter().filter(|n| !n.is_read(&reader)).count() as u64)
        })
    }
}

impl FakeState {
    fn view_outcome(&self) -> Result<()> {
        if self.fail_all {
            return Err(server_error());
        }
        if let Some(status) = self.view_failure {
            return Err(Error::Fetch { status: Some(status), message: "rejected".into() });
        }
        Ok(())
    }
}
