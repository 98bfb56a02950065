use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use portail_types::api::MarkAllReadResponse;
use portail_types::{Notification, NotificationId, Reader};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::Session;

/// Longest slice of an error body kept in `Error::Fetch`.
const ERROR_BODY_LIMIT: usize = 256;

/// Backend REST surface for notifications.
pub trait NotificationApi: Send + Sync {
    /// `GET /api/notifications`
    fn fetch<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<Vec<Notification>>>;

    /// `POST /api/notifications/{id}/view`
    fn mark_viewed<'a>(&'a self, session: &'a Session, id: &'a NotificationId) -> BoxFuture<'a, Result<()>>;

    /// `PUT /api/notifications/mark-all-read`
    fn mark_all_read<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<MarkAllReadResponse>>;

    /// `GET /api/notifications/unreadnbr`
    fn unread_count<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<u64>>;

    /// `POST /api/notifications/{id}/mark-read-by?personnelId=`
    fn mark_read_by<'a>(&'a self, session: &'a Session, id: &'a NotificationId) -> BoxFuture<'a, Result<()>>;

    /// `POST /api/notifications/mark-all-read-by-user`
    fn mark_all_read_by_user<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<()>>;

    /// `GET /api/notifications/unread-count-for-user`
    fn unread_count_for_user<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<u64>>;
}

/// Unread count as the backend sees it for this session's reader.
pub async fn unread_for(api: &dyn NotificationApi, session: &Session) -> Result<u64> {
    match session.reader() {
        Reader::Shared => api.unread_count(session).await,
        Reader::Personnel(_) => api.unread_count_for_user(session).await,
    }
}

#[derive(Debug, Clone)]
pub struct HttpNotificationApi {
    client: Client,
    base: Url,
}

impl HttpNotificationApi {
    pub fn new(base: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, base })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.api_url.clone(), config.request_timeout)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("API URL '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["api", "notifications"])
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, session: &Session) -> Result<Response> {
        let request = match session.bearer() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let resp = request.send().await.map_err(Error::network)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Fetch {
                status: Some(status.as_u16()),
                message: truncate(&body),
            });
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let bytes = resp.bytes().await.map_err(Error::network)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            let body = String::from_utf8_lossy(&bytes);
            Error::Parse(format!("{} in '{}'", e, truncate(&body)))
        })
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

impl NotificationApi for HttpNotificationApi {
    fn fetch<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<Vec<Notification>>> {
        Box::pin(async move {
            let url = self.endpoint(&[])?;
            let resp = self.send(self.client.get(url).query(&session.query()), session).await?;
            let list: Vec<Notification> = Self::json(resp).await?;
            debug!("Fetched {} notifications for role {}", list.len(), session.role);
            Ok(list)
        })
    }

    fn mark_viewed<'a>(&'a self, session: &'a Session, id: &'a NotificationId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.endpoint(&[id.as_str(), "view"])?;
            self.send(self.client.post(url), session).await?;
            Ok(())
        })
    }

    fn mark_all_read<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<MarkAllReadResponse>> {
        Box::pin(async move {
            let body = session.mark_all_request()?;
            let url = self.endpoint(&["mark-all-read"])?;
            let resp = self.send(self.client.put(url).json(&body), session).await?;
            Self::json(resp).await
        })
    }

    fn unread_count<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let url = self.endpoint(&["unreadnbr"])?;
            let resp = self.send(self.client.get(url).query(&session.unread_query()), session).await?;
            Self::json(resp).await
        })
    }

    fn mark_read_by<'a>(&'a self, session: &'a Session, id: &'a NotificationId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let query = session.reader_query()?;
            let url = self.endpoint(&[id.as_str(), "mark-read-by"])?;
            let request = self.client.post(url).query(&[("personnelId", query.personnel_id.as_str())]);
            self.send(request, session).await?;
            Ok(())
        })
    }

    fn mark_all_read_by_user<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let query = session.reader_query()?;
            let url = self.endpoint(&["mark-all-read-by-user"])?;
            self.send(self.client.post(url).query(&query), session).await?;
            Ok(())
        })
    }

    fn unread_count_for_user<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let query = session.reader_query()?;
            let url = self.endpoint(&["unread-count-for-user"])?;
            let resp = self.send(self.client.get(url).query(&query), session).await?;
            Self::json(resp).await
        })
    }
}
