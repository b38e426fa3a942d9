//! Log group viewing with optional follow.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::kernel::constants::POLL_INTERVAL;
use crate::kernel::error::{Error, Result};
use crate::provider::error::ApiResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub stream: String,
    pub message: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEventsPage {
    pub events: Vec<LogEvent>,
    pub next_token: Option<String>,
}

/// Raw log service API.
#[async_trait]
pub trait LogsApi: Send + Sync {
    /// Events in `group` at or after `start_time` (ms) matching `filter`, interleaved across streams.
    async fn filter_log_events(
        &self,
        group: &str,
        start_time: i64,
        filter: &str,
        next_token: Option<String>,
    ) -> ApiResult<LogEventsPage>;
}

pub type LogCallback<'a> = &'a (dyn Fn(&LogEvent) + Send + Sync);

#[async_trait]
pub trait LogsViewer: Send + Sync {
    /// Deliver events from the last `search_duration` to `callback`; with `follow`,
    /// keep polling for new events until the task is dropped.
    async fn view_logs(
        &self,
        group: &str,
        search_duration: Duration,
        follow: bool,
        filter: &str,
        callback: LogCallback<'_>,
    ) -> Result<()>;
}

pub struct CloudLogsViewer {
    api: Arc<dyn LogsApi>,
    poll_interval: Duration,
}

impl CloudLogsViewer {
    pub fn new(api: Arc<dyn LogsApi>) -> Self {
        Self {
            api,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Deliver every event newer than `watermark`, returning the new watermark.
    pub(crate) async fn poll_once(
        &self,
        group: &str,
        watermark: i64,
        filter: &str,
        callback: LogCallback<'_>,
    ) -> Result<i64> {
        debug!("Searching for logs in log_group '{group}' after time '{watermark}' and filter '{filter}'");
        let mut latest = watermark;
        let mut next_token = None;
        loop {
            let page = self
                .api
                .filter_log_events(group, watermark + 1, filter, next_token)
                .await
                .map_err(|e| Error::provider("FilterLogEvents", group, e))?;

            for event in &page.events {
                latest = latest.max(event.timestamp);
                callback(event);
            }

            next_token = page.next_token;
            if next_token.is_none() {
                return Ok(latest);
            }
        }
    }
}

#[async_trait]
impl LogsViewer for CloudLogsViewer {
    async fn view_logs(
        &self,
        group: &str,
        search_duration: Duration,
        follow: bool,
        filter: &str,
        callback: LogCallback<'_>,
    ) -> Result<()> {
        let lookback = i64::try_from(search_duration.as_millis()).unwrap_or(i64::MAX);
        let mut watermark = Utc::now().timestamp_millis().saturating_sub(lookback);
        loop {
            watermark = self.poll_once(group, watermark, filter, callback).await?;
            if !follow {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
