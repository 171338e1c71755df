//! Scheduler, backfill, and incremental-poll passes of the feedback daemon.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Datelike, Local, Utc};
use sfd_client::{
    fetch_buyer, render_message, send_feedback_request, ApiConfig, HttpApi, LztApi, RequestPacer,
    SoldItemsPager,
};
use sfd_core::{ItemId, UserId};
use sfd_store::ContactedStore;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "sfd-daemon";

pub const DEFAULT_API_URL: &str = "https://prod-api.lzt.market";
pub const DEFAULT_FORUM_URL: &str = "https://prod-api.lolz.live";

pub const DEFAULT_MESSAGE_TEMPLATE: &str = "Thank you for choosing us! If you have a minute, \
we would really appreciate an honest review - it helps other buyers. If anything is wrong, \
message us right away and we will fix it. Link: {item_url}";

/// Daemon settings, read once at startup. Every knob except the token has a
/// default; unparseable numeric overrides fall back to it.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub token: String,
    pub api_url: String,
    pub forum_url: String,
    pub recency_window: Duration,
    pub check_interval: Duration,
    pub request_delay: Duration,
    pub log_file: PathBuf,
    pub http_timeout: Duration,
    pub max_pages: u32,
    pub message_template: String,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("LZT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .context("LZT_TOKEN must be set to the marketplace API token")?;

        Ok(Self {
            token,
            api_url: env_or("SFD_API_URL", DEFAULT_API_URL),
            forum_url: env_or("SFD_FORUM_URL", DEFAULT_FORUM_URL),
            recency_window: Duration::from_secs(
                env_parse("SFD_RECENCY_WINDOW_DAYS", 30u64) * 24 * 60 * 60,
            ),
            check_interval: Duration::from_secs(env_parse("SFD_CHECK_INTERVAL_SECS", 300)),
            request_delay: Duration::from_millis(env_parse("SFD_REQUEST_DELAY_MS", 500)),
            log_file: PathBuf::from(env_or("SFD_BUYERS_LOG", "buyers.log")),
            http_timeout: Duration::from_secs(env_parse("SFD_HTTP_TIMEOUT_SECS", 30)),
            max_pages: env_parse("SFD_MAX_PAGES", 200),
            message_template: env_or("SFD_MESSAGE_TEMPLATE", DEFAULT_MESSAGE_TEMPLATE),
        })
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            api_url: self.api_url.clone(),
            forum_url: self.forum_url.clone(),
            token: self.token.clone(),
            timeout: self.http_timeout,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Time source for the recency window and the daily-rollover rule.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    /// Day-of-year in local time; the backfill runs once per value change.
    fn local_day_of_year(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_day_of_year(&self) -> u32 {
        Local::now().ordinal()
    }
}

/// Outcome of one seeding pass over the recency window.
#[derive(Debug, Clone)]
pub struct BackfillSummary {
    pub run_id: Uuid,
    pub items_seen: usize,
    pub buyers_seeded: usize,
    pub known_buyers: usize,
    pub lookup_failures: usize,
}

/// Outcome of one incremental pass over the newest sales page.
#[derive(Debug, Clone)]
pub struct PollSummary {
    pub run_id: Uuid,
    pub sales_seen: usize,
    pub skipped_out_of_window: usize,
    pub skipped_known: usize,
    pub sent: usize,
    pub send_failures: usize,
    pub lookup_failures: usize,
    pub log_failures: usize,
}

impl PollSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            sales_seen: 0,
            skipped_out_of_window: 0,
            skipped_known: 0,
            sent: 0,
            send_failures: 0,
            lookup_failures: 0,
            log_failures: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickSummary {
    pub backfill: Option<BackfillSummary>,
    pub poll: PollSummary,
}

/// Single-threaded driver owning the contacted set and the daily/periodic
/// cadence. Component failures are logged inside the passes and never end
/// the loop.
pub struct Scheduler<A: LztApi, C: Clock> {
    api: A,
    clock: C,
    pacer: RequestPacer,
    store: ContactedStore,
    contacted: HashSet<UserId>,
    config: DaemonConfig,
    last_refresh_day: Option<u32>,
}

impl<A: LztApi, C: Clock> Scheduler<A, C> {
    pub fn new(
        api: A,
        clock: C,
        store: ContactedStore,
        contacted: HashSet<UserId>,
        pacer: RequestPacer,
        config: DaemonConfig,
    ) -> Self {
        Self {
            api,
            clock,
            pacer,
            store,
            contacted,
            config,
            last_refresh_day: None,
        }
    }

    pub fn contacted(&self) -> &HashSet<UserId> {
        &self.contacted
    }

    fn since_ts(&self) -> i64 {
        self.clock.now_utc().timestamp() - self.config.recency_window.as_secs() as i64
    }

    fn item_url(&self, item_id: &ItemId) -> String {
        format!("{}/{}", self.config.api_url, item_id)
    }

    /// Seed the contacted set from every sale still inside the window.
    ///
    /// No messages are sent and nothing is persisted; the pass keeps a fresh
    /// or long-idle daemon from flooding historical buyers on its next poll.
    pub async fn run_backfill(&mut self) -> BackfillSummary {
        let run_id = Uuid::new_v4();
        let since_ts = self.since_ts();
        info!(%run_id, since_ts, "backfill pass starting");

        let pager = SoldItemsPager::new(&self.api, self.pacer, since_ts, self.config.max_pages);
        let item_ids = pager.collect().await;

        let mut summary = BackfillSummary {
            run_id,
            items_seen: item_ids.len(),
            buyers_seeded: 0,
            known_buyers: 0,
            lookup_failures: 0,
        };

        for item_id in &item_ids {
            match fetch_buyer(&self.api, &self.pacer, item_id).await {
                Some(user_id) => {
                    if self.contacted.insert(user_id) {
                        summary.buyers_seeded += 1;
                    } else {
                        summary.known_buyers += 1;
                    }
                }
                None => summary.lookup_failures += 1,
            }
        }

        info!(
            %run_id,
            items = summary.items_seen,
            seeded = summary.buyers_seeded,
            known = summary.known_buyers,
            failures = summary.lookup_failures,
            contacted = self.contacted.len(),
            "backfill pass complete"
        );
        summary
    }

    /// One incremental pass over page 1 of the sold-items stream, messaging
    /// buyers not seen before. A successful send commits the buyer to the
    /// set and then the log; a failed send leaves no state, so the buyer is
    /// retried on the next tick.
    pub async fn run_poll(&mut self) -> PollSummary {
        let run_id = Uuid::new_v4();
        let mut summary = PollSummary::new(run_id);
        let since_ts = self.since_ts();

        let result = self.api.sold_payments_page(1).await;
        self.pacer.pace().await;
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(%run_id, error = %err, "failed to fetch the newest sales page");
                return summary;
            }
        };

        for sale in page.sales() {
            summary.sales_seen += 1;
            if sale.operation_date < since_ts {
                summary.skipped_out_of_window += 1;
                continue;
            }
            let Some(item_id) = sale.item_id.clone() else {
                continue;
            };
            let Some(user_id) = fetch_buyer(&self.api, &self.pacer, &item_id).await else {
                summary.lookup_failures += 1;
                continue;
            };
            if self.contacted.contains(&user_id) {
                summary.skipped_known += 1;
                continue;
            }

            info!(%run_id, user_id, %item_id, "new buyer, sending review request");
            let body = render_message(&self.config.message_template, &self.item_url(&item_id));
            if send_feedback_request(&self.api, &self.pacer, user_id, &body).await {
                summary.sent += 1;
                self.contacted.insert(user_id);
                if let Err(err) = self.store.append(user_id).await {
                    summary.log_failures += 1;
                    warn!(user_id, error = %err, "failed to append buyer to the contacted log");
                }
            } else {
                summary.send_failures += 1;
            }
        }

        info!(
            %run_id,
            sales = summary.sales_seen,
            sent = summary.sent,
            known = summary.skipped_known,
            send_failures = summary.send_failures,
            "poll pass complete"
        );
        summary
    }

    /// One scheduler iteration: backfill when the local day has changed
    /// since the last one (including the first tick after startup), then
    /// the incremental poll.
    pub async fn tick(&mut self) -> TickSummary {
        let today = self.clock.local_day_of_year();
        let backfill = if self.last_refresh_day != Some(today) {
            let summary = self.run_backfill().await;
            self.last_refresh_day = Some(today);
            Some(summary)
        } else {
            None
        };
        let poll = self.run_poll().await;
        TickSummary { backfill, poll }
    }

    /// Drive the loop forever. Only a process signal ends it; per-pass
    /// errors are already swallowed inside `tick`.
    pub async fn run(&mut self) {
        info!(
            contacted = self.contacted.len(),
            interval_secs = self.config.check_interval.as_secs(),
            "feedback daemon loop starting"
        );
        loop {
            self.tick().await;
            tokio::time::sleep(self.config.check_interval).await;
        }
    }
}

/// Wire the production scheduler: load the contacted log, build the HTTP
/// client, and hand everything to one `Scheduler` value.
pub async fn build_scheduler(config: DaemonConfig) -> anyhow::Result<Scheduler<HttpApi, SystemClock>> {
    let store = ContactedStore::new(&config.log_file);
    let contacted = store.load().await?;
    info!(
        count = contacted.len(),
        path = %config.log_file.display(),
        "loaded contacted buyers from log"
    );

    let api = HttpApi::new(config.api_config())?;
    let pacer = RequestPacer::new(config.request_delay);
    Ok(Scheduler::new(api, SystemClock, store, contacted, pacer, config))
}
