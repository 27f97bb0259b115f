use crate::application::session::{NowProvider, SessionMonitor};
use crate::domain::models::{
    BookingSummary, FriendSpec, IgnoreList, Interval, Room, WORKWEEK_DAYS, WeekWindow,
};
use crate::domain::week::{resolve_workweek, week_title};
use crate::infrastructure::booking_client::BookingClient;
use crate::infrastructure::booking_mapper::{match_friend, summarize_booking};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_refresher::SessionRefresher;
use crate::infrastructure::snapshot_repository::{ScrapeSnapshot, SnapshotRepository};
use crate::infrastructure::token_source::TokenSource;
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{Duration as TokioDuration, sleep};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Per-run inputs, loaded fresh from the roster store before each run.
#[derive(Debug, Clone, Default)]
pub struct AggregationInputs {
    pub rooms: Vec<Room>,
    pub friends: FriendSpec,
    pub ignore: IgnoreList,
}

impl AggregationInputs {
    pub fn ensure_roster(&self) -> Result<(), InfraError> {
        if self.rooms.is_empty() {
            return Err(InfraError::Precondition(
                "room roster is empty; add room ids and codes to config/rooms.json first".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekReport {
    pub title: String,
    pub window: WeekWindow,
    pub summaries: Vec<BookingSummary>,
    pub events: Vec<Interval>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomBookings {
    pub summaries: Vec<BookingSummary>,
    /// Bookings the API returned before friend filtering.
    pub total: usize,
}

pub struct BookingAggregator<C, S>
where
    C: BookingClient,
    S: SnapshotRepository,
{
    client: Arc<C>,
    snapshots: Arc<S>,
    tz: Tz,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
}

impl<C, S> BookingAggregator<C, S>
where
    C: BookingClient,
    S: SnapshotRepository,
{
    pub fn new(client: Arc<C>, snapshots: Arc<S>, tz: Tz) -> Self {
        Self {
            client,
            snapshots,
            tz,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Friend bookings of one room over `[start, end]`.
    pub async fn list_room_bookings(
        &self,
        access_token: &str,
        room: &Room,
        friends: &FriendSpec,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RoomBookings, InfraError> {
        let records = self
            .list_bookings_with_retry(access_token, &room.id, start, end)
            .await?;
        let total = records.len();

        let mut summaries = Vec::new();
        for record in &records {
            let Some(source) = match_friend(record, friends) else {
                continue;
            };
            tracing::trace!(room = %room.code, ?source, "friend booking matched");
            summaries.push(summarize_booking(record, room, self.tz)?);
        }
        Ok(RoomBookings { summaries, total })
    }

    /// Fetch every roster room for `window`; the first room failure aborts the run.
    pub async fn aggregate(
        &self,
        access_token: &str,
        inputs: &AggregationInputs,
        window: &WeekWindow,
    ) -> Result<WeekReport, InfraError> {
        inputs.ensure_roster()?;

        let mut summaries = Vec::new();
        for room in &inputs.rooms {
            let fetched = self
                .list_room_bookings(access_token, room, &inputs.friends, window.start_utc, window.end_utc)
                .await
                .map_err(|source| {
                    tracing::error!(room = %room.code, error = %source, "room fetch failed");
                    InfraError::RoomFetch {
                        room: room.code.clone(),
                        source: Box::new(source),
                    }
                })?;
            tracing::info!(
                room = %room.code,
                matched = fetched.summaries.len(),
                total = fetched.total,
                "room bookings fetched"
            );
            summaries.extend(fetched.summaries);
        }

        let (events, warnings) = summaries_to_events(&summaries, &inputs.ignore, self.tz);
        for warning in &warnings {
            tracing::warn!(%warning, "booking in ignored room");
        }

        self.snapshots.save(&ScrapeSnapshot {
            week_monday: window.monday_date,
            summaries: summaries.clone(),
            taken_at: (self.now_provider)(),
        })?;

        Ok(WeekReport {
            title: week_title(window),
            window: window.clone(),
            summaries,
            events,
            warnings,
        })
    }

    async fn list_bookings_with_retry(
        &self,
        access_token: &str,
        room_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self
                .client
                .list_bookings(access_token, room_id, start, end)
                .await
            {
                Ok(records) => return Ok(records),
                Err(error) if error.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    tracing::debug!(room_id, attempt, delay_ms = delay, %error, "retrying booking fetch");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn local_hour(value: DateTime<Tz>) -> f64 {
    f64::from(value.hour()) + f64::from(value.minute()) / 60.0
}

/// Workweek calendar events plus ignore-room warnings for `summaries`.
///
/// Weekend bookings produce neither. Bookings whose local end is not after
/// their local start (e.g. crossing midnight) get a warning if flagged but no event.
pub fn summaries_to_events(
    summaries: &[BookingSummary],
    ignore: &IgnoreList,
    tz: Tz,
) -> (Vec<Interval>, Vec<String>) {
    let mut events = Vec::new();
    let mut warnings = Vec::new();

    for summary in summaries {
        let start_local = summary.starts_at.with_timezone(&tz);
        let end_local = summary.ends_at.with_timezone(&tz);
        let day_index = start_local.weekday().num_days_from_monday() as u8;
        if day_index >= WORKWEEK_DAYS {
            continue;
        }

        let flagged = ignore.contains(summary.room_code.as_deref());
        if flagged {
            warnings.push(format!(
                "⚠️ IGNORE-ROOM: {} booked {} ({}) {}–{}",
                summary.owner.as_deref().unwrap_or("unknown"),
                summary.room_code.as_deref().unwrap_or("?"),
                summary.room,
                start_local.format("%a %d %b %H:%M"),
                end_local.format("%H:%M"),
            ));
        }

        match Interval::new(
            day_index,
            local_hour(start_local),
            local_hour(end_local),
            summary.room_code.clone(),
            flagged,
        ) {
            Ok(interval) => events.push(interval),
            Err(reason) => {
                tracing::debug!(title = %summary.title, %reason, "booking skipped from calendar events");
            }
        }
    }

    (events, warnings)
}

/// Resolves the workweek, gates on session freshness, then aggregates.
pub struct WeekScraper<C, S, T, R>
where
    C: BookingClient,
    S: SnapshotRepository,
    T: TokenSource,
    R: SessionRefresher,
{
    aggregator: BookingAggregator<C, S>,
    monitor: Arc<SessionMonitor<T, R>>,
    token_source: Arc<T>,
}

impl<C, S, T, R> WeekScraper<C, S, T, R>
where
    C: BookingClient,
    S: SnapshotRepository,
    T: TokenSource + 'static,
    R: SessionRefresher + 'static,
{
    pub fn new(
        aggregator: BookingAggregator<C, S>,
        monitor: Arc<SessionMonitor<T, R>>,
        token_source: Arc<T>,
    ) -> Self {
        Self {
            aggregator,
            monitor,
            token_source,
        }
    }

    pub fn aggregator(&self) -> &BookingAggregator<C, S> {
        &self.aggregator
    }

    /// Bearer token for a fetch, after the synchronous freshness check.
    pub fn usable_token(&self) -> Result<String, InfraError> {
        let freshness = self.monitor.ensure_usable()?;
        tracing::debug!(?freshness, "session freshness checked");
        self.token_source.load_token()?.ok_or_else(|| {
            InfraError::Credential("no session token stored; capture a browser session first".to_string())
        })
    }

    pub async fn scrape(
        &self,
        inputs: &AggregationInputs,
        anchor: DateTime<Utc>,
    ) -> Result<WeekReport, InfraError> {
        inputs.ensure_roster()?;
        let window = resolve_workweek(anchor);
        let token = self.usable_token()?;
        tracing::info!(
            week_monday = %window.monday_date,
            rooms = inputs.rooms.len(),
            "scraping workweek"
        );
        self.aggregator.aggregate(&token, inputs, &window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::MonitorConfig;
    use crate::infrastructure::session_refresher::DisabledSessionRefresher;
    use crate::infrastructure::snapshot_repository::InMemorySnapshotRepository;
    use crate::infrastructure::token_source::InMemoryTokenSource;
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::Duration;
    use serde_json::json;
    use std::collections::{BTreeSet, HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MELBOURNE: Tz = chrono_tz::Australia::Melbourne;

    enum FakeResponse {
        Records(Vec<serde_json::Value>),
        NetworkError,
        Upstream(u16),
    }

    #[derive(Default)]
    struct FakeBookingClient {
        responses: Mutex<HashMap<String, VecDeque<FakeResponse>>>,
        calls: AtomicUsize,
    }

    impl FakeBookingClient {
        fn with(responses: Vec<(&str, FakeResponse)>) -> Self {
            let mut by_room: HashMap<String, VecDeque<FakeResponse>> = HashMap::new();
            for (room_id, response) in responses {
                by_room.entry(room_id.to_string()).or_default().push_back(response);
            }
            Self {
                responses: Mutex::new(by_room),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BookingClient for FakeBookingClient {
        async fn list_bookings(
            &self,
            _access_token: &str,
            room_id: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<serde_json::Value>, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .responses
                .lock()
                .expect("lock responses")
                .get_mut(room_id)
                .and_then(VecDeque::pop_front);
            match next {
                Some(FakeResponse::Records(records)) => Ok(records),
                Some(FakeResponse::NetworkError) => {
                    Err(InfraError::Network("connection reset".to_string()))
                }
                Some(FakeResponse::Upstream(status)) => Err(InfraError::Upstream {
                    status,
                    body: "denied".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn fixed_now() -> DateTime<Utc> {
        at("2025-08-13T02:00:00Z")
    }

    fn room(id: &str, code: &str, name: &str) -> Room {
        Room {
            id: id.to_string(),
            code: code.to_string(),
            name: name.to_string(),
        }
    }

    fn booking(owner: &str, start: &str, end: &str) -> serde_json::Value {
        json!({
            "Name": "Study Room Booking",
            "Owner": owner,
            "StartDateTime": start,
            "EndDateTime": end
        })
    }

    fn inputs() -> AggregationInputs {
        AggregationInputs {
            rooms: vec![
                room("room-a", "010.05.68", "Swanston Rm 5.68"),
                room("room-b", "080.10.04", "Building 80 Rm 10.04"),
            ],
            friends: FriendSpec {
                ids: BTreeSet::from(["s4166573".to_string()]),
                ..FriendSpec::default()
            },
            ignore: IgnoreList {
                rooms: BTreeSet::from(["080.10.04".to_string()]),
            },
        }
    }

    fn aggregator(
        client: &Arc<FakeBookingClient>,
        snapshots: &Arc<InMemorySnapshotRepository>,
    ) -> BookingAggregator<FakeBookingClient, InMemorySnapshotRepository> {
        BookingAggregator::new(Arc::clone(client), Arc::clone(snapshots), MELBOURNE)
            .with_now_provider(Arc::new(fixed_now))
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
            })
    }

    fn summary(room_code: &str, starts_at: &str, ends_at: &str) -> BookingSummary {
        BookingSummary {
            title: "Booking".to_string(),
            room: "Rm".to_string(),
            room_code: Some(room_code.to_string()),
            start_local: String::new(),
            end_local: String::new(),
            starts_at: at(starts_at),
            ends_at: at(ends_at),
            owner: Some("s4166573".to_string()),
            email: None,
        }
    }

    #[tokio::test]
    async fn empty_roster_fails_before_any_fetch() {
        let client = Arc::new(FakeBookingClient::default());
        let snapshots = Arc::new(InMemorySnapshotRepository::default());
        let error = aggregator(&client, &snapshots)
            .aggregate("token", &AggregationInputs::default(), &resolve_workweek(fixed_now()))
            .await
            .expect_err("empty roster");
        assert!(matches!(error, InfraError::Precondition(_)));
        assert_eq!(client.calls(), 0);
        assert!(snapshots.load().expect("load").is_none());
    }

    #[tokio::test]
    async fn aggregate_builds_events_warnings_title_and_snapshot() {
        let client = Arc::new(FakeBookingClient::with(vec![
            (
                "room-a",
                FakeResponse::Records(vec![
                    booking("s4166573", "2025-08-10T23:00:00Z", "2025-08-11T00:30:00Z"),
                    booking("s0000000", "2025-08-11T01:00:00Z", "2025-08-11T02:00:00Z"),
                ]),
            ),
            (
                "room-b",
                FakeResponse::Records(vec![booking(
                    "S4166573",
                    "2025-08-10T23:00:00Z",
                    "2025-08-11T00:30:00Z",
                )]),
            ),
        ]));
        let snapshots = Arc::new(InMemorySnapshotRepository::default());
        let window = resolve_workweek(fixed_now());

        let report = aggregator(&client, &snapshots)
            .aggregate("token", &inputs(), &window)
            .await
            .expect("aggregate");

        assert_eq!(report.title, "Week of 11–15 Aug 2025");
        assert_eq!(report.summaries.len(), 2);
        assert_eq!(report.events.len(), 2);
        let room_a = &report.events[0];
        assert_eq!(
            (room_a.day_index, room_a.start_hour, room_a.end_hour, room_a.flagged),
            (0, 9.0, 10.5, false)
        );
        assert!(report.events[1].flagged);
        assert_eq!(
            report.warnings,
            vec!["⚠️ IGNORE-ROOM: S4166573 booked 080.10.04 (Building 80 Rm 10.04) Mon 11 Aug 09:00–10:30"
                .to_string()]
        );

        let snapshot = snapshots.load().expect("load").expect("snapshot saved");
        assert_eq!(snapshot.week_monday, window.monday_date);
        assert_eq!(snapshot.summaries, report.summaries);
        assert_eq!(snapshot.taken_at, fixed_now());
    }

    #[tokio::test]
    async fn network_errors_are_retried() {
        let client = Arc::new(FakeBookingClient::with(vec![
            ("room-a", FakeResponse::NetworkError),
            (
                "room-a",
                FakeResponse::Records(vec![booking(
                    "s4166573",
                    "2025-08-11T23:00:00Z",
                    "2025-08-12T00:00:00Z",
                )]),
            ),
        ]));
        let snapshots = Arc::new(InMemorySnapshotRepository::default());
        let report = aggregator(&client, &snapshots)
            .aggregate("token", &inputs(), &resolve_workweek(fixed_now()))
            .await
            .expect("aggregate after retry");
        assert_eq!(report.summaries.len(), 1);
        assert_eq!(report.events[0].day_index, 1);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn upstream_failure_aborts_run_without_snapshot() {
        let client = Arc::new(FakeBookingClient::with(vec![("room-b", FakeResponse::Upstream(401))]));
        let snapshots = Arc::new(InMemorySnapshotRepository::default());
        let error = aggregator(&client, &snapshots)
            .aggregate("token", &inputs(), &resolve_workweek(fixed_now()))
            .await
            .expect_err("room b fails");
        match error {
            InfraError::RoomFetch { room, source } => {
                assert_eq!(room, "080.10.04");
                assert!(matches!(*source, InfraError::Upstream { status: 401, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.calls(), 2);
        assert!(snapshots.load().expect("load").is_none());
    }

    #[tokio::test]
    async fn list_room_bookings_reports_unfiltered_total() {
        let client = Arc::new(FakeBookingClient::with(vec![(
            "room-a",
            FakeResponse::Records(vec![
                booking("s4166573", "2025-08-10T23:00:00Z", "2025-08-11T00:00:00Z"),
                booking("s1111111", "2025-08-10T23:00:00Z", "2025-08-11T00:00:00Z"),
                booking("s2222222", "2025-08-10T23:00:00Z", "2025-08-11T00:00:00Z"),
            ]),
        )]));
        let snapshots = Arc::new(InMemorySnapshotRepository::default());
        let listed = aggregator(&client, &snapshots)
            .list_room_bookings(
                "token",
                &inputs().rooms[0],
                &inputs().friends,
                at("2025-08-10T00:00:00Z"),
                at("2025-08-12T00:00:00Z"),
            )
            .await
            .expect("list");
        assert_eq!(listed.total, 3);
        assert_eq!(listed.summaries.len(), 1);
        assert_eq!(listed.summaries[0].start_local, "Mon 11 Aug 2025 09:00");
    }

    #[test]
    fn weekend_bookings_stay_out_of_events_and_warnings() {
        let ignore = inputs().ignore;
        let (events, warnings) = summaries_to_events(
            &[summary("080.10.04", "2025-08-15T23:00:00Z", "2025-08-16T00:00:00Z")],
            &ignore,
            MELBOURNE,
        );
        assert!(events.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn midnight_crossing_booking_is_skipped_from_events() {
        let (events, warnings) = summaries_to_events(
            &[summary("080.10.04", "2025-08-11T12:00:00Z", "2025-08-11T15:00:00Z")],
            &inputs().ignore,
            MELBOURNE,
        );
        assert!(events.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    fn jwt_expiring_in(seconds: i64) -> String {
        let payload = json!({ "exp": (fixed_now() + Duration::seconds(seconds)).timestamp() });
        format!("h.{}.s", URL_SAFE_NO_PAD.encode(payload.to_string()))
    }

    fn scraper(
        client: &Arc<FakeBookingClient>,
        token: Option<&str>,
    ) -> WeekScraper<FakeBookingClient, InMemorySnapshotRepository, InMemoryTokenSource, DisabledSessionRefresher>
    {
        let snapshots = Arc::new(InMemorySnapshotRepository::default());
        let tokens = Arc::new(InMemoryTokenSource::new(token));
        let monitor = Arc::new(
            SessionMonitor::new(
                Arc::clone(&tokens),
                Arc::new(DisabledSessionRefresher),
                MonitorConfig::default(),
            )
            .with_now_provider(Arc::new(fixed_now)),
        );
        WeekScraper::new(aggregator(client, &snapshots), monitor, tokens)
    }

    #[tokio::test]
    async fn stale_session_blocks_scrape_before_fetching() {
        let client = Arc::new(FakeBookingClient::default());
        let token = jwt_expiring_in(120);
        let error = scraper(&client, Some(&token))
            .scrape(&inputs(), fixed_now())
            .await
            .expect_err("stale session");
        assert!(matches!(error, InfraError::SessionExpired { .. }));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn fresh_session_scrapes_resolved_week() {
        let client = Arc::new(FakeBookingClient::default());
        let token = jwt_expiring_in(3_600);
        let report = scraper(&client, Some(&token))
            .scrape(&inputs(), at("2025-08-16T10:00:00Z"))
            .await
            .expect("scrape");
        assert_eq!(report.title, "Week of 18–22 Aug 2025");
        assert!(report.summaries.is_empty());
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn missing_token_passes_gate_but_cannot_fetch() {
        let client = Arc::new(FakeBookingClient::default());
        let error = scraper(&client, None)
            .scrape(&inputs(), fixed_now())
            .await
            .expect_err("no token");
        assert!(matches!(error, InfraError::Credential(_)));
        assert_eq!(client.calls(), 0);
    }
}
