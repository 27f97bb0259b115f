use crate::application::aggregation::{
    AggregationInputs, BookingAggregator, RoomBookings, WeekReport, WeekScraper,
};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::session::{MonitorConfig, SessionMonitor, SessionStatus};
use crate::domain::layout::{WeekLayout, layout_week};
use crate::domain::models::{Room, RosterChange, normalize_friend_id, validate_room_code};
use crate::infrastructure::booking_client::ReqwestBookingClient;
use crate::infrastructure::config::{
    AppSettings, JsonRosterStore, RosterStore, apply_env_overrides, load_app_settings,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_refresher::ConfiguredRefresher;
use crate::infrastructure::snapshot_repository::{
    ScrapeSnapshot, SnapshotRepository, SqliteSnapshotRepository,
};
use crate::infrastructure::token_source::StorageStateTokenSource;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;
type Monitor = SessionMonitor<StorageStateTokenSource, ConfiguredRefresher>;
type Scraper =
    WeekScraper<ReqwestBookingClient, SqliteSnapshotRepository, StorageStateTokenSource, ConfiguredRefresher>;

pub struct AppState {
    workspace_root: PathBuf,
    config_dir: PathBuf,
    database_path: PathBuf,
    roster: Arc<dyn RosterStore>,
    snapshots: Arc<SqliteSnapshotRepository>,
    env_lookup: EnvLookup,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self {
            roster: Arc::new(JsonRosterStore::new(&bootstrap.config_dir)),
            snapshots: Arc::new(SqliteSnapshotRepository::new(&bootstrap.database_path)),
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            workspace_root,
            env_lookup: Arc::new(|key| std::env::var(key).ok()),
        })
    }

    pub fn with_env_lookup(mut self, env_lookup: EnvLookup) -> Self {
        self.env_lookup = env_lookup;
        self
    }

    pub fn with_roster_store(mut self, roster: Arc<dyn RosterStore>) -> Self {
        self.roster = roster;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Log a failed command and return the message shown to the caller.
    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::error!(command, %error, "command failed");
        error.to_string()
    }

    /// Settings are re-read on every command so config edits apply without restart.
    pub fn settings(&self) -> Result<AppSettings, InfraError> {
        let lookup = Arc::clone(&self.env_lookup);
        apply_env_overrides(load_app_settings(&self.config_dir)?, move |key| lookup(key))
    }

    fn token_source(&self, settings: &AppSettings) -> StorageStateTokenSource {
        StorageStateTokenSource::new(
            settings.resolved_storage_state_path(&self.workspace_root),
            settings.booking_origin.clone(),
            settings.session_storage_key.clone(),
        )
    }

    fn monitor(&self, settings: &AppSettings) -> Monitor {
        SessionMonitor::new(
            Arc::new(self.token_source(settings)),
            Arc::new(ConfiguredRefresher::from_settings(
                &settings.session.refresh_command,
                &self.workspace_root,
            )),
            MonitorConfig::from(&settings.session),
        )
    }

    fn scraper(&self, settings: &AppSettings) -> Result<Scraper, InfraError> {
        let aggregator = BookingAggregator::new(
            Arc::new(ReqwestBookingClient::new(settings.api_host.clone())),
            Arc::clone(&self.snapshots),
            settings.tz()?,
        );
        Ok(WeekScraper::new(
            aggregator,
            Arc::new(self.monitor(settings)),
            Arc::new(self.token_source(settings)),
        ))
    }

    fn aggregation_inputs(&self) -> Result<AggregationInputs, InfraError> {
        Ok(AggregationInputs {
            rooms: self.roster.load_rooms()?,
            friends: self.roster.load_friends()?,
            ignore: self.roster.load_ignore_list()?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeWeekResponse {
    #[serde(flatten)]
    pub report: WeekReport,
    pub layout: WeekLayout,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListBookingsResponse {
    pub room: Room,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(flatten)]
    pub bookings: RoomBookings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterChangeResponse {
    pub entry: String,
    pub change: RosterChange,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSessionResponse {
    pub refreshed: bool,
    pub status: SessionStatus,
}

pub async fn scrape_week_impl(
    state: &AppState,
    anchor: Option<String>,
) -> Result<ScrapeWeekResponse, InfraError> {
    let settings = state.settings()?;
    let anchor = match anchor {
        Some(raw) => parse_anchor(&raw)?,
        None => Utc::now(),
    };
    let inputs = state.aggregation_inputs()?;
    let report = state.scraper(&settings)?.scrape(&inputs, anchor).await?;
    let layout = layout_week(&report.events, settings.visible_hours);
    tracing::info!(
        command = "scrape_week",
        summaries = report.summaries.len(),
        events = report.events.len(),
        warnings = report.warnings.len(),
        "week scraped"
    );
    Ok(ScrapeWeekResponse { report, layout })
}

pub async fn list_bookings_impl(
    state: &AppState,
    room: String,
    start: String,
    end: String,
) -> Result<ListBookingsResponse, InfraError> {
    let settings = state.settings()?;
    let start = parse_utc(&start, "start")?;
    let end = parse_utc(&end, "end")?;
    if end <= start {
        return Err(InfraError::InvalidConfig("end must be after start".to_string()));
    }

    let room_key = room.trim();
    let room = state
        .roster
        .load_rooms()?
        .into_iter()
        .find(|candidate| candidate.code == room_key || candidate.id == room_key)
        .ok_or_else(|| {
            InfraError::Precondition(format!("room '{room_key}' is not in config/rooms.json"))
        })?;
    let friends = state.roster.load_friends()?;

    let scraper = state.scraper(&settings)?;
    let token = scraper.usable_token()?;
    let bookings = scraper
        .aggregator()
        .list_room_bookings(&token, &room, &friends, start, end)
        .await?;
    tracing::info!(
        command = "list_bookings",
        room = %room.code,
        matched = bookings.summaries.len(),
        total = bookings.total,
        "room bookings listed"
    );
    Ok(ListBookingsResponse {
        room,
        start,
        end,
        bookings,
    })
}

pub fn add_friend_impl(state: &AppState, friend_id: String) -> Result<RosterChangeResponse, InfraError> {
    let entry = normalize_friend_id(&friend_id).map_err(InfraError::InvalidConfig)?;
    let mut friends = state.roster.load_friends()?;
    let normalized: BTreeSet<String> = friends.normalized_ids().into_iter().collect();
    let rewritten = normalized != friends.ids;
    friends.ids = normalized;

    let change = if friends.ids.insert(entry.clone()) {
        RosterChange::Added
    } else {
        RosterChange::AlreadyPresent
    };
    if rewritten || change == RosterChange::Added {
        state.roster.save_friends(&friends)?;
    }
    tracing::info!(command = "add_friend", %entry, ?change, "friend roster updated");
    Ok(RosterChangeResponse { entry, change })
}

pub fn list_friends_impl(state: &AppState) -> Result<Vec<String>, InfraError> {
    let ids: BTreeSet<String> = state.roster.load_friends()?.normalized_ids().into_iter().collect();
    Ok(ids.into_iter().collect())
}

pub fn add_ignored_room_impl(state: &AppState, room_code: String) -> Result<RosterChangeResponse, InfraError> {
    let entry = room_code.trim().to_string();
    validate_room_code(&entry).map_err(InfraError::InvalidConfig)?;
    let mut ignore = state.roster.load_ignore_list()?;
    let change = if ignore.rooms.insert(entry.clone()) {
        state.roster.save_ignore_list(&ignore)?;
        RosterChange::Added
    } else {
        RosterChange::AlreadyPresent
    };
    tracing::info!(command = "add_ignored_room", %entry, ?change, "ignore list updated");
    Ok(RosterChangeResponse { entry, change })
}

pub fn remove_ignored_room_impl(
    state: &AppState,
    room_code: String,
) -> Result<RosterChangeResponse, InfraError> {
    let entry = room_code.trim().to_string();
    validate_room_code(&entry).map_err(InfraError::InvalidConfig)?;
    let mut ignore = state.roster.load_ignore_list()?;
    let change = if ignore.rooms.remove(&entry) {
        state.roster.save_ignore_list(&ignore)?;
        RosterChange::Removed
    } else {
        RosterChange::NotPresent
    };
    tracing::info!(command = "remove_ignored_room", %entry, ?change, "ignore list updated");
    Ok(RosterChangeResponse { entry, change })
}

pub fn list_ignored_rooms_impl(state: &AppState) -> Result<Vec<String>, InfraError> {
    Ok(state.roster.load_ignore_list()?.rooms.into_iter().collect())
}

pub fn session_status_impl(state: &AppState) -> Result<SessionStatus, InfraError> {
    let settings = state.settings()?;
    Ok(state.monitor(&settings).status())
}

pub async fn refresh_session_impl(state: &AppState) -> Result<RefreshSessionResponse, InfraError> {
    let settings = state.settings()?;
    let monitor = state.monitor(&settings);
    let refreshed = monitor.refresh_now().await?;
    if refreshed {
        tracing::info!(command = "refresh_session", "session refreshed");
    } else {
        tracing::warn!(command = "refresh_session", "refresh attempt failed; a new login may be needed");
    }
    Ok(RefreshSessionResponse {
        refreshed,
        status: monitor.status(),
    })
}

/// Run the periodic refresh loop until `cancel` fires.
pub async fn watch_session_impl(state: &AppState, cancel: CancellationToken) -> Result<(), InfraError> {
    let settings = state.settings()?;
    state.monitor(&settings).run(cancel).await;
    Ok(())
}

pub fn last_snapshot_impl(state: &AppState) -> Result<Option<ScrapeSnapshot>, InfraError> {
    state.snapshots.load()
}

fn parse_utc(value: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::InvalidConfig(format!("{field_name} must be RFC3339 ('{value}'): {error}"))
        })
}

/// RFC3339 instant, or a bare `YYYY-MM-DD` read as midnight UTC.
fn parse_anchor(value: &str) -> Result<DateTime<Utc>, InfraError> {
    if let Ok(date) = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    parse_utc(value, "anchor")
}
