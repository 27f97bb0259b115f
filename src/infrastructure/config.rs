use crate::domain::models::{FriendSpec, IgnoreList, Room, UnknownTokenPolicy, VisibleHours};
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const APP_JSON: &str = "app.json";
const ROOMS_JSON: &str = "rooms.json";
const FRIENDS_JSON: &str = "friends.json";
const IGNORE_ROOMS_JSON: &str = "ignore_rooms.json";
const SCHEMA_VERSION: u64 = 1;

pub const DEFAULT_TIMEZONE: &str = "Australia/Melbourne";
pub const DEFAULT_API_HOST: &str = "cyon-syd-v4-api-d1-03.azurewebsites.net";
pub const DEFAULT_BOOKING_ORIGIN: &str = "https://resourcebooker.rmit.edu.au";
pub const DEFAULT_SESSION_STORAGE_KEY: &str = "scientia-session-authorization";
pub const DEFAULT_STORAGE_STATE_PATH: &str = ".secrets/storage_state.json";

pub const TIMEZONE_ENV: &str = "ROOMBOARD_TIMEZONE";
pub const STORAGE_STATE_ENV: &str = "ROOMBOARD_STORAGE_STATE";
pub const API_HOST_ENV: &str = "ROOMBOARD_API_HOST";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub freshness_margin_seconds: i64,
    pub refresh_threshold_minutes: i64,
    pub check_interval_minutes: u64,
    pub unknown_token_policy: UnknownTokenPolicy,
    /// Program and arguments of the external refresh action; empty disables refresh.
    pub refresh_command: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            freshness_margin_seconds: 300,
            refresh_threshold_minutes: 30,
            check_interval_minutes: 30,
            unknown_token_policy: UnknownTokenPolicy::OptimisticFresh,
            refresh_command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub timezone: String,
    pub api_host: String,
    pub booking_origin: String,
    pub session_storage_key: String,
    pub storage_state_path: PathBuf,
    pub visible_hours: VisibleHours,
    pub session: SessionSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
            api_host: DEFAULT_API_HOST.to_string(),
            booking_origin: DEFAULT_BOOKING_ORIGIN.to_string(),
            session_storage_key: DEFAULT_SESSION_STORAGE_KEY.to_string(),
            storage_state_path: PathBuf::from(DEFAULT_STORAGE_STATE_PATH),
            visible_hours: VisibleHours::default(),
            session: SessionSettings::default(),
        }
    }
}

impl AppSettings {
    pub fn tz(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{}': {error}", self.timezone))
        })
    }

    pub fn validate(&self) -> Result<(), InfraError> {
        self.tz()?;
        self.visible_hours
            .validate()
            .map_err(InfraError::InvalidConfig)?;
        if self.api_host.trim().is_empty() {
            return Err(InfraError::InvalidConfig("apiHost must not be empty".to_string()));
        }
        if self.session.freshness_margin_seconds < 0 {
            return Err(InfraError::InvalidConfig(
                "session.freshnessMarginSeconds must not be negative".to_string(),
            ));
        }
        if self.session.check_interval_minutes == 0 {
            return Err(InfraError::InvalidConfig(
                "session.checkIntervalMinutes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Relative storage-state paths resolve against the workspace root.
    pub fn resolved_storage_state_path(&self, workspace_root: &Path) -> PathBuf {
        if self.storage_state_path.is_absolute() {
            self.storage_state_path.clone()
        } else {
            workspace_root.join(&self.storage_state_path)
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "timezone": DEFAULT_TIMEZONE,
                "apiHost": DEFAULT_API_HOST,
                "bookingOrigin": DEFAULT_BOOKING_ORIGIN,
                "sessionStorageKey": DEFAULT_SESSION_STORAGE_KEY,
                "storageStatePath": DEFAULT_STORAGE_STATE_PATH,
                "visibleHours": { "min": 8.0, "max": 20.0 },
                "session": {
                    "freshnessMarginSeconds": 300,
                    "refreshThresholdMinutes": 30,
                    "checkIntervalMinutes": 30,
                    "unknownTokenPolicy": "optimistic_fresh",
                    "refreshCommand": []
                }
            }),
        ),
        (
            ROOMS_JSON,
            serde_json::json!({
                "schema": 1,
                "rooms": []
            }),
        ),
        (
            FRIENDS_JSON,
            serde_json::json!({
                "schema": 1,
                "ids": [],
                "matchFields": ["Owner", "BookerEmailAddress", "BookerName", "Reference"]
            }),
        ),
        (
            IGNORE_ROOMS_JSON,
            serde_json::json!({
                "schema": 1,
                "rooms": []
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SCHEMA_VERSION {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn write_config<T: Serialize>(path: &Path, value: &T) -> Result<(), InfraError> {
    let mut document = serde_json::to_value(value)?;
    let object = document.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure for {}", path.display()))
    })?;
    object.insert("schema".to_string(), serde_json::Value::from(SCHEMA_VERSION));
    let formatted = serde_json::to_string_pretty(&document)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

pub fn load_app_settings(config_dir: &Path) -> Result<AppSettings, InfraError> {
    let path = config_dir.join(APP_JSON);
    let settings: AppSettings = serde_json::from_value(read_config(&path)?)?;
    settings.validate()?;
    Ok(settings)
}

pub fn apply_env_overrides<F>(mut settings: AppSettings, lookup: F) -> Result<AppSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(timezone) = optional_lookup_value(&lookup, TIMEZONE_ENV) {
        settings.timezone = timezone;
    }
    if let Some(path) = optional_lookup_value(&lookup, STORAGE_STATE_ENV) {
        settings.storage_state_path = PathBuf::from(path);
    }
    if let Some(host) = optional_lookup_value(&lookup, API_HOST_ENV) {
        settings.api_host = host;
    }
    settings.validate()?;
    Ok(settings)
}

fn optional_lookup_value<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read/write access to the room roster, friend list and ignore list.
///
/// Every call goes back to the backing store so edits made between runs are
/// picked up without a restart.
pub trait RosterStore: Send + Sync {
    fn load_rooms(&self) -> Result<Vec<Room>, InfraError>;
    fn load_friends(&self) -> Result<FriendSpec, InfraError>;
    fn save_friends(&self, friends: &FriendSpec) -> Result<(), InfraError>;
    fn load_ignore_list(&self) -> Result<IgnoreList, InfraError>;
    fn save_ignore_list(&self, ignore: &IgnoreList) -> Result<(), InfraError>;
}

#[derive(Debug, Deserialize)]
struct RoomsFile {
    #[serde(default)]
    rooms: Vec<Room>,
}

#[derive(Debug, Clone)]
pub struct JsonRosterStore {
    config_dir: PathBuf,
}

impl JsonRosterStore {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }
}

impl RosterStore for JsonRosterStore {
    fn load_rooms(&self) -> Result<Vec<Room>, InfraError> {
        let path = self.config_dir.join(ROOMS_JSON);
        let file: RoomsFile = serde_json::from_value(read_config(&path)?)?;
        for room in &file.rooms {
            room.validate().map_err(|error| {
                InfraError::InvalidConfig(format!("{error} in {}", path.display()))
            })?;
        }
        Ok(file.rooms)
    }

    fn load_friends(&self) -> Result<FriendSpec, InfraError> {
        let path = self.config_dir.join(FRIENDS_JSON);
        Ok(serde_json::from_value(read_config(&path)?)?)
    }

    fn save_friends(&self, friends: &FriendSpec) -> Result<(), InfraError> {
        write_config(&self.config_dir.join(FRIENDS_JSON), friends)
    }

    fn load_ignore_list(&self) -> Result<IgnoreList, InfraError> {
        let path = self.config_dir.join(IGNORE_ROOMS_JSON);
        Ok(serde_json::from_value(read_config(&path)?)?)
    }

    fn save_ignore_list(&self, ignore: &IgnoreList) -> Result<(), InfraError> {
        write_config(&self.config_dir.join(IGNORE_ROOMS_JSON), ignore)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRosterStore {
    rooms: Mutex<Vec<Room>>,
    friends: Mutex<FriendSpec>,
    ignore: Mutex<IgnoreList>,
}

impl InMemoryRosterStore {
    pub fn new(rooms: Vec<Room>, friends: FriendSpec, ignore: IgnoreList) -> Self {
        Self {
            rooms: Mutex::new(rooms),
            friends: Mutex::new(friends),
            ignore: Mutex::new(ignore),
        }
    }
}

fn lock_poisoned(error: impl std::fmt::Display) -> InfraError {
    InfraError::InvalidConfig(format!("roster lock poisoned: {error}"))
}

impl RosterStore for InMemoryRosterStore {
    fn load_rooms(&self) -> Result<Vec<Room>, InfraError> {
        Ok(self.rooms.lock().map_err(lock_poisoned)?.clone())
    }

    fn load_friends(&self) -> Result<FriendSpec, InfraError> {
        Ok(self.friends.lock().map_err(lock_poisoned)?.clone())
    }

    fn save_friends(&self, friends: &FriendSpec) -> Result<(), InfraError> {
        *self.friends.lock().map_err(lock_poisoned)? = friends.clone();
        Ok(())
    }

    fn load_ignore_list(&self) -> Result<IgnoreList, InfraError> {
        Ok(self.ignore.lock().map_err(lock_poisoned)?.clone())
    }

    fn save_ignore_list(&self, ignore: &IgnoreList) -> Result<(), InfraError> {
        *self.ignore.lock().map_err(lock_poisoned)? = ignore.clone();
        Ok(())
    }
}
