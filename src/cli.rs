//! Command-line definitions and output rendering for the `roomboard` binary.

use anyhow::Result;
use clap::{Parser, Subcommand};
use roomboard::application::commands::{
    AppState, ListBookingsResponse, RefreshSessionResponse, RosterChangeResponse,
    ScrapeWeekResponse, add_friend_impl, add_ignored_room_impl, last_snapshot_impl,
    list_bookings_impl, list_friends_impl, list_ignored_rooms_impl, refresh_session_impl,
    remove_ignored_room_impl, scrape_week_impl, session_status_impl, watch_session_impl,
};
use roomboard::application::session::{Freshness, SessionStatus};
use roomboard::domain::models::BookingSummary;
use roomboard::infrastructure::error::InfraError;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Show which friends have booked study rooms this week.
#[derive(Parser)]
#[command(name = "roomboard", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Workspace holding `config/`, `state/` and `logs/` (defaults to the current directory).
    #[arg(long, global = true, env = "ROOMBOARD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Output machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch the workweek containing the anchor and lay out friends' bookings.
    Scrape {
        /// RFC3339 instant or YYYY-MM-DD (default: now).
        #[arg(long)]
        anchor: Option<String>,
    },

    /// List friends' bookings for one room over a UTC window.
    Bookings {
        /// Room code or resource id from config/rooms.json.
        #[arg(long)]
        room: String,
        /// RFC3339 window start.
        #[arg(long)]
        start: String,
        /// RFC3339 window end.
        #[arg(long)]
        end: String,
    },

    /// Manage the friend roster.
    Friends {
        #[command(subcommand)]
        action: FriendsAction,
    },

    /// Manage rooms whose bookings raise a warning.
    Ignore {
        #[command(subcommand)]
        action: IgnoreAction,
    },

    /// Inspect or refresh the stored booking session.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Show the last scrape snapshot.
    Snapshot,
}

#[derive(Subcommand)]
pub enum FriendsAction {
    /// Add a student id (s + 7 digits).
    Add { id: String },
    /// List friend ids.
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
pub enum IgnoreAction {
    /// Add a room code (DDD.DD.DD).
    Add { code: String },
    /// Remove a room code.
    #[command(alias = "rm")]
    Remove { code: String },
    /// List ignored room codes.
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Report token freshness.
    Status,
    /// Run the refresh command now.
    Refresh,
    /// Check periodically and refresh before expiry until Ctrl-C.
    Watch,
}

pub async fn dispatch(state: &AppState, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Scrape { anchor } => {
            let response = run_command(state, "scrape_week", scrape_week_impl(state, anchor).await)?;
            if json {
                print_json(&response)?;
            } else {
                print_week(&response);
            }
        }
        Commands::Bookings { room, start, end } => {
            let response = run_command(
                state,
                "list_bookings",
                list_bookings_impl(state, room, start, end).await,
            )?;
            if json {
                print_json(&response)?;
            } else {
                print_room_bookings(&response);
            }
        }
        Commands::Friends { action } => match action {
            FriendsAction::Add { id } => {
                let response = run_command(state, "add_friend", add_friend_impl(state, id))?;
                print_change(&response, json)?;
            }
            FriendsAction::List => {
                let ids = run_command(state, "list_friends", list_friends_impl(state))?;
                print_list(&ids, "No friends configured.", json)?;
            }
        },
        Commands::Ignore { action } => match action {
            IgnoreAction::Add { code } => {
                let response =
                    run_command(state, "add_ignored_room", add_ignored_room_impl(state, code))?;
                print_change(&response, json)?;
            }
            IgnoreAction::Remove { code } => {
                let response = run_command(
                    state,
                    "remove_ignored_room",
                    remove_ignored_room_impl(state, code),
                )?;
                print_change(&response, json)?;
            }
            IgnoreAction::List => {
                let codes =
                    run_command(state, "list_ignored_rooms", list_ignored_rooms_impl(state))?;
                print_list(&codes, "No ignored rooms.", json)?;
            }
        },
        Commands::Session { action } => match action {
            SessionAction::Status => {
                let status = run_command(state, "session_status", session_status_impl(state))?;
                if json {
                    print_json(&status)?;
                } else {
                    print_status(&status);
                }
            }
            SessionAction::Refresh => {
                let response =
                    run_command(state, "refresh_session", refresh_session_impl(state).await)?;
                if json {
                    print_json(&response)?;
                } else {
                    print_refresh(&response);
                }
            }
            SessionAction::Watch => {
                let cancel = CancellationToken::new();
                let signal_cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("interrupt received; stopping session watch");
                    }
                    signal_cancel.cancel();
                });
                run_command(state, "watch_session", watch_session_impl(state, cancel).await)?;
            }
        },
        Commands::Snapshot => {
            let snapshot = run_command(state, "last_snapshot", last_snapshot_impl(state))?;
            if json {
                print_json(&snapshot)?;
            } else {
                match snapshot {
                    Some(snapshot) => {
                        println!(
                            "Week of {} (taken {})",
                            snapshot.week_monday,
                            snapshot.taken_at.to_rfc3339()
                        );
                        print_summaries(&snapshot.summaries);
                    }
                    None => println!("No scrape recorded yet."),
                }
            }
        }
    }
    Ok(())
}

fn run_command<T>(state: &AppState, command: &str, result: Result<T, InfraError>) -> Result<T> {
    result.map_err(|error| anyhow::anyhow!(state.command_error(command, &error)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_week(response: &ScrapeWeekResponse) {
    println!("{}", response.report.title);
    for warning in &response.report.warnings {
        println!("{warning}");
    }
    if response.report.summaries.is_empty() {
        println!("No friend bookings this week.");
        return;
    }

    let weekdays = ["Mon", "Tue", "Wed", "Thu", "Fri"];
    for day in &response.layout.days {
        if day.blocks.is_empty() {
            continue;
        }
        let label = weekdays.get(day.day_index as usize).copied().unwrap_or("?");
        println!("{label} ({} lane(s))", day.lane_count);
        for placed in &day.blocks {
            let marker = if placed.block.flagged { " ⚠️" } else { "" };
            println!(
                "  [{}] {}  {}{marker}",
                placed.lane_index,
                placed.block.time_label(),
                placed.block.rooms_label()
            );
        }
    }
}

fn print_room_bookings(response: &ListBookingsResponse) {
    println!(
        "{} ({}): {} friend booking(s) of {} total",
        response.room.code,
        response.room.display_name(),
        response.bookings.summaries.len(),
        response.bookings.total
    );
    print_summaries(&response.bookings.summaries);
}

fn print_summaries(summaries: &[BookingSummary]) {
    for summary in summaries {
        println!(
            "  {} – {}  {}  {}  {}",
            summary.start_local,
            summary.end_local,
            summary.room,
            summary.owner.as_deref().unwrap_or("unknown"),
            summary.title
        );
    }
}

fn print_change(response: &RosterChangeResponse, json: bool) -> Result<()> {
    if json {
        return print_json(response);
    }
    println!("{}: {:?}", response.entry, response.change);
    Ok(())
}

fn print_list(entries: &[String], empty_message: &str, json: bool) -> Result<()> {
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("{empty_message}");
    }
    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}

fn print_status(status: &SessionStatus) {
    match &status.freshness {
        Freshness::Fresh { expires_at } => println!(
            "Session fresh; expires {} ({} min left)",
            expires_at.to_rfc3339(),
            status.minutes_remaining.unwrap_or_default()
        ),
        Freshness::Stale { expires_at } => {
            println!("Session stale; expired or expiring at {}", expires_at.to_rfc3339())
        }
        Freshness::Unknown { reason } => println!("Session state unknown: {reason}"),
    }
}

fn print_refresh(response: &RefreshSessionResponse) {
    if response.refreshed {
        println!("Session refreshed.");
    } else {
        println!("Refresh failed; capture a new browser session.");
    }
    print_status(&response.status);
}
