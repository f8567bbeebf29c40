//! Board snapshot persistence and display helpers.
//!
//! This module provides the `Database` struct holding every collection, its JSON
//! load/save routines, and the formatting functions used to print tables.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use chrono::{Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};
use crate::fields::*;
use crate::task::{Task, LEGACY_ARCHIVE_MARKER};
use crate::volunteer::{Completion, Volunteer};

/// Snapshot of every collection, as stored in the JSON data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub volunteers: Vec<Volunteer>,
    #[serde(default)]
    pub completions: Vec<Completion>,
}

impl Database {
    /// Load a snapshot from a JSON file. A missing file is an empty board.
    ///
    /// Unreadable or malformed files are errors rather than a fresh start, since
    /// saving over them would discard credit history.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Database::default());
        }
        let mut buf = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut buf))
            .map_err(|e| BoardError::storage_with_source(format!("reading {}", path.display()), e))?;
        let mut raw: serde_json::Value = serde_json::from_str(&buf)?;
        let migrated = fold_legacy_archive_markers(&mut raw);
        if migrated > 0 {
            tracing::info!(migrated, "folded legacy archive markers into the archived flag");
        }
        Ok(serde_json::from_value(raw)?)
    }

    /// Save the snapshot using an atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let mut f = File::create(&tmp)?;
            f.write_all(data.as_bytes())?;
            f.flush()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| BoardError::storage_with_source(format!("writing {}", path.display()), e))
    }
}

/// Fold the `[ARCHIVED] ` title prefix into the `archived` flag, returning how many
/// tasks changed.
///
/// Only tasks written before the flag existed are touched. Once a task carries
/// `archived`, its title is taken literally.
fn fold_legacy_archive_markers(raw: &mut serde_json::Value) -> usize {
    let Some(tasks) = raw.get_mut("tasks").and_then(serde_json::Value::as_array_mut) else {
        return 0;
    };
    let mut migrated = 0;
    for task in tasks.iter_mut().filter_map(serde_json::Value::as_object_mut) {
        if task.contains_key("archived") {
            continue;
        }
        let stripped = task
            .get("title")
            .and_then(serde_json::Value::as_str)
            .and_then(|title| title.strip_prefix(LEGACY_ARCHIVE_MARKER))
            .map(str::to_string);
        if let Some(title) = stripped {
            task.insert("title".into(), title.into());
            task.insert("archived".into(), true.into());
            migrated += 1;
        }
    }
    migrated
}

/// Format a task status for display.
pub fn format_status(s: Status) -> &'static str {
    match s {
        Status::Open => "Open",
        Status::InProgress => "InProgress",
        Status::Completed => "Completed",
    }
}

/// Format a zone for display.
pub fn format_zone(z: Zone) -> &'static str {
    match z {
        Zone::Woodshop => "Woodshop",
        Zone::Metalshop => "Metalshop",
        Zone::Electronics => "Electronics",
        Zone::Textiles => "Textiles",
        Zone::Printing => "3D Printing",
        Zone::Laser => "Laser",
        Zone::Kitchen => "Kitchen",
        Zone::Grounds => "Grounds",
        Zone::FrontDesk => "Front Desk",
        Zone::General => "General",
    }
}

/// Format a minute count as hours and minutes ("45m", "2h", "1h 30m").
pub fn format_minutes(minutes: u64) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

/// Format a UTC timestamp in local time.
pub fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into())
}

/// Print tasks in a formatted table, resolving assignee ids to names.
pub fn print_task_table(tasks: &[Task], volunteers: &[Volunteer]) {
    println!(
        "{:<5} {:<11} {:<12} {:<7} {:<18} {}",
        "#", "Status", "Zone", "Est", "Assigned", "Title"
    );
    for t in tasks {
        let assigned = if t.assigned_to.is_empty() {
            "-".to_string()
        } else {
            t.assigned_to
                .iter()
                .map(|id| volunteer_name(id, volunteers))
                .collect::<Vec<_>>()
                .join(",")
        };
        println!(
            "{:<5} {:<11} {:<12} {:<7} {:<18} {}",
            t.task_number,
            format_status(t.status),
            format_zone(t.zone),
            format_minutes(u64::from(t.estimated_minutes)),
            truncate(&assigned, 18),
            t.title
        );
    }
}

/// Print volunteers ranked by credited time.
pub fn print_leaderboard(volunteers: &[Volunteer]) {
    println!("{:<5} {:<24} {:<10} {}", "Rank", "Name", "Time", "Id");
    for (rank, v) in volunteers.iter().enumerate() {
        println!(
            "{:<5} {:<24} {:<10} {}",
            rank + 1,
            truncate(&v.name, 24),
            format_minutes(v.total_minutes),
            v.id
        );
    }
}

/// Print completion records with task numbers and volunteer names.
pub fn print_history(completions: &[Completion], tasks: &[Task], volunteers: &[Volunteer]) {
    println!("{:<17} {:<6} {:<20} {:<8} {}", "When", "Task", "Volunteer", "Time", "Note");
    for c in completions {
        let task = tasks
            .iter()
            .find(|t| t.id == c.task)
            .map(|t| format!("#{}", t.task_number))
            .unwrap_or_else(|| "?".into());
        println!(
            "{:<17} {:<6} {:<20} {:<8} {}",
            format_timestamp(c.created_at_utc),
            task,
            truncate(&volunteer_name(&c.volunteer, volunteers), 20),
            format_minutes(u64::from(c.actual_minutes)),
            c.note.as_deref().unwrap_or("-")
        );
    }
}

fn volunteer_name(id: &VolunteerId, volunteers: &[Volunteer]) -> String {
    volunteers
        .iter()
        .find(|v| &v.id == id)
        .map(|v| v.name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out = String::new();
        for (i, ch) in s.chars().enumerate() {
            if i + 1 >= width {
                out.push('…');
                break;
            }
            out.push(ch);
        }
        out
    }
}
