//! # Makerspace Board
//!
//! Volunteer coordination for a community makerspace: staff post tasks, members
//! claim and finish them, and every finished task credits time to the volunteers
//! who did the work. Any number of views (the public board, a volunteer's
//! dashboard, the staff console) stay current by following the store's change feed.
//!
//! ## Key Features
//!
//! - **Task lifecycle**: `open ⇄ in_progress → completed`, with archival as a
//!   separate flag that hides a task from every listing
//! - **Multi-party completion**: each contributor is credited the full minutes,
//!   written one volunteer at a time, with an exact report if a write fails midway
//! - **Live views**: create/update/delete events reconciled into ordered lists,
//!   recovering from a lagging feed by refetching
//! - **Best-effort announcements**: a chat webhook (or the log) hears about new,
//!   claimed and completed tasks; delivery problems never undo a write
//! - **Local file storage**: a single JSON data file, saved atomically
//!
//! ## Quick Start
//!
//! ```bash
//! # Register yourself and post a task
//! board volunteer register ada@example.org "Ada"
//! board --as ada@example.org add "Empty the dust collector" --zone woodshop --minutes 20
//!
//! # Claim it, then finish it with a friend
//! board --as ada@example.org claim 1
//! board --as ada@example.org complete 1 --minutes 25 --with sam@example.org
//!
//! # Follow the public board live
//! board watch --view board
//! ```
//!
//! ## Layout
//!
//! - [`lifecycle`]: creation, claim/unclaim, edits, archival and task lookup
//! - [`crediting`]: completion and per-volunteer crediting
//! - [`fanout`]: live lists and the follow loop
//! - [`roster`]: volunteers, leaderboard and ledger tools
//! - [`store`]: the record store contract and the file-backed [`store::LocalStore`]
//! - [`notify`]: announcement delivery
//!
//! Data is stored in `~/.makerspace/board.json` unless `--db` or `board.toml` say otherwise.

pub mod config;
pub mod crediting;
pub mod db;
pub mod error;
pub mod fanout;
pub mod fields;
pub mod lifecycle;
pub mod notify;
pub mod roster;
pub mod store;
pub mod task;
pub mod volunteer;

#[cfg(test)]
mod testing;

pub use error::{BoardError, Result};
