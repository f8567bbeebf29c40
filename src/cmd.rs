//! Command implementations for the CLI interface.
//!
//! Each handler resolves its arguments (task numbers, volunteer names), calls one
//! core operation and prints the result. Errors bubble up to `main`, which prints
//! the whole chain.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Subcommand;
use clap_complete::{generate, Shell};
use tracing::warn;

use makerspace_board::config::BoardConfig;
use makerspace_board::crediting::CreditEngine;
use makerspace_board::db::*;
use makerspace_board::error::BoardError;
use makerspace_board::fanout::{follow, Dashboard, LiveList};
use makerspace_board::fields::*;
use makerspace_board::lifecycle::{TaskEngine, TaskFilter};
use makerspace_board::roster::{RosterEngine, VolunteerFilter};
use makerspace_board::store::{LocalStore, Page};
use makerspace_board::task::{Task, TaskDraft, TaskPatch};
use makerspace_board::volunteer::Volunteer;

#[derive(Subcommand)]
pub enum Commands {
    /// Post a new task.
    Add {
        /// Short title for the task.
        title: String,
        /// Estimated minutes of work.
        #[arg(long)]
        minutes: u32,
        /// Area of the space the task belongs to.
        #[arg(long, value_enum, default_value_t = Zone::General)]
        zone: Zone,
        /// Optional longer description.
        #[arg(long)]
        desc: Option<String>,
        /// Reference to a photo of the job.
        #[arg(long)]
        image: Option<String>,
        /// Assign straight away (the task starts in progress).
        #[arg(long)]
        assign: Option<String>,
    },

    /// List tasks. Shows open and in-progress tasks unless told otherwise.
    List {
        /// Include completed tasks.
        #[arg(long)]
        all: bool,
        /// Only these statuses. May be repeated.
        #[arg(long, value_enum)]
        status: Vec<Status>,
        /// Only this zone.
        #[arg(long, value_enum)]
        zone: Option<Zone>,
        /// Only tasks assigned to you.
        #[arg(long)]
        mine: bool,
        /// Sort key.
        #[arg(long, value_enum, default_value_t = SortKey::Number)]
        sort: SortKey,
        /// Limit number of rows printed.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// View a single task by number, ID or title.
    View {
        /// Task number (#N), ID or title
        task: String,
    },

    /// Change fields on a task.
    Edit {
        /// Task number (#N), ID or title
        task: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "clear_desc")]
        desc: Option<String>,
        #[arg(long)]
        clear_desc: bool,
        #[arg(long, value_enum)]
        zone: Option<Zone>,
        #[arg(long)]
        minutes: Option<u32>,
        #[arg(long, conflicts_with = "clear_image")]
        image: Option<String>,
        #[arg(long)]
        clear_image: bool,
        /// Replace the assignees. May be repeated.
        #[arg(long, conflicts_with = "unassign_all")]
        assign: Vec<String>,
        /// Remove every assignee (combine with --status open).
        #[arg(long)]
        unassign_all: bool,
        /// Set the status explicitly: open | in-progress.
        #[arg(long, value_enum)]
        status: Option<Status>,
    },

    /// Claim an open task.
    Claim {
        /// Task number (#N), ID or title
        task: String,
        /// Claim on behalf of another volunteer.
        #[arg(long = "for")]
        for_volunteer: Option<String>,
    },

    /// Give a claimed task back.
    Unclaim {
        /// Task number (#N), ID or title
        task: String,
    },

    /// Mark a task done and credit everyone who worked on it.
    Complete {
        /// Task number (#N), ID or title
        task: String,
        /// Minutes credited to each contributor.
        #[arg(long)]
        minutes: u32,
        /// Contributors. May be repeated. Defaults to you.
        #[arg(long)]
        by: Vec<String>,
        /// Note stored with each completion record.
        #[arg(long)]
        note: Option<String>,
    },

    /// Hide a task from every listing.
    Archive {
        /// Task number (#N), ID or title
        task: String,
    },

    /// Bring an archived task back.
    Unarchive {
        /// Task number (#N) or ID
        task: String,
    },

    /// Manage volunteers.
    Volunteer {
        #[command(subcommand)]
        action: VolunteerAction,
    },

    /// Show completion records, newest first.
    History {
        /// Only this task.
        #[arg(long)]
        task: Option<String>,
        /// Only this volunteer.
        #[arg(long)]
        volunteer: Option<String>,
        /// Limit number of rows printed.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete a task's completion records. Volunteer totals are not changed.
    Purge {
        /// Task number (#N) or ID
        task: String,
        /// Confirm the purge.
        #[arg(long)]
        yes: bool,
    },

    /// Follow a live view until interrupted.
    Watch {
        #[arg(long, value_enum, default_value_t = ViewKind::Board)]
        view: ViewKind,
        /// Whose dashboard to show. Defaults to you.
        #[arg(long = "for")]
        for_volunteer: Option<String>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum VolunteerAction {
    /// Register a volunteer. Registering an existing identity changes nothing.
    Register {
        /// Login reference, e.g. an email address.
        identity: String,
        /// Display name.
        name: String,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// List volunteers.
    List {
        /// Rank by credited time.
        #[arg(long)]
        leaderboard: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Zero a volunteer's credited time. Completion history is kept.
    Reset {
        volunteer: String,
    },
    /// Compare a volunteer's credited time with their completion records.
    Reconcile {
        volunteer: String,
    },
}

/// The opened data file and the engines working on it.
pub struct Board {
    store: Arc<LocalStore>,
    tasks: TaskEngine<LocalStore>,
    credits: CreditEngine<LocalStore>,
    roster: RosterEngine<LocalStore>,
    config: BoardConfig,
    acting: Option<String>,
}

impl Board {
    pub fn open(db_path: &Path, config: BoardConfig, acting: Option<String>) -> Result<Self> {
        let store = LocalStore::open(db_path, config.feed.capacity)
            .with_context(|| format!("opening board {}", db_path.display()))?;
        let store = Arc::new(store);
        let dispatcher = config.notify.dispatcher()?;
        Ok(Board {
            tasks: TaskEngine::new(store.clone(), dispatcher.clone()),
            credits: CreditEngine::new(store.clone(), dispatcher),
            roster: RosterEngine::new(store.clone()),
            store,
            config,
            acting,
        })
    }

    /// The volunteer named by `--as` / `BOARD_VOLUNTEER`.
    async fn acting(&self) -> Result<Volunteer> {
        let Some(who) = &self.acting else {
            bail!("this command needs to know who you are: pass --as <volunteer> or set BOARD_VOLUNTEER");
        };
        self.volunteer(who).await
    }

    async fn volunteer(&self, identifier: &str) -> Result<Volunteer> {
        Ok(self.roster.find_volunteer(identifier).await?)
    }

    async fn task(&self, identifier: &str) -> Result<Task> {
        Ok(self.tasks.find_task(identifier).await?)
    }

    fn volunteers(&self) -> Result<Vec<Volunteer>> {
        Ok(self.store.snapshot()?.volunteers)
    }

    /// For live-view callbacks, which cannot return an error.
    fn volunteers_or_warn(&self) -> Vec<Volunteer> {
        self.volunteers().unwrap_or_else(|e| {
            warn!(error = %e, "volunteer names unavailable, showing ids");
            Vec::new()
        })
    }
}

/// Run one subcommand against an opened board.
pub async fn run(command: Commands, board: &Board) -> Result<()> {
    match command {
        Commands::Add { title, minutes, zone, desc, image, assign } =>
            cmd_add(board, title, minutes, zone, desc, image, assign).await,
        Commands::List { all, status, zone, mine, sort, limit } =>
            cmd_list(board, all, status, zone, mine, sort, limit).await,
        Commands::View { task } => cmd_view(board, &task).await,
        Commands::Edit { task, title, desc, clear_desc, zone, minutes, image, clear_image, assign, unassign_all, status } => {
            let description = if clear_desc { Some(None) } else { desc.map(Some) };
            let image = if clear_image { Some(None) } else { image.map(Some) };
            let patch = TaskPatch { title, description, zone, estimated_minutes: minutes, image, assigned_to: None, status };
            cmd_edit(board, &task, patch, assign, unassign_all).await
        }
        Commands::Claim { task, for_volunteer } => cmd_claim(board, &task, for_volunteer).await,
        Commands::Unclaim { task } => cmd_unclaim(board, &task).await,
        Commands::Complete { task, minutes, by, note } => cmd_complete(board, &task, minutes, by, note).await,
        Commands::Archive { task } => cmd_archive(board, &task, true).await,
        Commands::Unarchive { task } => cmd_archive(board, &task, false).await,
        Commands::Volunteer { action } => cmd_volunteer(board, action).await,
        Commands::History { task, volunteer, limit } => cmd_history(board, task, volunteer, limit).await,
        Commands::Purge { task, yes } => cmd_purge(board, &task, yes).await,
        Commands::Watch { view, for_volunteer } => cmd_watch(board, view, for_volunteer).await,
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

/// Handle the add command.
pub async fn cmd_add(
    board: &Board,
    title: String,
    minutes: u32,
    zone: Zone,
    desc: Option<String>,
    image: Option<String>,
    assign: Option<String>,
) -> Result<()> {
    let creator = board.acting().await?;
    let assignee = match assign {
        Some(who) => Some(board.volunteer(&who).await?.id),
        None => None,
    };
    let draft = TaskDraft { title, description: desc, zone, estimated_minutes: minutes, image };
    let task = board.tasks.create_task(draft, &creator.id, assignee).await?;
    println!("Added task #{}: {} [{}]", task.task_number, task.title, format_status(task.status));
    Ok(())
}

/// Handle the list command.
pub async fn cmd_list(
    board: &Board,
    all: bool,
    statuses: Vec<Status>,
    zone: Option<Zone>,
    mine: bool,
    sort: SortKey,
    limit: Option<usize>,
) -> Result<()> {
    let mut filter = if !statuses.is_empty() {
        TaskFilter::admin().with_statuses(statuses)
    } else if all {
        TaskFilter::admin()
    } else {
        TaskFilter::board()
    };
    filter = filter.with_zone(zone).with_sort(sort);
    if mine {
        filter.assignee = Some(board.acting().await?.id);
    }

    let tasks = board.tasks.list_tasks(&filter, limit.map(Page::first)).await?;
    if tasks.is_empty() {
        println!("No tasks.");
    } else {
        print_task_table(&tasks, &board.volunteers()?);
    }
    Ok(())
}

/// Handle the view command.
pub async fn cmd_view(board: &Board, identifier: &str) -> Result<()> {
    let task = board.task(identifier).await?;
    let volunteers = board.volunteers()?;
    let name = |id: &VolunteerId| {
        volunteers.iter().find(|v| &v.id == id).map_or_else(|| id.to_string(), |v| v.name.clone())
    };
    let assigned = task.assigned_to.iter().map(|id| name(id)).collect::<Vec<_>>();

    println!("Task:         #{}", task.task_number);
    println!("ID:           {}", task.id);
    println!("Title:        {}", task.title);
    println!("Status:       {}{}", format_status(task.status), if task.archived { " (archived)" } else { "" });
    println!("Zone:         {}", format_zone(task.zone));
    println!("Estimate:     {}", format_minutes(u64::from(task.estimated_minutes)));
    println!("Assigned:     {}", if assigned.is_empty() { "-".into() } else { assigned.join(", ") });
    println!("Created by:   {}", name(&task.created_by));
    println!("Image:        {}", task.image.as_deref().unwrap_or("-"));
    println!("Created:      {}", format_timestamp(task.created_at_utc));
    println!("Updated:      {}", format_timestamp(task.updated_at_utc));
    println!("Description:\n{}\n", task.description.as_deref().unwrap_or("-"));

    let completions = board.roster.history(Some(&task.id), None).await?;
    if !completions.is_empty() {
        println!("Completions:");
        print_history(&completions, std::slice::from_ref(&task), &volunteers);
    }
    Ok(())
}

/// Handle the edit command.
pub async fn cmd_edit(
    board: &Board,
    identifier: &str,
    mut patch: TaskPatch,
    assign: Vec<String>,
    unassign_all: bool,
) -> Result<()> {
    let task = board.task(identifier).await?;
    if unassign_all {
        patch.assigned_to = Some(BTreeSet::new());
    } else if !assign.is_empty() {
        let mut ids = BTreeSet::new();
        for who in &assign {
            ids.insert(board.volunteer(who).await?.id);
        }
        patch.assigned_to = Some(ids);
    }
    if patch.is_empty() {
        bail!("nothing to change for task #{}", task.task_number);
    }

    let task = board.tasks.edit_task(&task.id, patch).await?;
    println!("Updated task #{}: {} [{}]", task.task_number, task.title, format_status(task.status));
    Ok(())
}

/// Handle the claim command.
pub async fn cmd_claim(board: &Board, identifier: &str, for_volunteer: Option<String>) -> Result<()> {
    let task = board.task(identifier).await?;
    let volunteer = match for_volunteer {
        Some(who) => board.volunteer(&who).await?,
        None => board.acting().await?,
    };
    let task = board.tasks.claim(&task.id, &volunteer.id).await?;
    println!("{} claimed task #{}: {}", volunteer.name, task.task_number, task.title);
    Ok(())
}

/// Handle the unclaim command.
pub async fn cmd_unclaim(board: &Board, identifier: &str) -> Result<()> {
    let task = board.task(identifier).await?;
    let task = board.tasks.unclaim(&task.id).await?;
    println!("Task #{} is open again.", task.task_number);
    Ok(())
}

/// Handle the complete command.
///
/// A partial failure is printed with the exact command that finishes the job.
pub async fn cmd_complete(
    board: &Board,
    identifier: &str,
    minutes: u32,
    by: Vec<String>,
    note: Option<String>,
) -> Result<()> {
    let task = board.task(identifier).await?;
    let mut contributors = Vec::new();
    if by.is_empty() {
        contributors.push(board.acting().await?.id);
    }
    for who in &by {
        contributors.push(board.volunteer(who).await?.id);
    }

    match board.credits.complete(&task.id, &contributors, minutes, note).await {
        Ok(outcome) => {
            println!(
                "Completed task #{}: {} volunteer(s) credited {} each.",
                outcome.task.task_number,
                outcome.completions.len(),
                format_minutes(u64::from(minutes))
            );
            Ok(())
        }
        Err(BoardError::PartialCompletionFailure { report, source }) => {
            if !report.uncredited.is_empty() {
                let rest = report
                    .uncredited
                    .iter()
                    .map(|id| format!("--by {id}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                eprintln!("To finish, run only: board complete #{} --minutes {minutes} {rest}", report.task_number);
            }
            Err(BoardError::PartialCompletionFailure { report, source }.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Handle the archive and unarchive commands.
pub async fn cmd_archive(board: &Board, identifier: &str, archive: bool) -> Result<()> {
    let task = board.task(identifier).await?;
    let task = if archive {
        board.tasks.archive_task(&task.id).await?
    } else {
        board.tasks.unarchive_task(&task.id).await?
    };
    let state = if task.archived { "archived" } else { "listed" };
    println!("Task #{} is {state}.", task.task_number);
    Ok(())
}

/// Handle volunteer management commands.
pub async fn cmd_volunteer(board: &Board, action: VolunteerAction) -> Result<()> {
    match action {
        VolunteerAction::Register { identity, name, avatar } => {
            let v = board.roster.register(&identity, &name, avatar).await?;
            println!("Volunteer {} ({}) has id {}", v.name, v.identity, v.id);
        }
        VolunteerAction::List { leaderboard, limit } => {
            let volunteers = if leaderboard {
                board.roster.leaderboard(limit).await?
            } else {
                let mut all = board.roster.list_volunteers().await?;
                all.truncate(limit.unwrap_or(usize::MAX));
                all
            };
            if volunteers.is_empty() {
                println!("No volunteers registered.");
            } else if leaderboard {
                print_leaderboard(&volunteers);
            } else {
                println!("{:<34} {:<24} {:<10} {}", "Id", "Name", "Time", "Identity");
                for v in &volunteers {
                    println!("{:<34} {:<24} {:<10} {}", v.id, truncate(&v.name, 24), format_minutes(v.total_minutes), v.identity);
                }
            }
        }
        VolunteerAction::Reset { volunteer } => {
            let v = board.volunteer(&volunteer).await?;
            let previous = v.total_minutes;
            let v = board.roster.reset_minutes(&v.id).await?;
            println!("Reset {} from {} to {}.", v.name, format_minutes(previous), format_minutes(v.total_minutes));
        }
        VolunteerAction::Reconcile { volunteer } => {
            let v = board.volunteer(&volunteer).await?;
            let r = board.roster.reconcile(&v.id).await?;
            println!("Volunteer:    {}", r.volunteer.name);
            println!("Credited:     {}", format_minutes(r.volunteer.total_minutes));
            println!("Ledger:       {} over {} completion(s)", format_minutes(r.ledger_minutes), r.completions);
            if r.is_consistent() {
                println!("Consistent.");
            } else {
                println!("Drift:        {:+} minutes", r.drift());
            }
        }
    }
    Ok(())
}

/// Handle the history command.
pub async fn cmd_history(
    board: &Board,
    task: Option<String>,
    volunteer: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let task = match task {
        Some(t) => Some(board.task(&t).await?.id),
        None => None,
    };
    let volunteer = match volunteer {
        Some(v) => Some(board.volunteer(&v).await?.id),
        None => None,
    };
    let mut records = board.roster.history(task.as_ref(), volunteer.as_ref()).await?;
    records.truncate(limit.unwrap_or(usize::MAX));
    if records.is_empty() {
        println!("No completions.");
        return Ok(());
    }
    let db = board.store.snapshot()?;
    print_history(&records, &db.tasks, &db.volunteers);
    Ok(())
}

/// Handle the purge command.
pub async fn cmd_purge(board: &Board, identifier: &str, yes: bool) -> Result<()> {
    let task = board.task(identifier).await?;
    if !yes {
        bail!(
            "purging deletes every completion record of task #{} and does not change anyone's time; rerun with --yes",
            task.task_number
        );
    }
    let removed = board.roster.purge_completions(&task.id).await?;
    println!("Removed {removed} completion record(s) from task #{}.", task.task_number);
    Ok(())
}

/// Handle the watch command: follow one live view until Ctrl-C.
pub async fn cmd_watch(board: &Board, view: ViewKind, for_volunteer: Option<String>) -> Result<()> {
    let store = board.store.as_ref();
    let retry = board.config.feed.retry_delay();
    let poller = board.store.watch_file(board.config.feed.poll_interval());

    let following = async {
        match view {
            ViewKind::Board => {
                let mut list = LiveList::new(TaskFilter::board());
                follow(store, &mut list, retry, |l: &LiveList<Task, TaskFilter>| {
                    render_tasks("Board", l.items(), &board.volunteers_or_warn());
                })
                .await;
            }
            ViewKind::Admin => {
                let mut list = LiveList::new(TaskFilter::admin());
                follow(store, &mut list, retry, |l: &LiveList<Task, TaskFilter>| {
                    render_tasks("Admin", l.items(), &board.volunteers_or_warn());
                })
                .await;
            }
            ViewKind::Dashboard => {
                let viewer = match &for_volunteer {
                    Some(who) => board.volunteer(who).await?,
                    None => board.acting().await?,
                };
                let mut dashboard = Dashboard::for_volunteer(viewer.id.clone());
                follow(store, &mut dashboard, retry, |d: &Dashboard| {
                    let volunteers = board.volunteers_or_warn();
                    render_tasks(&format!("{}: available", viewer.name), d.available.items(), &volunteers);
                    render_tasks(&format!("{}: mine", viewer.name), d.mine.items(), &volunteers);
                })
                .await;
            }
            ViewKind::Leaderboard => {
                let mut list = LiveList::new(VolunteerFilter::Leaderboard);
                follow(store, &mut list, retry, |l: &LiveList<Volunteer, VolunteerFilter>| {
                    println!("── Leaderboard · {} ──", Local::now().format("%H:%M:%S"));
                    print_leaderboard(l.items());
                    println!();
                })
                .await;
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    let outcome = tokio::select! {
        result = following => result,
        signal = tokio::signal::ctrl_c() => signal.context("waiting for Ctrl-C"),
    };
    if let Some(poller) = poller {
        poller.abort();
    }
    outcome
}

fn render_tasks(title: &str, tasks: &[Task], volunteers: &[Volunteer]) {
    println!("── {title} · {} · {} task(s) ──", Local::now().format("%H:%M:%S"), tasks.len());
    if tasks.is_empty() {
        println!("No tasks.");
    } else {
        print_task_table(tasks, volunteers);
    }
    println!();
}

/// Generate shell completions.
pub fn cmd_completions(shell: Shell) {
    use clap::CommandFactory;
    use crate::cli::Cli;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut std::io::stdout());
}
