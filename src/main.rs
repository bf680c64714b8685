// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod tools;

use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use aleph_board::{Board, BoardError};
use aleph_config::{AlephHome, Config, ALEPH_AGENT_ID_ENV};
use aleph_core::{
    spawn_idle_pump, Activity, AgentEvent, Harness, MailHook, PushDispatcher, SessionLifecycle,
};
use aleph_fs::{watch_dir, WatchOptions};
use aleph_gate::{Arbiter, ClassifierRegistry, PermissionHook, PermissionRequest};
use aleph_hooks::{HookBus, HookEvent, HookKind};
use aleph_mail::{Channels, Draft, Inbox};
use aleph_runtime::{RuntimeClient, SubprocessClient};
use aleph_team::{allocate_agent_id, spawn_heartbeat, AgentRecord, Registry};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("aleph: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = aleph_config::load(cli.config.as_deref())?;
    if let Some(mode) = cli.mode {
        config.agent.mode = mode.into();
    }
    let home = AlephHome::resolve(&config);
    home.ensure_layout()
        .with_context(|| format!("creating home layout at {}", home.root().display()))?;

    if let Some(command) = &cli.command {
        init_cli_logging(cli.verbose);
        return run_command(command, &config, &home);
    }

    run_session(cli, config, home).await
}

// ── Subcommands ───────────────────────────────────────────────────────────────

fn run_command(command: &Commands, config: &Config, home: &AlephHome) -> anyhow::Result<u8> {
    match command {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(config).unwrap_or_default());
            Ok(0)
        }

        Commands::Send {
            recipient,
            summary,
            body,
            channel,
            priority,
            from,
        } => {
            let sender = from
                .clone()
                .or_else(|| std::env::var(ALEPH_AGENT_ID_ENV).ok().filter(|v| !v.is_empty()))
                .unwrap_or_else(|| "user".to_string());
            let body = body.clone().unwrap_or_default();
            if *channel {
                let channels = Channels::new(home.clone(), config.mail.history_retention);
                let receipt =
                    channels.broadcast(&sender, recipient, summary, &body, (*priority).into())?;
                println!(
                    "broadcast to {}: {} delivered, {} failed",
                    recipient,
                    receipt.delivered.len(),
                    receipt.failed.len()
                );
                for (agent, error) in &receipt.failed {
                    eprintln!("  {agent}: {error}");
                }
            } else {
                let inbox = Inbox::new(home.clone());
                let draft = Draft::new(&sender, summary.clone())
                    .priority((*priority).into())
                    .body(body);
                let id = inbox.deliver(recipient, draft)?;
                println!("{id}");
            }
            Ok(0)
        }

        Commands::Inbox { agent } => {
            let Some(agent) = agent
                .clone()
                .or_else(|| std::env::var(ALEPH_AGENT_ID_ENV).ok().filter(|v| !v.is_empty()))
            else {
                eprintln!("aleph: no agent id (pass --agent or set {ALEPH_AGENT_ID_ENV})");
                return Ok(1);
            };
            let inbox = Inbox::new(home.clone());
            for msg in inbox.list_unread(&agent)? {
                println!(
                    "{}  [{}] from {}: {}",
                    msg.message_id, msg.priority, msg.from, msg.summary
                );
            }
            Ok(0)
        }

        Commands::Agents => {
            let registry = Registry::new(
                home.clone(),
                Duration::from_secs(config.agent.stale_after_secs),
            );
            for record in registry.list_alive()? {
                println!(
                    "{}  pid={} depth={} mode={} project={}",
                    record.agent_id, record.pid, record.depth, record.mode, record.project_path
                );
            }
            Ok(0)
        }

        Commands::Tasks { command } => run_tasks_command(command, config),
    }
}

fn run_tasks_command(command: &cli::TasksCommands, config: &Config) -> anyhow::Result<u8> {
    use cli::TasksCommands;

    let board = Board::new(std::path::PathBuf::from(&config.board.file));
    let caller = || {
        std::env::var(ALEPH_AGENT_ID_ENV)
            .ok()
            .filter(|v| !v.is_empty())
    };
    match command {
        TasksCommands::List => {
            for task in flatten_tasks(&board.list()?.tasks) {
                let assignee = task.assignee.as_deref().unwrap_or("-");
                println!(
                    "{:<8} {:<12} {:<10} {}",
                    task.id, task.status, assignee, task.description
                );
            }
            Ok(0)
        }
        TasksCommands::Claim { task_id, agent } => {
            let Some(agent) = agent.clone().or_else(caller) else {
                eprintln!("aleph: no agent id (pass --agent or set {ALEPH_AGENT_ID_ENV})");
                return Ok(1);
            };
            match board.claim(task_id, &agent) {
                Ok(()) => Ok(0),
                Err(e @ (BoardError::NotFound(_) | BoardError::AlreadyClaimed { .. })) => {
                    eprintln!("aleph: {e}");
                    Ok(1)
                }
                Err(e) => Err(e.into()),
            }
        }
        TasksCommands::Status { task_id, status } => {
            match board.set_status(task_id, (*status).into()) {
                Ok(()) => Ok(0),
                Err(e @ (BoardError::NotFound(_) | BoardError::InvalidTransition { .. })) => {
                    eprintln!("aleph: {e}");
                    Ok(1)
                }
                Err(e) => Err(e.into()),
            }
        }
        TasksCommands::Release { task_id, agent } => {
            let Some(agent) = agent.clone().or_else(caller) else {
                eprintln!("aleph: no agent id (pass --agent or set {ALEPH_AGENT_ID_ENV})");
                return Ok(1);
            };
            match board.release(task_id, &agent) {
                Ok(()) => Ok(0),
                Err(e @ (BoardError::NotFound(_) | BoardError::NotAssignee { .. })) => {
                    eprintln!("aleph: {e}");
                    Ok(1)
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

/// Depth-first flattening for the board listing.
fn flatten_tasks(tasks: &[aleph_board::Task]) -> Vec<&aleph_board::Task> {
    let mut out = Vec::new();
    for task in tasks {
        out.push(task);
        out.extend(flatten_tasks(&task.subtasks));
    }
    out
}

// ── Interactive session ───────────────────────────────────────────────────────

async fn run_session(cli: Cli, config: Config, home: AlephHome) -> anyhow::Result<u8> {
    let agent_id = cli.id.clone().unwrap_or_else(allocate_agent_id);
    init_session_logging(&home, &agent_id, cli.verbose)?;
    std::env::set_var(ALEPH_AGENT_ID_ENV, &agent_id);

    let project = cli
        .project
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let mode = config.agent.mode;
    info!(agent_id = %agent_id, %mode, "starting session");

    // Registry row + heartbeat.
    let record = AgentRecord::for_current_process(
        &agent_id,
        cli.parent.clone(),
        cli.depth,
        project.to_string_lossy().into_owned(),
        mode,
        cli.ephemeral,
    );
    let registry = Arc::new(Registry::new(
        home.clone(),
        Duration::from_secs(config.agent.stale_after_secs),
    ));
    registry.announce(&record)?;
    let heartbeat = spawn_heartbeat(
        registry.clone(),
        agent_id.clone(),
        Duration::from_secs(config.agent.heartbeat_secs),
    );

    // Coordination fabric.
    let inbox = Inbox::new(home.clone());
    let dispatcher = Arc::new(Mutex::new(PushDispatcher::new(inbox, agent_id.clone())));
    let activity = Arc::new(Mutex::new(Activity::new()));

    let (arbiter, ui_rx) = Arbiter::new(mode, ClassifierRegistry::default());
    let mut bus = HookBus::new();
    bus.register(
        HookKind::PreToolUse,
        Arc::new(PermissionHook::new(arbiter.clone())),
    );
    let mail_hook = Arc::new(MailHook::new(dispatcher.clone()));
    bus.register(HookKind::PostToolUse, mail_hook.clone());
    bus.register(HookKind::Stop, mail_hook);
    let bus = Arc::new(bus);

    let client: Arc<dyn RuntimeClient> =
        Arc::new(SubprocessClient::new(config.runtime.clone(), &agent_id));
    let harness = Harness::new(
        &agent_id,
        client.clone(),
        bus.clone(),
        dispatcher.clone(),
        activity.clone(),
    );

    // Terminal plumbing: one stdin router feeds either a pending
    // permission prompt or the user-turn queue.
    let pending_prompt: Arc<Mutex<Option<PermissionRequest>>> = Arc::new(Mutex::new(None));
    spawn_permission_prompt(ui_rx, pending_prompt.clone());
    let (user_tx, mut user_rx) = mpsc::channel::<String>(16);
    if !cli.detach {
        spawn_stdin_router(pending_prompt, user_tx);
    }

    // Idle wake-ups from the inbox watcher.
    let watcher = watch_dir(
        &home.inbox_dir(&agent_id),
        WatchOptions {
            debounce: Duration::from_millis(config.mail.watch_debounce_ms),
            rescan: Duration::from_secs(config.mail.rescan_secs),
        },
    )?;
    let (inject_tx, mut inject_rx) = mpsc::channel::<String>(16);
    spawn_idle_pump(watcher, dispatcher, activity.clone(), inject_tx);

    // UI event drain (the real renderer is an external concern).
    let (ev_tx, ev_rx) = mpsc::channel::<AgentEvent>(256);
    spawn_event_printer(ev_rx);

    // Session start: hooks, then the assembled first-turn context.
    let lifecycle = SessionLifecycle::new(home.clone(), &agent_id, cli.ephemeral);
    bus.dispatch(&HookEvent::SessionStart).await;
    let user_tools = tools::discover_user_tools(&home.tools_dir());
    let system_prompt = lifecycle.system_prompt(&tools::render_tool_descriptions(&user_tools))?;
    let startup = lifecycle.startup_context()?;
    let mut preamble = Some(
        [system_prompt, startup]
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
    );
    activity.lock().unwrap_or_else(|p| p.into_inner()).on_ready();

    let mut first_turn = cli.prompt.clone();
    let exit_code = loop {
        let input = if let Some(prompt) = first_turn.take() {
            Some(prompt)
        } else {
            tokio::select! {
                line = user_rx.recv() => match line {
                    Some(line) if !line.trim().is_empty() => Some(line),
                    Some(_) => continue,
                    None if cli.detach => {
                        // Detached agents live on inbox wake-ups alone.
                        tokio::select! {
                            inject = inject_rx.recv() => inject,
                            _ = tokio::signal::ctrl_c() => None,
                        }
                    }
                    None => None,
                },
                inject = inject_rx.recv() => inject,
                _ = tokio::signal::ctrl_c() => None,
            }
        };
        let Some(input) = input else {
            break 0; // clean shutdown
        };

        let input = match preamble.take() {
            Some(pre) if !pre.is_empty() => format!("{pre}\n\n{input}"),
            _ => input,
        };

        arbiter.clear_interrupt();
        // On interrupt the turn future keeps being polled: in-flight hooks
        // complete, the pending permission prompt auto-denies, and the
        // runtime winds the turn down to its TurnEnd.
        let turn_fut = harness.run_until_idle(&input, &ev_tx);
        tokio::pin!(turn_fut);
        let turn = loop {
            tokio::select! {
                result = &mut turn_fut => break result,
                _ = tokio::signal::ctrl_c() => {
                    arbiter.interrupt();
                    let _ = harness.interrupt().await;
                }
            }
        };
        if let Err(e) = turn {
            warn!(error = %e, "runtime lost; writing emergency handoff");
            let _ = lifecycle.write_emergency_handoff(&format!("Runtime failure: {e:#}"));
            registry.deregister(&agent_id).ok();
            heartbeat.abort();
            return Ok(2);
        }
    };

    // Clean shutdown: summary (best-effort), deregister, release the rest.
    activity
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .on_terminating();
    heartbeat.abort();
    if config.agent.session_summary {
        lifecycle
            .finish(
                &client,
                &record,
                Duration::from_secs(config.runtime.summary_timeout_secs),
            )
            .await;
    }
    registry.deregister(&agent_id)?;
    client.shutdown().await.ok();
    activity
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .on_terminated();
    info!(agent_id = %agent_id, "session ended");
    Ok(exit_code)
}

// ── Terminal plumbing ─────────────────────────────────────────────────────────

/// Displays permission prompts.  The answer arrives through the stdin
/// router, which resolves the parked request.
fn spawn_permission_prompt(
    mut ui_rx: mpsc::Receiver<PermissionRequest>,
    pending: Arc<Mutex<Option<PermissionRequest>>>,
) {
    tokio::spawn(async move {
        while let Some(request) = ui_rx.recv().await {
            println!(
                "\n[permission] {} wants to run ({})",
                request.tool_name,
                request.classification.as_str()
            );
            if let Some(diff) = &request.diff {
                println!("{diff}");
            }
            println!("allow? [y/N]");
            *pending.lock().unwrap_or_else(|p| p.into_inner()) = Some(request);
        }
    });
}

/// Routes stdin lines: to the parked permission prompt when one is
/// waiting, to the user-turn queue otherwise.
fn spawn_stdin_router(
    pending: Arc<Mutex<Option<PermissionRequest>>>,
    user_tx: mpsc::Sender<String>,
) {
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let parked = pending.lock().unwrap_or_else(|p| p.into_inner()).take();
            match parked {
                Some(request) => {
                    if line.trim().eq_ignore_ascii_case("y") {
                        request.allow();
                    } else {
                        request.deny("user rejected");
                    }
                }
                None => {
                    if user_tx.send(line).await.is_err() {
                        break;
                    }
                }
            }
        }
        // stdin closed: dropping user_tx ends the session loop.
    });
}

fn spawn_event_printer(mut ev_rx: mpsc::Receiver<AgentEvent>) {
    tokio::spawn(async move {
        use std::io::Write;
        while let Some(event) = ev_rx.recv().await {
            match event {
                AgentEvent::TextDelta(text) => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ThinkingDelta(_) => {}
                AgentEvent::ToolStarted { name, .. } => println!("\n[tool] {name} ..."),
                AgentEvent::ToolFinished {
                    name,
                    denied,
                    result,
                    ..
                } => {
                    if denied {
                        println!("[tool] {name}: {result}");
                    }
                }
                AgentEvent::TurnInjected(text) => {
                    println!("\n[injected] {}", text.lines().next().unwrap_or(""));
                }
                AgentEvent::TurnComplete => println!(),
                AgentEvent::Error(message) => eprintln!("\n[error] {message}"),
            }
        }
    });
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Session logs always go to a per-agent file under the home directory;
/// stderr would fight the interactive surface, so it is opt-in.
fn init_session_logging(home: &AlephHome, agent_id: &str, verbose: bool) -> anyhow::Result<()> {
    let path = home.logs_dir().join(format!("{agent_id}.log"));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer().with_ansi(false).with_writer(Arc::new(file));
    if verbose {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
    }
    Ok(())
}

fn init_cli_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .try_init();
}
