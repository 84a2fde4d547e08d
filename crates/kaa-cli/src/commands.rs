//! Command execution
//!
//! Every command writes its result to `out`; progress and diagnostics go
//! through `tracing`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::ArgMatches;
use kaa_api::{ApiClient, EndAction, QuickSettingsDto, RunButtonState, ScreenSize, TaskOverviewDto};
use kaa_sync::{
    BoardState, DocumentSync, EventSupervisor, OptionsBackend, QueryCache,
    QuickSettingsController, RunBoard, SaveMode, SolutionsController, TaskOverviewController,
    V1ConfigBackend, VersionProbe,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::settings::Settings;

type Out<'a> = &'a mut dyn Write;

/// Run the subcommand selected in `matches`
///
/// # Errors
/// Invalid arguments, request failures, or failure to write output
pub async fn run(matches: &ArgMatches, settings: &Settings, out: Out<'_>) -> anyhow::Result<()> {
    let client = ApiClient::new(&settings.api)?;
    tracing::debug!("Using backend {}", client.base_url());

    match matches.subcommand() {
        Some(("config", args)) => config(&client, args, out).await,
        Some(("quick", args)) => quick(&client, args, out).await,
        Some(("tasks", args)) => tasks(&client, args, out).await,
        Some(("run", args)) => run_buttons(&client, args, out).await,
        Some(("solutions", args)) => solutions(&client, args, out).await,
        Some(("options", args)) => options(&client, args, out).await,
        Some(("end-action", args)) => {
            let raw = required(args, "action")?;
            let action = EndAction::parse(raw).ok_or_else(|| anyhow!("unknown end action '{raw}'"))?;
            client.put_end_action(action).await?;
            writeln!(out, "end action: {action}")?;
            Ok(())
        }
        Some(("watch", _)) => watch(client, settings, out).await,
        Some(("version", _)) => {
            let probe = VersionProbe::new(client, settings.sync.version_ttl());
            match probe.get().await {
                Some(version) => writeln!(out, "{version}")?,
                None => writeln!(out, "unavailable")?,
            }
            Ok(())
        }
        Some(("update", args)) => update(&client, args, out).await,
        Some(("report", args)) => report(&client, args, out).await,
        Some(("screen", args)) => screen(&client, args, out).await,
        Some((other, _)) => bail!("unknown command '{other}'"),
        None => bail!("no command given"),
    }
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing <{name}>"))
}

/// JSON when it parses, otherwise the raw text as a string
#[must_use]
pub fn parse_value(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
}

fn print_json<T: Serialize>(out: Out<'_>, value: &T) -> anyhow::Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

async fn edit_and_save(
    sync: &DocumentSync,
    args: &ArgMatches,
    mode: SaveMode,
    out: Out<'_>,
) -> anyhow::Result<()> {
    let path = required(args, "path")?;
    let value = parse_value(required(args, "value")?);
    sync.load().await?;
    sync.set(path, value)?;
    sync.save(mode).await?;

    let saved = sync.get(path, JsonValue::Null)?;
    match sync.message() {
        Some(message) => writeln!(out, "{path} = {saved} ({message})")?,
        None => writeln!(out, "{path} = {saved}")?,
    }
    Ok(())
}

async fn config(client: &ApiClient, args: &ArgMatches, out: Out<'_>) -> anyhow::Result<()> {
    let v1 = DocumentSync::new(Arc::new(V1ConfigBackend::new(client.clone())));
    match args.subcommand() {
        Some(("get", a)) => {
            v1.load().await?;
            print_json(out, &v1.get(required(a, "path")?, JsonValue::Null)?)
        }
        Some(("set", a)) => edit_and_save(&v1, a, SaveMode::Full, out).await,
        Some(("export", a)) => {
            v1.load().await?;
            let doc = v1.document().context("backend returned no configuration")?;
            let text = if a.get_flag("yaml") {
                doc.to_yaml()?
            } else {
                doc.to_json()?
            };
            writeln!(out, "{}", text.trim_end())?;
            Ok(())
        }
        Some(("patch", a)) => {
            let options = DocumentSync::new(Arc::new(OptionsBackend::new(client.clone())));
            edit_and_save(&options, a, SaveMode::Dirty, out).await
        }
        _ => bail!("unknown config command"),
    }
}

fn print_quick(out: Out<'_>, values: &QuickSettingsDto) -> anyhow::Result<()> {
    for flag in QuickSettingsDto::FLAGS {
        writeln!(out, "{flag:<22} {}", on_off(values.flag(flag).unwrap_or(false)))?;
    }
    if let Some(end_action) = &values.end_action {
        writeln!(out, "{:<22} {end_action}", "end_action")?;
    }
    Ok(())
}

async fn quick(client: &ApiClient, args: &ArgMatches, out: Out<'_>) -> anyhow::Result<()> {
    let controller = QuickSettingsController::new(client.clone(), QueryCache::new());
    match args.subcommand() {
        Some(("show", _)) => {
            let settings = controller.load().await?;
            print_quick(out, &settings.values)
        }
        Some(("set", a)) => {
            let flag = required(a, "flag")?;
            let enabled = a.get_one::<bool>("enabled").copied().unwrap_or(false);
            let settings = controller.set_flag(flag, enabled).await?;
            let now = settings.values.flag(flag).unwrap_or(enabled);
            writeln!(out, "{flag} {}", on_off(now))?;
            Ok(())
        }
        Some(("toggle", a)) => {
            let flag = required(a, "flag")?;
            let now = controller.toggle(flag).await?;
            writeln!(out, "{flag} {}", on_off(now))?;
            Ok(())
        }
        _ => bail!("unknown quick command"),
    }
}

fn print_overview(out: Out<'_>, overview: &TaskOverviewDto) -> anyhow::Result<()> {
    writeln!(
        out,
        "run: {:?}{}  pause: {:?}{}  runtime: {}",
        overview.run_button.status,
        if overview.run_button.interactive { "" } else { " (busy)" },
        overview.pause_button.status,
        if overview.pause_button.interactive { "" } else { " (busy)" },
        overview.runtime.display,
    )?;
    Ok(())
}

async fn tasks(client: &ApiClient, args: &ArgMatches, out: Out<'_>) -> anyhow::Result<()> {
    let controller = TaskOverviewController::new(client.clone(), QueryCache::new());
    let overview = match args.subcommand() {
        Some(("overview", _)) => controller.load().await?,
        Some(("list", _)) => {
            for task in client.list_tasks().await? {
                writeln!(out, "{:<24} {}", task.name, task.status_text)?;
            }
            return Ok(());
        }
        Some(("run-all", _)) => controller.run_all().await?,
        Some(("stop", _)) => controller.stop().await?,
        Some(("run", a)) => controller.run_single(required(a, "name")?).await?,
        Some(("pause", _)) => controller.pause_toggle().await?,
        _ => bail!("unknown tasks command"),
    };
    print_overview(out, &overview)
}

fn print_button(out: Out<'_>, button: &RunButtonState) -> anyhow::Result<()> {
    let busy = if button.interactive { "" } else { " (busy)" };
    writeln!(out, "{}{busy}", button.text)?;
    Ok(())
}

async fn run_buttons(client: &ApiClient, args: &ArgMatches, out: Out<'_>) -> anyhow::Result<()> {
    let button = match args.subcommand() {
        Some(("state", _)) => return print_json(out, &client.run_state().await?),
        Some(("toggle", _)) => client.run_toggle().await?,
        Some(("start-all", _)) => client.run_start_all().await?,
        Some(("stop-all", _)) => client.run_stop_all().await?,
        Some(("pause", _)) => client.run_pause_toggle().await?,
        _ => bail!("unknown run command"),
    };
    print_button(out, &button)
}

async fn solutions(client: &ApiClient, args: &ArgMatches, out: Out<'_>) -> anyhow::Result<()> {
    let controller = SolutionsController::new(client.clone(), QueryCache::new());
    match args.subcommand() {
        Some(("list", _)) => {
            for s in controller.list().await? {
                writeln!(
                    out,
                    "{:<12} {:<24} {}",
                    s.id,
                    s.name,
                    s.description.as_deref().unwrap_or("")
                )?;
            }
            Ok(())
        }
        Some(("show", a)) => print_json(out, &controller.get(required(a, "id")?).await?),
        Some(("create", a)) => {
            let description = a.get_one::<String>("description").map(String::as_str);
            let created = controller.create(required(a, "name")?, description).await?;
            writeln!(out, "{}", created.id)?;
            Ok(())
        }
        Some(("delete", a)) => {
            let id = required(a, "id")?;
            controller.delete(id).await?;
            writeln!(out, "deleted {id}")?;
            Ok(())
        }
        Some(("set", a)) => {
            let draft = controller.draft(required(a, "id")?);
            edit_and_save(&draft, a, SaveMode::Dirty, out).await
        }
        Some(("idols", _)) => {
            for idol in controller.idols().await? {
                writeln!(out, "{:<32} {}", idol.value, idol.label)?;
            }
            Ok(())
        }
        _ => bail!("unknown solutions command"),
    }
}

async fn options(client: &ApiClient, args: &ArgMatches, out: Out<'_>) -> anyhow::Result<()> {
    let items = match args.subcommand() {
        Some(("money-items", _)) => client.money_items().await?,
        Some(("ap-items", _)) => client.ap_items().await?,
        _ => bail!("unknown options command"),
    };
    for item in items {
        writeln!(out, "{:<12} {}", item.value, item.label)?;
    }
    Ok(())
}

async fn update(client: &ApiClient, args: &ArgMatches, out: Out<'_>) -> anyhow::Result<()> {
    match args.subcommand() {
        Some(("versions", _)) => {
            let info = client.update_versions().await?;
            writeln!(out, "installed: {}", info.installed.as_deref().unwrap_or("unknown"))?;
            writeln!(out, "latest:    {}", info.latest.as_deref().unwrap_or("unknown"))?;
            for version in &info.versions {
                writeln!(out, "  {version}")?;
            }
            Ok(())
        }
        Some(("changelog", _)) => {
            writeln!(out, "{}", client.update_changelog().await?.trim_end())?;
            Ok(())
        }
        Some(("install", a)) => {
            let reply = client.install_version(required(a, "version")?).await?;
            writeln!(out, "{}", reply.message)?;
            Ok(())
        }
        _ => bail!("unknown update command"),
    }
}

fn write_file(out: Out<'_>, args: &ArgMatches, bytes: &[u8]) -> anyhow::Result<()> {
    let path = args
        .get_one::<PathBuf>("out")
        .ok_or_else(|| anyhow!("missing --out"))?;
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    writeln!(out, "wrote {} bytes to {}", bytes.len(), path.display())?;
    Ok(())
}

async fn report(client: &ApiClient, args: &ArgMatches, out: Out<'_>) -> anyhow::Result<()> {
    match args.subcommand() {
        Some(("bug", a)) => {
            let reply = client
                .submit_bug_report(
                    required(a, "title")?,
                    required(a, "description")?,
                    a.get_flag("upload"),
                )
                .await?;
            writeln!(out, "{}", reply.message)?;
            Ok(())
        }
        Some(("list", _)) => print_json(out, &client.bug_reports().await?),
        Some(("logs", a)) => write_file(out, a, &client.export_logs().await?),
        Some(("dumps", a)) => write_file(out, a, &client.export_dumps().await?),
        _ => bail!("unknown report command"),
    }
}

async fn screen(client: &ApiClient, args: &ArgMatches, out: Out<'_>) -> anyhow::Result<()> {
    let Some((which, a)) = args.subcommand() else {
        bail!("unknown screen command");
    };
    let size = if a.get_flag("full") {
        ScreenSize::Full
    } else {
        ScreenSize::Thumb
    };
    let image = match which {
        "current" => client.screen_current(size).await?,
        "last" => client.screen_last(size).await?,
        _ => bail!("unknown screen command"),
    };
    write_file(out, a, &image)
}

/// One status line for the live board
#[must_use]
pub fn board_line(state: &BoardState) -> String {
    let enabled: Vec<&str> = QuickSettingsDto::FLAGS
        .iter()
        .copied()
        .filter(|flag| state.quick.flag(flag).unwrap_or(false))
        .collect();
    let mut line = format!(
        "[{}] [{}] tasks: {}  on: {}  after: {}",
        state.run_button.text,
        state.pause_button.text,
        state.tasks.len(),
        if enabled.is_empty() {
            "-".to_string()
        } else {
            enabled.join(",")
        },
        state.end_action,
    );
    if let Some(error) = &state.error {
        line.push_str(&format!("  error: {error}"));
    }
    line
}

#[derive(Debug)]
enum Tick {
    Event(String),
    Poll,
}

/// Pending refresh triggers while the board is being redrawn
const TICK_QUEUE: usize = 16;

/// Queue a refresh without blocking the event stream
///
/// Every tick refreshes the whole board, so a full queue already holds
/// enough work and the tick is dropped.
fn push_tick(tx: &mpsc::Sender<Tick>, tick: Tick) {
    match tx.try_send(tick) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(tick)) => tracing::trace!("Refresh queue full, dropping {:?}", tick),
    }
}

async fn watch(client: ApiClient, settings: &Settings, out: Out<'_>) -> anyhow::Result<()> {
    let board = RunBoard::new(client.clone());
    let (tx, mut rx) = mpsc::channel(TICK_QUEUE);

    let supervisor = {
        let events = tx.clone();
        EventSupervisor::spawn(
            client,
            settings.sync.clone(),
            move |event| {
                push_tick(&events, Tick::Event(event.kind));
            },
            move || {
                let polls = tx.clone();
                async move {
                    push_tick(&polls, Tick::Poll);
                }
            },
        )
    };

    board.refresh().await;
    let mut last = board_line(&board.snapshot());
    writeln!(out, "{last}")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            tick = rx.recv() => {
                let Some(tick) = tick else { break };
                match tick {
                    Tick::Event(kind) => tracing::debug!("Event: {}", kind),
                    Tick::Poll => tracing::debug!("Fallback poll"),
                }
                board.refresh().await;
                let line = board_line(&board.snapshot());
                if line != last {
                    writeln!(out, "{line}")?;
                    out.flush()?;
                    last = line;
                }
            }
        }
    }

    supervisor.stop().await;
    Ok(())
}
