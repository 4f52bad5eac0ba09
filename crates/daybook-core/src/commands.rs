use std::fs;
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::Command;
use crate::config::Config;
use crate::datetime::parse_date_expr;
use crate::filter::{Filter, FilterKind};
use crate::kv::KeyValueStore;
use crate::prefs::Theme;
use crate::render::Renderer;
use crate::store::{Mutation, TaskStore};
use crate::task::{Recurrence, TaskFields, TaskId, parse_task_list};

#[instrument(skip(store, cfg, renderer, command, now))]
pub fn dispatch<S: KeyValueStore>(
    store: &mut TaskStore<S>,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Command,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Add {
            title,
            due,
            description,
            recur,
        } => cmd_add(store, &title, &due, description, recur.as_deref(), now),
        Command::Edit {
            id,
            title,
            description,
            due,
            recur,
        } => cmd_edit(
            store,
            &TaskId::new(id),
            EditArgs {
                title,
                description,
                due,
                recur,
            },
            now,
        ),
        Command::Delete { id } => cmd_delete(store, &TaskId::new(id)),
        Command::Toggle { id } => cmd_toggle(store, &TaskId::new(id), now),
        Command::List { filter, from, to } => cmd_list(
            store,
            renderer,
            filter.as_deref(),
            from.as_deref(),
            to.as_deref(),
            now,
        ),
        Command::Filter { keyword, from, to } => {
            cmd_filter(store, &keyword, from.as_deref(), to.as_deref(), now)
        }
        Command::Theme { mode } => cmd_theme(store, renderer, mode.as_deref()),
        Command::Clear { yes } => cmd_clear(store, yes),
        Command::Export => cmd_export(store),
        Command::Import { path } => cmd_import(store, &path, now),
        Command::Show => cmd_show(store, cfg),
    }
}

#[derive(Debug, Default)]
struct EditArgs {
    title: Option<String>,
    description: Option<String>,
    due: Option<String>,
    recur: Option<String>,
}

#[instrument(skip(store, title, due, description, recur, now))]
fn cmd_add<S: KeyValueStore>(
    store: &mut TaskStore<S>,
    title: &[String],
    due: &str,
    description: Option<String>,
    recur: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");

    let today = store.today(now);
    let due_date = parse_date_expr(due, today)?;
    let mut draft = TaskFields::new(title.join(" "), due_date);
    if let Some(description) = description {
        draft = draft.with_description(description);
    }
    if let Some(recur) = recur {
        draft = draft.with_recurrence(recur.parse::<Recurrence>()?);
    }

    let id = store.add(draft, now)?;
    println!("Created task {id}.");
    Ok(())
}

#[instrument(skip(store, id, args, now), fields(id = %id))]
fn cmd_edit<S: KeyValueStore>(
    store: &mut TaskStore<S>,
    id: &TaskId,
    args: EditArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command edit");

    let Some(current) = store.get(id) else {
        return Err(not_found(id));
    };

    let mut draft = current.fields();
    if let Some(title) = args.title {
        draft.title = title;
    }
    if let Some(description) = args.description {
        draft.description = description;
    }
    if let Some(due) = args.due {
        draft.due_date = parse_date_expr(&due, store.today(now))?;
    }
    if let Some(recur) = args.recur {
        draft.recurrence = recur.parse()?;
    }

    require_applied(store.edit(id, draft)?, id)?;
    println!("Modified task {id}.");
    Ok(())
}

#[instrument(skip(store, id), fields(id = %id))]
fn cmd_delete<S: KeyValueStore>(store: &mut TaskStore<S>, id: &TaskId) -> anyhow::Result<()> {
    info!("command delete");

    require_applied(store.delete(id)?, id)?;
    println!("Deleted task {id}.");
    Ok(())
}

#[instrument(skip(store, id, now), fields(id = %id))]
fn cmd_toggle<S: KeyValueStore>(
    store: &mut TaskStore<S>,
    id: &TaskId,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command toggle");

    require_applied(store.toggle_complete(id, now)?, id)?;
    let completed = store.get(id).is_some_and(|task| task.is_completed());
    if completed {
        println!("Completed task {id}.");
    } else {
        println!("Reopened task {id}.");
    }
    Ok(())
}

#[instrument(skip(store, renderer, now))]
fn cmd_list<S: KeyValueStore>(
    store: &TaskStore<S>,
    renderer: &mut Renderer,
    filter: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");

    let today = store.today(now);
    let filter = match (filter, from, to) {
        (None, None, None) => store.active_filter(),
        (None, _, _) => build_filter("custom", from, to, today)?,
        (Some(keyword), _, _) => build_filter(keyword, from, to, today)?,
    };

    let view = store.view_with(&filter, now);
    renderer.print_view(&view, &filter, today)
}

#[instrument(skip(store, now))]
fn cmd_filter<S: KeyValueStore>(
    store: &mut TaskStore<S>,
    keyword: &str,
    from: Option<&str>,
    to: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command filter");

    let filter = build_filter(keyword, from, to, store.today(now))?;
    store.set_filter(filter)?;
    println!("Filter set to {filter}.");
    Ok(())
}

#[instrument(skip(store, renderer))]
fn cmd_theme<S: KeyValueStore>(
    store: &mut TaskStore<S>,
    renderer: &mut Renderer,
    mode: Option<&str>,
) -> anyhow::Result<()> {
    info!("command theme");

    let theme = match mode {
        None => {
            println!("{}", store.theme());
            return Ok(());
        }
        Some(raw) if raw.trim().eq_ignore_ascii_case("toggle") => store.toggle_theme()?,
        Some(raw) => {
            let theme = raw.parse::<Theme>()?;
            store.set_theme(theme)?;
            theme
        }
    };

    renderer.set_theme(theme);
    println!("Theme set to {theme}.");
    Ok(())
}

#[instrument(skip(store))]
fn cmd_clear<S: KeyValueStore>(store: &mut TaskStore<S>, yes: bool) -> anyhow::Result<()> {
    info!("command clear");

    if store.is_empty() {
        println!("No tasks to clear.");
        return Ok(());
    }

    if !yes && !confirm(&format!("Delete all {} tasks?", store.len()))? {
        println!("Nothing cleared.");
        return Ok(());
    }

    let removed = store.clear_all()?;
    println!("Cleared {removed} tasks.");
    Ok(())
}

#[instrument(skip(store))]
fn cmd_export<S: KeyValueStore>(store: &TaskStore<S>) -> anyhow::Result<()> {
    info!("command export");

    println!("{}", store.export_json()?);
    Ok(())
}

#[instrument(skip(store, now))]
fn cmd_import<S: KeyValueStore>(
    store: &mut TaskStore<S>,
    path: &Path,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command import");

    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed reading tasks from stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };

    let incoming = parse_task_list(&raw, now)?;
    let offered = incoming.len();
    let added = store.import(incoming)?;
    println!("Imported {added} of {offered} tasks.");
    Ok(())
}

#[instrument(skip(store, cfg))]
fn cmd_show<S: KeyValueStore>(store: &TaskStore<S>, cfg: &Config) -> anyhow::Result<()> {
    info!("command show");

    let mut entries: Vec<(&String, &String)> = cfg.iter().collect();
    entries.sort();
    for (key, value) in entries {
        println!("{key}={value}");
    }

    for file in &cfg.loaded_files {
        println!("# loaded {}", file.display());
    }
    println!("# calendar {}", store.calendar().name());
    println!("# theme {}", store.theme());
    println!("# filter {}", store.active_filter());
    Ok(())
}

/// Builds a filter from a keyword plus optional bounds. Bounds only make
/// sense for `custom`, which needs both.
fn build_filter(
    keyword: &str,
    from: Option<&str>,
    to: Option<&str>,
    today: NaiveDate,
) -> anyhow::Result<Filter> {
    let kind = keyword.parse::<FilterKind>()?;
    if kind != FilterKind::Custom {
        if from.is_some() || to.is_some() {
            warn!(filter = %kind, "--from/--to only apply to the custom filter; ignoring");
        }
        return Ok(Filter::new(kind));
    }

    let (Some(from), Some(to)) = (from, to) else {
        return Err(anyhow!("custom filter requires both --from and --to"));
    };
    let from = parse_date_expr(from, today)?;
    let to = parse_date_expr(to, today)?;
    if from > to {
        warn!(%from, %to, "custom range is inverted and will match nothing");
    }
    Ok(Filter::custom(Some(from), Some(to)))
}

fn require_applied(outcome: Mutation, id: &TaskId) -> anyhow::Result<()> {
    match outcome {
        Mutation::Applied => Ok(()),
        Mutation::NotFound => Err(not_found(id)),
    }
}

fn not_found(id: &TaskId) -> anyhow::Error {
    anyhow!("no task with id {id}")
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Err(anyhow!("refusing to clear without --yes on a non-interactive input"));
    }

    print!("{prompt} [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    stdin
        .lock()
        .read_line(&mut answer)
        .context("failed reading confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    use super::{build_filter, dispatch};
    use crate::cli::Command;
    use crate::config::Config;
    use crate::datetime::Calendar;
    use crate::filter::{Filter, FilterKind};
    use crate::kv::MemoryStore;
    use crate::prefs::Theme;
    use crate::render::Renderer;
    use crate::store::TaskStore;
    use crate::task::{Recurrence, TaskId};

    const UTC: Calendar = Calendar::Fixed(chrono_tz::UTC);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn setup() -> (TaskStore<MemoryStore>, Config, Renderer) {
        let store = TaskStore::open(MemoryStore::new(), UTC, now()).expect("open store");
        let cfg = Config::default();
        let renderer = Renderer::new(&cfg, Theme::Light, UTC)
            .expect("renderer")
            .with_color(false);
        (store, cfg, renderer)
    }

    fn run(
        store: &mut TaskStore<MemoryStore>,
        cfg: &Config,
        renderer: &mut Renderer,
        command: Command,
    ) -> anyhow::Result<()> {
        dispatch(store, cfg, renderer, command, now())
    }

    fn add(store: &mut TaskStore<MemoryStore>, cfg: &Config, renderer: &mut Renderer) -> TaskId {
        run(
            store,
            cfg,
            renderer,
            Command::Add {
                title: vec!["water".into(), "plants".into()],
                due: "tomorrow".into(),
                description: Some("see https://example.com".into()),
                recur: Some("daily".into()),
            },
        )
        .expect("add");
        store.tasks().last().expect("added task").id.clone()
    }

    #[test]
    fn add_resolves_date_expression_and_joins_title() {
        let (mut store, cfg, mut renderer) = setup();
        add(&mut store, &cfg, &mut renderer);

        let task = &store.tasks()[0];
        assert_eq!(task.title, "water plants");
        assert_eq!(task.due_date, date(2024, 1, 11));
        assert_eq!(task.recurrence, Recurrence::Daily);
    }

    #[test]
    fn edit_keeps_fields_that_were_not_given() {
        let (mut store, cfg, mut renderer) = setup();
        let id = add(&mut store, &cfg, &mut renderer);

        run(
            &mut store,
            &cfg,
            &mut renderer,
            Command::Edit {
                id: id.to_string(),
                title: Some("water cactus".into()),
                description: None,
                due: Some("2024-02-01".into()),
                recur: None,
            },
        )
        .expect("edit");

        let task = store.get(&id).expect("task");
        assert_eq!(task.title, "water cactus");
        assert_eq!(task.description, "see https://example.com");
        assert_eq!(task.due_date, date(2024, 2, 1));
        assert_eq!(task.recurrence, Recurrence::Daily);
    }

    #[test]
    fn unknown_id_is_reported_and_changes_nothing() {
        let (mut store, cfg, mut renderer) = setup();
        add(&mut store, &cfg, &mut renderer);
        let before = store.tasks().to_vec();

        for command in [
            Command::Delete { id: "nope".into() },
            Command::Toggle { id: "nope".into() },
            Command::Edit {
                id: "nope".into(),
                title: Some("x".into()),
                description: None,
                due: None,
                recur: None,
            },
        ] {
            let err = run(&mut store, &cfg, &mut renderer, command).expect_err("not found");
            assert!(err.to_string().contains("no task with id nope"));
        }
        assert_eq!(store.tasks(), before.as_slice());
    }

    #[test]
    fn toggle_then_delete() {
        let (mut store, cfg, mut renderer) = setup();
        let id = add(&mut store, &cfg, &mut renderer);

        run(&mut store, &cfg, &mut renderer, Command::Toggle { id: id.to_string() })
            .expect("toggle");
        assert!(store.get(&id).expect("task").is_completed());

        run(&mut store, &cfg, &mut renderer, Command::Delete { id: id.to_string() })
            .expect("delete");
        assert!(store.is_empty());
    }

    #[test]
    fn filter_command_persists_custom_range() {
        let (mut store, cfg, mut renderer) = setup();
        run(
            &mut store,
            &cfg,
            &mut renderer,
            Command::Filter {
                keyword: "custom".into(),
                from: Some("today".into()),
                to: Some("+1w".into()),
            },
        )
        .expect("filter");

        assert_eq!(
            store.active_filter(),
            Filter::custom(Some(date(2024, 1, 10)), Some(date(2024, 1, 17)))
        );
        run(&mut store, &cfg, &mut renderer, Command::default_list()).expect("list");
    }

    #[test]
    fn build_filter_rules() {
        let today = date(2024, 1, 10);
        assert_eq!(
            build_filter("week", Some("today"), None, today).expect("week"),
            Filter::new(FilterKind::Week)
        );
        assert!(build_filter("custom", Some("today"), None, today).is_err());
        assert!(build_filter("fortnight", None, None, today).is_err());
    }

    #[test]
    fn theme_toggle_and_set() {
        let (mut store, cfg, mut renderer) = setup();
        run(&mut store, &cfg, &mut renderer, Command::Theme { mode: Some("toggle".into()) })
            .expect("toggle theme");
        assert_eq!(store.theme(), Theme::Dark);

        run(&mut store, &cfg, &mut renderer, Command::Theme { mode: Some("light".into()) })
            .expect("set theme");
        assert_eq!(store.theme(), Theme::Light);

        assert!(
            run(&mut store, &cfg, &mut renderer, Command::Theme { mode: Some("sepia".into()) })
                .is_err()
        );
    }

    #[test]
    fn clear_with_yes_removes_everything() {
        let (mut store, cfg, mut renderer) = setup();
        add(&mut store, &cfg, &mut renderer);
        add(&mut store, &cfg, &mut renderer);

        run(&mut store, &cfg, &mut renderer, Command::Clear { yes: true }).expect("clear");
        assert!(store.is_empty());
    }

    #[test]
    fn import_skips_ids_already_present() {
        let (mut store, cfg, mut renderer) = setup();
        let id = add(&mut store, &cfg, &mut renderer);

        let temp = tempdir().expect("tempdir");
        let file = temp.path().join("tasks.json");
        fs::write(
            &file,
            format!(
                r#"[
                  {{"id":"{id}","title":"dup","description":"","dueDate":"2024-01-01","recurrence":"none","completed":false,"completedDate":null}},
                  {{"id":"1","title":"new","description":"","dueDate":"2024-01-02","recurrence":"monthly","completed":false,"completedDate":null}}
                ]"#
            ),
        )
        .expect("write import");

        run(&mut store, &cfg, &mut renderer, Command::Import { path: file })
            .expect("import");
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&id).expect("kept").title, "water plants");
        assert_eq!(
            store.get(&TaskId::new("1")).expect("imported").recurrence,
            Recurrence::Monthly
        );
    }

    #[test]
    fn import_rejects_non_array() {
        let (mut store, cfg, mut renderer) = setup();
        let temp = tempdir().expect("tempdir");
        let file = temp.path().join("bad.json");
        fs::write(&file, r#"{"tasks": []}"#).expect("write");

        assert!(run(&mut store, &cfg, &mut renderer, Command::Import { path: file }).is_err());
    }
}
