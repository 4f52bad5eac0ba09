//! The task store: owns the task list and the presentation preferences,
//! and routes every mutation through a method that writes the result back
//! to the key-value backend.
//!
//! Storage layout:
//!
//! | Key          | Value |
//! |--------------|-------|
//! | `tasks`      | JSON array of task records |
//! | `theme`      | `light` or `dark` |
//! | `filter`     | active filter keyword |
//! | `filterFrom` | custom range start, `YYYY-MM-DD` |
//! | `filterTo`   | custom range end, `YYYY-MM-DD` |

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::datetime::{Calendar, format_wire_date, parse_wire_date};
use crate::filter::{Filter, FilterKind};
use crate::kv::KeyValueStore;
use crate::prefs::{Preferences, Theme};
use crate::rollover::apply_rollover;
use crate::task::{Task, TaskFields, TaskId, decode_task_list, encode_task_list};
use crate::view::TaskView;

pub const TASKS_KEY: &str = "tasks";
pub const THEME_KEY: &str = "theme";
pub const FILTER_KEY: &str = "filter";
pub const FILTER_FROM_KEY: &str = "filterFrom";
pub const FILTER_TO_KEY: &str = "filterTo";

/// Outcome of an id-addressed mutation.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Applied,
    NotFound,
}

impl Mutation {
    pub fn is_applied(self) -> bool {
        matches!(self, Mutation::Applied)
    }
}

#[derive(Debug)]
pub struct TaskStore<S: KeyValueStore> {
    storage: S,
    calendar: Calendar,
    tasks: Vec<Task>,
    prefs: Preferences,
    last_issued: i64,
}

impl<S: KeyValueStore> TaskStore<S> {
    /// Loads tasks and preferences, rolls recurring tasks over, and persists
    /// the rolled-over list before returning.
    #[tracing::instrument(skip(storage, now))]
    pub fn open(storage: S, calendar: Calendar, now: DateTime<Utc>) -> anyhow::Result<Self> {
        let tasks = match storage.get(TASKS_KEY)? {
            Some(raw) => decode_task_list(&raw, now),
            None => Vec::new(),
        };
        let prefs = load_preferences(&storage)?;
        let last_issued = tasks
            .iter()
            .filter_map(|task| task.id.as_millis())
            .max()
            .unwrap_or(0);

        info!(
            tasks = tasks.len(),
            theme = %prefs.theme,
            filter = %prefs.filter,
            calendar = %calendar.name(),
            "opened task store"
        );

        let mut store = Self {
            storage,
            calendar,
            tasks,
            prefs,
            last_issued,
        };
        store.rollover(now)?;
        Ok(store)
    }

    /// Reopens recurring tasks whose period has elapsed and persists the
    /// list. Returns the number of tasks reopened.
    #[tracing::instrument(skip(self, now))]
    pub fn rollover(&mut self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let reset = apply_rollover(&mut self.tasks, &self.calendar, now);
        self.save_tasks()?;
        Ok(reset)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.calendar.today(now)
    }

    pub fn theme(&self) -> Theme {
        self.prefs.theme
    }

    pub fn active_filter(&self) -> Filter {
        self.prefs.filter
    }

    /// View under the persisted filter.
    pub fn view(&self, now: DateTime<Utc>) -> TaskView {
        self.view_with(&self.prefs.filter, now)
    }

    pub fn view_with(&self, filter: &Filter, now: DateTime<Utc>) -> TaskView {
        TaskView::derive(&self.tasks, filter, self.today(now))
    }

    #[tracing::instrument(skip(self, draft, now), fields(title = %draft.title))]
    pub fn add(&mut self, draft: TaskFields, now: DateTime<Utc>) -> anyhow::Result<TaskId> {
        draft.validate()?;

        let id = self.next_id(now);
        self.tasks.push(Task::new(id.clone(), draft));
        self.save_tasks()?;

        debug!(id = %id, count = self.tasks.len(), "task added");
        Ok(id)
    }

    #[tracing::instrument(skip(self, id, draft), fields(id = %id))]
    pub fn edit(&mut self, id: &TaskId, draft: TaskFields) -> anyhow::Result<Mutation> {
        let Some(task) = self.tasks.iter_mut().find(|task| &task.id == id) else {
            debug!("edit of unknown id ignored");
            return Ok(Mutation::NotFound);
        };
        draft.validate()?;

        task.apply(draft);
        self.save_tasks()?;
        Ok(Mutation::Applied)
    }

    #[tracing::instrument(skip(self, id), fields(id = %id))]
    pub fn delete(&mut self, id: &TaskId) -> anyhow::Result<Mutation> {
        let before = self.tasks.len();
        self.tasks.retain(|task| &task.id != id);
        if self.tasks.len() == before {
            debug!("delete of unknown id ignored");
            return Ok(Mutation::NotFound);
        }

        self.save_tasks()?;
        Ok(Mutation::Applied)
    }

    #[tracing::instrument(skip(self, id, now), fields(id = %id))]
    pub fn toggle_complete(&mut self, id: &TaskId, now: DateTime<Utc>) -> anyhow::Result<Mutation> {
        let Some(task) = self.tasks.iter_mut().find(|task| &task.id == id) else {
            debug!("toggle of unknown id ignored");
            return Ok(Mutation::NotFound);
        };

        let completed = task.toggle_complete(now);
        debug!(completed, "toggled completion");
        self.save_tasks()?;
        Ok(Mutation::Applied)
    }

    /// Removes every task. Returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub fn clear_all(&mut self) -> anyhow::Result<usize> {
        let removed = self.tasks.len();
        self.tasks.clear();
        self.save_tasks()?;
        info!(removed, "cleared all tasks");
        Ok(removed)
    }

    /// Appends tasks whose ids are not already present. Returns how many
    /// were added.
    #[tracing::instrument(skip(self, incoming), fields(incoming = incoming.len()))]
    pub fn import(&mut self, incoming: Vec<Task>) -> anyhow::Result<usize> {
        let mut added = 0_usize;
        for task in incoming {
            if self.get(&task.id).is_some() {
                warn!(id = %task.id, "skipping imported task with an existing id");
                continue;
            }
            if let Err(err) = task.fields().validate() {
                warn!(id = %task.id, error = %err, "skipping imported task");
                continue;
            }
            if let Some(millis) = task.id.as_millis() {
                self.last_issued = self.last_issued.max(millis);
            }
            self.tasks.push(task);
            added += 1;
        }

        if added > 0 {
            self.save_tasks()?;
        }
        info!(added, "imported tasks");
        Ok(added)
    }

    pub fn export_json(&self) -> anyhow::Result<String> {
        encode_task_list(&self.tasks)
    }

    #[tracing::instrument(skip(self))]
    pub fn set_theme(&mut self, theme: Theme) -> anyhow::Result<()> {
        self.storage.set(THEME_KEY, theme.storage_value())?;
        self.prefs.theme = theme;
        Ok(())
    }

    pub fn toggle_theme(&mut self) -> anyhow::Result<Theme> {
        let next = self.prefs.theme.toggled();
        self.set_theme(next)?;
        Ok(next)
    }

    /// Persists the active filter. Range bounds are only kept for the
    /// custom filter.
    #[tracing::instrument(skip(self, filter), fields(filter = %filter))]
    pub fn set_filter(&mut self, filter: Filter) -> anyhow::Result<()> {
        let filter = if filter.kind == FilterKind::Custom {
            filter
        } else {
            Filter::new(filter.kind)
        };

        self.storage.set(FILTER_KEY, filter.kind.keyword())?;
        write_optional_date(&mut self.storage, FILTER_FROM_KEY, filter.from)?;
        write_optional_date(&mut self.storage, FILTER_TO_KEY, filter.to)?;
        self.prefs.filter = filter;
        Ok(())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    fn next_id(&mut self, now: DateTime<Utc>) -> TaskId {
        let candidate = now.timestamp_millis();
        let millis = if candidate > self.last_issued {
            candidate
        } else {
            self.last_issued.saturating_add(1)
        };
        self.last_issued = millis;
        TaskId::from_millis(millis)
    }

    fn save_tasks(&mut self) -> anyhow::Result<()> {
        let raw = encode_task_list(&self.tasks)?;
        self.storage.set(TASKS_KEY, &raw)
    }
}

fn load_preferences<S: KeyValueStore>(storage: &S) -> anyhow::Result<Preferences> {
    let theme = Theme::from_storage(storage.get(THEME_KEY)?.as_deref());

    let kind = storage
        .get(FILTER_KEY)?
        .map(|raw| FilterKind::parse_lenient(&raw))
        .unwrap_or_default();
    let filter = if kind == FilterKind::Custom {
        Filter::custom(
            read_optional_date(storage, FILTER_FROM_KEY)?,
            read_optional_date(storage, FILTER_TO_KEY)?,
        )
    } else {
        Filter::new(kind)
    };

    Ok(Preferences { theme, filter })
}

fn read_optional_date<S: KeyValueStore>(storage: &S, key: &str) -> anyhow::Result<Option<NaiveDate>> {
    let Some(raw) = storage.get(key)? else {
        return Ok(None);
    };
    let parsed = parse_wire_date(&raw);
    if parsed.is_none() {
        warn!(key, raw = %raw, "ignoring unreadable stored date");
    }
    Ok(parsed)
}

fn write_optional_date<S: KeyValueStore>(
    storage: &mut S,
    key: &str,
    value: Option<NaiveDate>,
) -> anyhow::Result<()> {
    match value {
        Some(date) => storage.set(key, &format_wire_date(date)),
        None => storage.remove(key),
    }
}
