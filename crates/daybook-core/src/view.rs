use chrono::NaiveDate;
use tracing::debug;

use crate::filter::Filter;
use crate::task::Task;

/// What the presentation layer renders: open tasks narrowed by the active
/// filter, and every completed task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskView {
    pub upcoming: Vec<Task>,
    pub history: Vec<Task>,
}

impl TaskView {
    /// Sorts by due date (stable), splits on completion, and filters only
    /// the upcoming half.
    #[tracing::instrument(skip(tasks, filter, today), fields(filter = %filter))]
    pub fn derive(tasks: &[Task], filter: &Filter, today: NaiveDate) -> Self {
        let mut sorted = tasks.to_vec();
        sorted.sort_by_key(|task| task.due_date);

        let (history, upcoming): (Vec<Task>, Vec<Task>) =
            sorted.into_iter().partition(Task::is_completed);
        let upcoming = filter.apply(&upcoming, today);

        debug!(
            upcoming = upcoming.len(),
            history = history.len(),
            "derived task view"
        );
        Self { upcoming, history }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::TaskView;
    use crate::filter::{Filter, FilterKind};
    use crate::task::{Task, TaskFields, TaskId};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn task(id: &str, due: NaiveDate) -> Task {
        Task::new(TaskId::new(id), TaskFields::new(format!("task {id}"), due))
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn sorts_by_due_date_and_keeps_ties_in_insertion_order() {
        let tasks = vec![
            task("late", date(2024, 3, 1)),
            task("tie-1", date(2024, 1, 5)),
            task("early", date(2024, 1, 1)),
            task("tie-2", date(2024, 1, 5)),
        ];
        let view = TaskView::derive(&tasks, &Filter::default(), date(2024, 1, 1));
        assert_eq!(ids(&view.upcoming), vec!["early", "tie-1", "tie-2", "late"]);
        assert!(view.history.is_empty());
    }

    #[test]
    fn filter_applies_to_upcoming_only() {
        let done_at = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .expect("valid instant");
        let mut old_done = task("old-done", date(2023, 6, 1));
        old_done.complete(done_at);

        let tasks = vec![
            task("today", date(2024, 1, 10)),
            task("later", date(2024, 2, 10)),
            old_done,
        ];
        let view = TaskView::derive(&tasks, &Filter::new(FilterKind::Today), date(2024, 1, 10));
        assert_eq!(ids(&view.upcoming), vec!["today"]);
        assert_eq!(ids(&view.history), vec!["old-done"]);
    }

    #[test]
    fn derivation_does_not_touch_input() {
        let tasks = vec![task("b", date(2024, 2, 1)), task("a", date(2024, 1, 1))];
        let before = tasks.clone();
        let _ = TaskView::derive(&tasks, &Filter::default(), date(2024, 1, 1));
        assert_eq!(tasks, before);
    }
}
