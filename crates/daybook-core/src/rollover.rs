use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info};

use crate::datetime::Calendar;
use crate::task::{Recurrence, Task};

/// Whether a completed recurring task has entered a new period since it was
/// completed.
pub fn should_reset(task: &Task, calendar: &Calendar, now: DateTime<Utc>) -> bool {
    let Some(completed_at) = task.completed_at else {
        return false;
    };

    let done = calendar.date_of(completed_at);
    let today = calendar.today(now);

    match task.recurrence {
        Recurrence::None => false,
        Recurrence::Daily => done != today,
        Recurrence::Monthly => done.month() != today.month() || done.year() != today.year(),
    }
}

/// Reopens every recurring task whose period has rolled over. Returns how
/// many tasks were reopened.
#[tracing::instrument(skip(tasks, calendar, now))]
pub fn apply_rollover(tasks: &mut [Task], calendar: &Calendar, now: DateTime<Utc>) -> usize {
    let mut reset = 0_usize;
    for task in tasks.iter_mut() {
        if should_reset(task, calendar, now) {
            debug!(
                id = %task.id,
                recurrence = %task.recurrence,
                completed_at = ?task.completed_at,
                "recurrence period elapsed, reopening"
            );
            task.reopen();
            reset += 1;
        }
    }

    if reset > 0 {
        info!(reset, "rolled over recurring tasks");
    }
    reset
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use super::{apply_rollover, should_reset};
    use crate::datetime::Calendar;
    use crate::task::{Recurrence, Task, TaskFields, TaskId};

    const UTC: Calendar = Calendar::Fixed(chrono_tz::UTC);

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("valid instant")
    }

    fn completed(recurrence: Recurrence, completed_at: DateTime<Utc>) -> Task {
        let due = NaiveDate::from_ymd_opt(2024, 1, 10).expect("valid date");
        let mut task = Task::new(
            TaskId::new("1"),
            TaskFields::new("recurring", due).with_recurrence(recurrence),
        );
        task.complete(completed_at);
        task
    }

    #[test]
    fn daily_task_resets_on_the_next_day() {
        let mut tasks = vec![completed(Recurrence::Daily, at(2024, 1, 10, 9))];
        assert_eq!(apply_rollover(&mut tasks, &UTC, at(2024, 1, 11, 0)), 1);
        assert!(!tasks[0].is_completed());
        assert!(tasks[0].completed_at.is_none());
    }

    #[test]
    fn daily_task_stays_completed_the_same_day() {
        let task = completed(Recurrence::Daily, at(2024, 1, 10, 9));
        assert!(!should_reset(&task, &UTC, at(2024, 1, 10, 23)));
    }

    #[test]
    fn monthly_task_resets_only_in_a_new_month() {
        let task = completed(Recurrence::Monthly, at(2024, 1, 10, 9));
        assert!(!should_reset(&task, &UTC, at(2024, 1, 31, 23)));
        assert!(should_reset(&task, &UTC, at(2024, 2, 1, 0)));
        // same month number, different year
        assert!(should_reset(&task, &UTC, at(2025, 1, 10, 9)));
    }

    #[test]
    fn non_recurring_and_open_tasks_are_left_alone() {
        let done = completed(Recurrence::None, at(2020, 1, 1, 0));
        assert!(!should_reset(&done, &UTC, at(2024, 1, 11, 0)));

        let mut open = completed(Recurrence::Daily, at(2024, 1, 10, 9));
        open.reopen();
        assert!(!should_reset(&open, &UTC, at(2024, 1, 11, 0)));
    }

    #[test]
    fn rollover_is_idempotent() {
        let now = at(2024, 1, 11, 12);
        let mut once = vec![
            completed(Recurrence::Daily, at(2024, 1, 10, 9)),
            completed(Recurrence::Monthly, at(2024, 1, 2, 9)),
            completed(Recurrence::None, at(2023, 6, 1, 9)),
        ];
        apply_rollover(&mut once, &UTC, now);
        let mut twice = once.clone();
        assert_eq!(apply_rollover(&mut twice, &UTC, now), 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn day_boundary_follows_the_calendar_timezone() {
        let mexico = Calendar::Fixed(chrono_tz::America::Mexico_City);
        // 2024-01-10 21:00 local, checked at 2024-01-10 23:00 local
        let task = completed(Recurrence::Daily, at(2024, 1, 11, 3));
        assert!(!should_reset(&task, &mexico, at(2024, 1, 11, 5)));
        assert!(should_reset(&task, &UTC, at(2024, 1, 12, 5)));
    }
}
