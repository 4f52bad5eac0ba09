use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate};
use tracing::{trace, warn};

use crate::datetime::{add_days, first_day_of_month, last_day_of_month};
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    #[default]
    All,
    Today,
    Yesterday,
    Week,
    Month,
    Year,
    Custom,
}

impl FilterKind {
    pub const VARIANTS: [FilterKind; 7] = [
        FilterKind::All,
        FilterKind::Today,
        FilterKind::Yesterday,
        FilterKind::Week,
        FilterKind::Month,
        FilterKind::Year,
        FilterKind::Custom,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            FilterKind::All => "all",
            FilterKind::Today => "today",
            FilterKind::Yesterday => "yesterday",
            FilterKind::Week => "week",
            FilterKind::Month => "month",
            FilterKind::Year => "year",
            FilterKind::Custom => "custom",
        }
    }

    /// Unknown keywords select everything.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            warn!(keyword = %raw, "unknown filter keyword, showing all tasks");
            FilterKind::All
        })
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for FilterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::VARIANTS
            .into_iter()
            .find(|kind| kind.keyword() == wanted)
            .ok_or_else(|| anyhow!("unknown filter: {s}"))
    }
}

/// Filter over due dates. `from`/`to` are only consulted for
/// [`FilterKind::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Filter {
    pub kind: FilterKind,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl Filter {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            from: None,
            to: None,
        }
    }

    pub fn custom(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self {
            kind: FilterKind::Custom,
            from,
            to,
        }
    }

    /// Inclusive window of due dates selected on `today`, or `None` when the
    /// filter does not restrict anything.
    pub fn date_range(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match self.kind {
            FilterKind::All => None,
            FilterKind::Today => Some((today, today)),
            FilterKind::Yesterday => {
                let yesterday = add_days(today, -1);
                Some((yesterday, yesterday))
            }
            FilterKind::Week => {
                let start = add_days(today, -(today.weekday().num_days_from_sunday() as i64));
                Some((start, add_days(start, 6)))
            }
            FilterKind::Month => Some((
                first_day_of_month(today.year(), today.month()),
                last_day_of_month(today.year(), today.month()),
            )),
            FilterKind::Year => Some((
                first_day_of_month(today.year(), 1),
                last_day_of_month(today.year(), 12),
            )),
            FilterKind::Custom => match (self.from, self.to) {
                (Some(from), Some(to)) => Some((from, to)),
                _ => None,
            },
        }
    }

    pub fn matches_date(&self, due: NaiveDate, today: NaiveDate) -> bool {
        match self.date_range(today) {
            Some((start, end)) => start <= due && due <= end,
            None => true,
        }
    }

    /// Returns the matching tasks as a new sequence in their original order.
    #[tracing::instrument(skip(self, tasks, today), fields(kind = %self.kind))]
    pub fn apply(&self, tasks: &[Task], today: NaiveDate) -> Vec<Task> {
        let range = self.date_range(today);
        trace!(?range, "filter window");
        tasks
            .iter()
            .filter(|task| match range {
                Some((start, end)) => start <= task.due_date && task.due_date <= end,
                None => true,
            })
            .cloned()
            .collect()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.from, self.to) {
            (FilterKind::Custom, Some(from), Some(to)) => write!(f, "custom {from}..{to}"),
            (kind, _, _) => write!(f, "{kind}"),
        }
    }
}
