use std::fmt;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use regex::Regex;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::Calendar;
use crate::filter::Filter;
use crate::prefs::Theme;
use crate::view::TaskView;

const URL_PATTERN: &str = r"https?://[^\s]+";

#[derive(Debug, Clone, Copy)]
struct Palette {
    id: &'static str,
    heading: &'static str,
    overdue: &'static str,
    link: &'static str,
    muted: &'static str,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light => Self {
                id: "33",
                heading: "1",
                overdue: "31",
                link: "34;4",
                muted: "90",
            },
            Theme::Dark => Self {
                id: "93",
                heading: "1;97",
                overdue: "91",
                link: "96;4",
                muted: "37",
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    palette: Palette,
    date_format: String,
    calendar: Calendar,
    url_re: Regex,
}

impl Renderer {
    pub fn new(cfg: &Config, theme: Theme, calendar: Calendar) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        let date_format = cfg
            .get("dateformat")
            .unwrap_or_else(|| "%Y-%m-%d".to_string());
        validate_date_format(&date_format)?;

        let url_re =
            Regex::new(URL_PATTERN).map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            palette: Palette::for_theme(theme),
            date_format,
            calendar,
            url_re,
        })
    }

    /// Forces color on or off regardless of whether stdout is a terminal.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.palette = Palette::for_theme(theme);
    }

    #[tracing::instrument(skip(self, view, filter, today))]
    pub fn print_view(
        &mut self,
        view: &TaskView,
        filter: &Filter,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_view(&mut out, view, filter, today)
    }

    pub fn write_view<W: Write>(
        &self,
        mut out: W,
        view: &TaskView,
        filter: &Filter,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let heading = format!("Upcoming ({filter})");
        writeln!(out, "{}", self.paint(&heading, self.palette.heading))?;
        if view.upcoming.is_empty() {
            writeln!(out, "{}", self.paint("no tasks", self.palette.muted))?;
        } else {
            let rows = view
                .upcoming
                .iter()
                .map(|task| {
                    let due = self.format_date(task.due_date);
                    let due = if task.due_date < today {
                        self.paint(&due, self.palette.overdue)
                    } else {
                        due
                    };
                    vec![
                        self.paint(task.id.as_str(), self.palette.id),
                        due,
                        task.recurrence.to_string(),
                        single_line(&task.title),
                        self.linkify(&single_line(&task.description)),
                    ]
                })
                .collect();
            write_table(
                &mut out,
                vec!["ID", "Due", "Recur", "Title", "Description"],
                rows,
            )?;
        }

        writeln!(out)?;
        writeln!(out, "{}", self.paint("History", self.palette.heading))?;
        if view.history.is_empty() {
            writeln!(out, "{}", self.paint("no tasks", self.palette.muted))?;
        } else {
            let rows = view
                .history
                .iter()
                .map(|task| {
                    let done = task
                        .completed_at
                        .map(|at| self.format_date(self.calendar.date_of(at)))
                        .unwrap_or_default();
                    vec![
                        self.paint(task.id.as_str(), self.palette.id),
                        self.format_date(task.due_date),
                        task.recurrence.to_string(),
                        single_line(&task.title),
                        self.linkify(&single_line(&task.description)),
                        self.paint(&done, self.palette.muted),
                    ]
                })
                .collect();
            write_table(
                &mut out,
                vec!["ID", "Due", "Recur", "Title", "Description", "Completed"],
                rows,
            )?;
        }

        Ok(())
    }

    pub fn format_date(&self, date: NaiveDate) -> String {
        date.format(&self.date_format).to_string()
    }

    /// Highlights `http(s)://` URLs; with color on they become OSC 8
    /// hyperlinks.
    pub fn linkify(&self, text: &str) -> String {
        if !self.color {
            return text.to_string();
        }

        self.url_re
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let url = &caps[0];
                format!(
                    "\x1b]8;;{url}\x1b\\{}\x1b]8;;\x1b\\",
                    self.paint(url, self.palette.link)
                )
            })
            .into_owned()
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Formats a sample date so that unknown specifiers and time or offset
/// fields a date cannot supply are rejected before anything is printed.
fn validate_date_format(format: &str) -> anyhow::Result<()> {
    let sample = NaiveDate::from_ymd_opt(2024, 1, 10)
        .ok_or_else(|| anyhow!("internal sample date is invalid"))?;
    let mut rendered = String::new();
    fmt::write(&mut rendered, format_args!("{}", sample.format(format)))
        .map_err(|_| anyhow!("invalid dateformat setting: {format}"))?;
    Ok(())
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<&str>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(*header));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

/// Removes SGR color codes and OSC sequences (terminated by BEL or ST).
fn strip_ansi(s: &str) -> String {
    enum State {
        Text,
        Escape,
        Csi,
        Osc,
        OscEscape,
    }

    let mut out = String::with_capacity(s.len());
    let mut state = State::Text;

    for ch in s.chars() {
        state = match state {
            State::Text if ch == '\x1b' => State::Escape,
            State::Text => {
                out.push(ch);
                State::Text
            }
            State::Escape if ch == '[' => State::Csi,
            State::Escape if ch == ']' => State::Osc,
            State::Escape => State::Text,
            State::Csi if ('\x40'..='\x7e').contains(&ch) => State::Text,
            State::Csi => State::Csi,
            State::Osc if ch == '\x07' => State::Text,
            State::Osc if ch == '\x1b' => State::OscEscape,
            State::Osc => State::Osc,
            State::OscEscape => State::Text,
        };
    }

    out
}
