//! Trigger matching and cron evaluation.
//!
//! Workflow sources use standard 5-field cron (`min hour dom month dow`,
//! Sunday = 0 or 7). The `cron` crate expects a leading seconds field and
//! day-of-week ordinals starting at 1, so expressions are normalized before
//! parsing. Schedules are evaluated in UTC at minute resolution.

use crate::project::Project;
use chrono::{DateTime, Timelike, Utc};
use cron::Schedule;
use gantry_core::filter;
use gantry_core::run::RunRequest;
use gantry_core::workflow::{Trigger, TriggerKind};
use gantry_core::{Error, Result};
use std::str::FromStr;
use tracing::debug;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Event that can instantiate workflows.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    Push {
        branch: String,
        commit: Option<String>,
    },
    ScheduleTick {
        at: DateTime<Utc>,
        branch: String,
        commit: Option<String>,
    },
}

impl TriggerEvent {
    pub fn trigger_kind(&self) -> TriggerKind {
        match self {
            TriggerEvent::Push { .. } => TriggerKind::Push,
            TriggerEvent::ScheduleTick { .. } => TriggerKind::Schedule,
        }
    }
}

/// A parsed cron expression.
///
/// Standard cron fires when either day-of-month or day-of-week matches if
/// both are restricted. The `cron` crate requires both, so such expressions
/// hold one schedule per day field and match when either does.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// Whether `at` (truncated to the minute) is a fire time.
    pub fn includes(&self, at: DateTime<Utc>) -> Result<bool> {
        let minute = at
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .ok_or_else(|| Error::Internal(format!("cannot truncate timestamp {}", at)))?;
        Ok(self.schedules.iter().any(|s| s.includes(minute)))
    }

    /// Earliest fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&after).next())
            .min()
    }
}

/// Parse a cron expression in any of the accepted forms.
pub fn parse_schedule(expression: &str) -> Result<CronSchedule> {
    let schedules = normalize(expression)?
        .iter()
        .map(|normalized| {
            Schedule::from_str(normalized).map_err(|e| Error::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CronSchedule { schedules })
}

/// Whether `at` (truncated to the minute) is a fire time of `expression`.
pub fn cron_matches(expression: &str, at: DateTime<Utc>) -> Result<bool> {
    parse_schedule(expression)?.includes(at)
}

/// Next fire time strictly after `after`.
pub fn next_fire(expression: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    Ok(parse_schedule(expression)?.next_after(after))
}

/// Translate to the `cron` crate's dialect. Returns two expressions when
/// day-of-month and day-of-week are both restricted.
fn normalize(expression: &str) -> Result<Vec<String>> {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return Ok(vec![trimmed.to_string()]);
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, dom, month, dow] => {
            let dow = weekday_names(dow);
            let with =
                |dom: &str, dow: &str| format!("0 {} {} {} {} {}", minute, hour, dom, month, dow);
            if is_unrestricted(dom) || is_unrestricted(&dow) {
                Ok(vec![with(*dom, &dow)])
            } else {
                Ok(vec![with(*dom, "*"), with("*", &dow)])
            }
        }
        [_, _, _, _, _, _] | [_, _, _, _, _, _, _] => Ok(vec![fields.join(" ")]),
        _ => Err(Error::InvalidCron {
            expression: expression.to_string(),
            reason: format!("expected 5 fields, found {}", fields.len()),
        }),
    }
}

/// A day field starting with `*` (or `?`) does not restrict the day.
fn is_unrestricted(field: &str) -> bool {
    field.starts_with('*') || field == "?"
}

/// Rewrite numeric day-of-week values (0-7, Sunday = 0/7) as names so the
/// field means the same thing to the `cron` crate.
fn weekday_names(field: &str) -> String {
    field
        .split(',')
        .map(weekday_part)
        .collect::<Vec<_>>()
        .join(",")
}

fn weekday_part(part: &str) -> String {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (part, None),
    };

    // A range ending on Sunday-as-7 would become a reversed named range
    // (`SAT-SUN`), so it is expanded into a list instead.
    if let Some(days) = sunday_ended_range(base, step) {
        return days;
    }

    let base = base
        .split('-')
        .map(|token| match token.parse::<usize>() {
            Ok(n) if n <= 7 => WEEKDAYS[n % 7].to_string(),
            _ => token.to_string(),
        })
        .collect::<Vec<_>>()
        .join("-");
    match step {
        Some(step) => format!("{}/{}", base, step),
        None => base,
    }
}

fn sunday_ended_range(base: &str, step: Option<&str>) -> Option<String> {
    let (lo, hi) = base.split_once('-')?;
    let lo = lo.parse::<usize>().ok()?;
    if hi.parse::<usize>().ok()? != 7 || lo > 7 {
        return None;
    }
    let step = match step {
        Some(step) => step.parse::<usize>().ok().filter(|s| *s > 0)?,
        None => 1,
    };

    let mut days: Vec<&str> = Vec::new();
    for n in (lo..=7).step_by(step) {
        let day = WEEKDAYS[n % 7];
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Some(days.join(","))
}

/// Decides which workflows a trigger event instantiates.
pub struct TriggerDispatcher<'a> {
    project: &'a Project,
}

impl<'a> TriggerDispatcher<'a> {
    pub fn new(project: &'a Project) -> Self {
        Self { project }
    }

    pub fn dispatch(&self, event: &TriggerEvent) -> Result<Vec<RunRequest>> {
        let mut requests = Vec::new();

        for workflow in self.project.workflows() {
            let (branch, commit) = match event {
                TriggerEvent::Push { branch, commit } => (branch, commit),
                TriggerEvent::ScheduleTick { branch, commit, .. } => (branch, commit),
            };

            let due = match (&workflow.trigger, event) {
                (Trigger::Push { .. }, TriggerEvent::Push { .. }) => true,
                (Trigger::Schedule { cron, .. }, TriggerEvent::ScheduleTick { at, .. }) => {
                    cron_matches(cron, *at)?
                }
                _ => false,
            };
            let fires = due && filter::allows(workflow.trigger.filter(), branch);

            if fires {
                debug!(workflow = %workflow.name, branch = %branch, "Trigger matched workflow");
                requests.push(RunRequest {
                    workflow: workflow.name.clone(),
                    branch: branch.clone(),
                    commit: commit.clone(),
                    trigger: event.trigger_kind(),
                });
            }
        }

        Ok(requests)
    }

    pub fn on_push(&self, branch: &str, commit: Option<String>) -> Result<Vec<RunRequest>> {
        self.dispatch(&TriggerEvent::Push {
            branch: branch.to_string(),
            commit,
        })
    }

    pub fn on_schedule_tick(
        &self,
        now: DateTime<Utc>,
        branch: &str,
        commit: Option<String>,
    ) -> Result<Vec<RunRequest>> {
        self.dispatch(&TriggerEvent::ScheduleTick {
            at: now,
            branch: branch.to_string(),
            commit,
        })
    }
}
