//! Notification decisions and mail delivery.

mod mail;

pub use mail::*;

use crate::engine::StatusChanges;
use crate::report::Report;
use crate::scheduler::TriggerKind;

use askama::Template;
use chrono::{DateTime, Local, Timelike};
use std::collections::BTreeSet;

pub const HOURLY_SUBJECT: &str = "(Alert) Hourly Status Report";
pub const VALIDATION_SUBJECT: &str = "(Validation) Daily Status Report";
pub const DAILY_SUBJECT: &str = "Daily Status Report";

/// Who receives a mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientGroup {
    Operations,
    Everyone,
}

/// One mail to be handed to a [`MailSender`].
#[derive(Debug, Clone)]
pub struct EmailJob {
    pub group: RecipientGroup,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Report,
}

/// Everything besides the trigger and the changes that goes into a mail.
pub struct NotificationContext<'a> {
    pub platform_label: &'a str,
    pub signature: &'a str,
    pub operations: &'a [String],
    pub everyone: &'a [String],
    pub now: DateTime<Local>,
    pub report: &'a Report,
}

impl NotificationContext<'_> {
    fn recipients(&self, group: RecipientGroup) -> Vec<String> {
        match group {
            RecipientGroup::Operations => self.operations.to_vec(),
            RecipientGroup::Everyone => self.everyone.to_vec(),
        }
    }

    fn job(&self, group: RecipientGroup, subject: &str, body: String) -> EmailJob {
        EmailJob {
            group,
            recipients: self.recipients(group),
            subject: subject.to_string(),
            body,
            attachment: self.report.clone(),
        }
    }
}

/// Salutation for the local hour of day.
pub fn greeting(hour: u32) -> &'static str {
    match hour {
        4..=11 => "Good Morning,",
        12..=17 => "Good Afternoon,",
        18..=23 => "Good Evening,",
        _ => "Hi,",
    }
}

struct Section<'a> {
    state: &'static str,
    names: &'a BTreeSet<String>,
}

#[derive(Template)]
#[template(path = "hourly_alert.txt")]
struct HourlyAlert<'a> {
    greeting: &'a str,
    time: String,
    sections: Vec<Section<'a>>,
    signature: &'a str,
}

#[derive(Template)]
#[template(path = "status_report.txt")]
struct StatusReport<'a> {
    greeting: &'a str,
    time: String,
    platform_label: &'a str,
    signature: &'a str,
}

fn hourly_alert(
    changes: &StatusChanges,
    ctx: &NotificationContext<'_>,
) -> Result<EmailJob, askama::Error> {
    let body = HourlyAlert {
        greeting: greeting(ctx.now.hour()),
        time: ctx.now.format("%H:%M").to_string(),
        sections: vec![
            Section {
                state: "offline",
                names: &changes.newly_offline,
            },
            Section {
                state: "online",
                names: &changes.newly_online,
            },
        ],
        signature: ctx.signature,
    }
    .render()?;

    Ok(ctx.job(RecipientGroup::Operations, HOURLY_SUBJECT, body))
}

fn full_report(
    group: RecipientGroup,
    subject: &str,
    ctx: &NotificationContext<'_>,
) -> Result<EmailJob, askama::Error> {
    let body = StatusReport {
        greeting: greeting(ctx.now.hour()),
        time: ctx.now.format("%H:%M").to_string(),
        platform_label: ctx.platform_label,
        signature: ctx.signature,
    }
    .render()?;

    Ok(ctx.job(group, subject, body))
}

/// Decide which mails a scheduled run sends.
///
/// Every trigger sends the change alert to operations, even with no changes.
/// Validation additionally sends the full report to operations, daily sends
/// it to everyone. Full reports come first.
pub fn decide_notifications(
    trigger: TriggerKind,
    changes: &StatusChanges,
    ctx: &NotificationContext<'_>,
) -> Result<Vec<EmailJob>, askama::Error> {
    let mut jobs = Vec::with_capacity(2);

    match trigger {
        TriggerKind::Hourly => {}
        TriggerKind::Validation => {
            jobs.push(full_report(RecipientGroup::Operations, VALIDATION_SUBJECT, ctx)?)
        }
        TriggerKind::Daily => jobs.push(full_report(RecipientGroup::Everyone, DAILY_SUBJECT, ctx)?),
    }
    jobs.push(hourly_alert(changes, ctx)?);

    Ok(jobs)
}
