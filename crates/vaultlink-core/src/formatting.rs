//! Reply texts (Telegram HTML parse mode).

use std::time::Duration;

use crate::{
    collection::{CollectMode, Step},
    dispatch::{BroadcastReport, ProgressSnapshot},
};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Human-readable duration: `45 seconds`, `10 minutes`, `1 hour 30 minutes`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    let unit = |n: u64, one: &str| {
        if n == 1 {
            format!("1 {one}")
        } else {
            format!("{n} {one}s")
        }
    };

    let mut parts = Vec::new();
    if h > 0 {
        parts.push(unit(h, "hour"));
    }
    if m > 0 {
        parts.push(unit(m, "minute"));
    }
    if s > 0 || parts.is_empty() {
        parts.push(unit(s, "second"));
    }
    parts.join(" ")
}

/// Operator-facing prompt for a collection step. `link` is the deep link for
/// finalized sessions.
pub fn format_step(step: &Step, mode: CollectMode, link: Option<&str>) -> String {
    match step {
        Step::AwaitingFirst => match mode {
            CollectMode::Single => {
                "Forward the post from the archive channel (or send its link).".to_string()
            }
            _ => "Forward the <b>first</b> post from the archive channel (or send its link)."
                .to_string(),
        },
        Step::AwaitingLast { first } => format!(
            "First post: <code>{}</code>. Now forward the <b>last</b> post.",
            first.sequence
        ),
        Step::Added { count: 0 } => {
            "Forward the posts to include from the archive channel (or send their links), then send /done."
                .to_string()
        }
        Step::Added { count } => {
            format!("Added. {count} collected. Forward more, or send /done.")
        }
        Step::Duplicate { count } => {
            format!("Already collected, skipped. {count} collected so far.")
        }
        Step::AwaitingMessage { count } => format!(
            "{count} collected. Now send the message to show before the files."
        ),
        Step::Finalized(out) => {
            let link = link.unwrap_or(&out.token);
            format!(
                "Your {} link ({} items):\n\n<code>{}</code>",
                mode.label(),
                out.plan.item_count(),
                escape_html(link)
            )
        }
        Step::Cancelled => "Cancelled.".to_string(),
    }
}

pub fn format_progress(p: &ProgressSnapshot) -> String {
    format!(
        "<b>Broadcast</b>: {}/{} processed\nSucceeded: {}\nFailed: {}",
        p.processed, p.total, p.succeeded, p.failed
    )
}

pub fn format_broadcast_report(r: &BroadcastReport, pruned: usize) -> String {
    let mut out = format!(
        "<b>Broadcast finished</b>\nSucceeded: {}\nFailed: {}",
        r.succeeded, r.failed
    );
    if pruned > 0 {
        out.push_str(&format!("\nRemoved {pruned} users who blocked the bot."));
    }
    out
}

pub fn format_join_prompt(links: &[String]) -> String {
    let mut out = "Join the channel(s) below, then open the link again:".to_string();
    for l in links {
        out.push('\n');
        out.push_str(&escape_html(l));
    }
    out
}

pub fn format_auto_delete_notice(delay: Duration) -> String {
    format!(
        "These files will be deleted in <b>{}</b>. Save them somewhere else.",
        format_duration(delay)
    )
}
