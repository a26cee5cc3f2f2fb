//! UI Builder module for creating keyboards and formatting messages

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::warn;

// Import localization
use crate::localization::{t_args_lang, t_lang};

use crate::aggregator::DailyReport;
use crate::ledger::{CatalogEntry, DailyCounts};
use crate::transport::{Button, Keyboard};

pub const CHECK_SUBSCRIPTION: &str = "check_sub";
pub const SKIP_NAME: &str = "skip_name";
pub const SKIP_EMAIL: &str = "skip_email";
pub const CATALOG_PICK_PREFIX: &str = "pick_";

/// Convert a transport keyboard into a Telegram inline keyboard
pub fn to_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|button| match button {
                    Button::Callback { label, data } => {
                        Some(InlineKeyboardButton::callback(label.clone(), data.clone()))
                    }
                    Button::Url { label, url } => match url.parse() {
                        Ok(url) => Some(InlineKeyboardButton::url(label.clone(), url)),
                        Err(e) => {
                            warn!(url = %url, error = %e, "Dropping button with invalid URL");
                            None
                        }
                    },
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    InlineKeyboardMarkup::new(rows)
}

/// Welcome keyboard with the deep link that starts the funnel
pub fn guide_keyboard(deep_link: &str, language_code: Option<&str>) -> Keyboard {
    Keyboard::single(Button::url(
        t_lang("button-get-guide", language_code),
        deep_link,
    ))
}

/// Subscribe link (when the channel has a public URL) plus the re-check button
pub fn subscribe_keyboard(channel_url: Option<&str>, language_code: Option<&str>) -> Keyboard {
    let mut keyboard = Keyboard::default();
    if let Some(url) = channel_url {
        keyboard = keyboard.row(vec![Button::url(
            t_lang("button-subscribe", language_code),
            url,
        )]);
    }
    keyboard.row(vec![Button::callback(
        t_lang("button-check", language_code),
        CHECK_SUBSCRIPTION,
    )])
}

/// Single "skip" button carrying the given callback payload
pub fn skip_keyboard(callback: &str, language_code: Option<&str>) -> Keyboard {
    Keyboard::single(Button::callback(t_lang("button-skip", language_code), callback))
}

/// One button per active catalog entry
pub fn catalog_keyboard(entries: &[CatalogEntry]) -> Keyboard {
    entries
        .iter()
        .enumerate()
        .fold(Keyboard::default(), |keyboard, (i, entry)| {
            keyboard.row(vec![Button::callback(
                format!("📘 {}", entry.name),
                format!("{CATALOG_PICK_PREFIX}{i}"),
            )])
        })
}

fn format_top(values: &[(String, u64)], language_code: Option<&str>) -> String {
    if values.is_empty() {
        return t_lang("report-none", language_code);
    }
    values
        .iter()
        .map(|(value, count)| format!("{value} ({count})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Counter lines shared by the daily report and `/stats`
pub fn format_counts(counts: &DailyCounts, language_code: Option<&str>) -> String {
    [
        t_args_lang(
            "report-total",
            &[("total", &counts.total.to_string())],
            language_code,
        ),
        t_args_lang(
            "report-distinct",
            &[("distinct", &counts.distinct_visitors.to_string())],
            language_code,
        ),
        t_args_lang(
            "report-sources",
            &[("values", &format_top(&counts.sources, language_code))],
            language_code,
        ),
        t_args_lang(
            "report-campaigns",
            &[("values", &format_top(&counts.campaigns, language_code))],
            language_code,
        ),
        t_args_lang(
            "report-referrers",
            &[("values", &format_top(&counts.referrers, language_code))],
            language_code,
        ),
    ]
    .join("\n")
}

/// Human-readable daily report
pub fn format_report(report: &DailyReport, language_code: Option<&str>) -> String {
    let date = report.record.date.format("%d.%m.%Y").to_string();
    let members = match report.record.member_count {
        Some(count) => t_args_lang(
            "report-members",
            &[
                ("members", &count.to_string()),
                ("delta", &format!("{:+}", report.record.member_delta)),
            ],
            language_code,
        ),
        None => t_lang("report-members-unknown", language_code),
    };

    format!(
        "{}\n\n{}\n{}",
        t_args_lang("report-title", &[("date", &date)], language_code),
        format_counts(&report.counts, language_code),
        members
    )
}
