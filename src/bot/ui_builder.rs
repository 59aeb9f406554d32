//! UI Builder module for rendering menus and formatting run messages

use std::sync::LazyLock;

use regex::Regex;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::dashboard::{AnalysisMetrics, LibraryMetrics, RunRecord};
use crate::localization::{t, t_args};

use super::menu::{ButtonLabel, Menu, MenuHeading};

/// Automatic run names carry an `Auto_<user>_` prefix nobody wants to read
static AUTO_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Auto_[\w]*?_").expect("run name pattern is valid"));

const BLUE_CIRCLE: &str = "🔵";
const WHITE_CIRCLE: &str = "⚪";

/// Threshold keys used by the dashboard's experiment record
const LOADING_THRESHOLD: &str = "Bead Loading (%)";
const USABLE_THRESHOLD: &str = "Usable Sequence (%)";
const KEY_SIGNAL_THRESHOLD: &str = "Key Signal (1-100)";

/// Heading text shown above a menu
pub fn menu_text(heading: &MenuHeading, first_name: &str) -> String {
    match heading {
        MenuHeading::Greeting => t_args("menu-prompt", &[("name", first_name.into())]),
        MenuHeading::AdminMenu => t("menu-admin"),
        MenuHeading::ChooseAction => t("menu-choose"),
        MenuHeading::EnterPin => t("menu-pin"),
    }
}

pub fn button_label(label: &ButtonLabel) -> String {
    match label {
        ButtonLabel::Administration => t("button-administration"),
        ButtonLabel::Exit => t("button-exit"),
        ButtonLabel::Back => t("button-back"),
        ButtonLabel::JoinQueue => t("button-join"),
        ButtonLabel::Approve(username) => t_args("button-approve", &[("username", username.as_str().into())]),
        ButtonLabel::Block => t("button-block"),
        ButtonLabel::StartTicking => t("button-start-ticking"),
        ButtonLabel::StopTicking => t("button-stop-ticking"),
        ButtonLabel::ViewQueue => t("button-view-queue"),
        ButtonLabel::DownloadLog => t("button-download-log"),
        ButtonLabel::Kill => t("button-kill"),
        ButtonLabel::Monitor => t("button-monitor"),
        ButtonLabel::Text(text) => text.clone(),
    }
}

/// Create the inline keyboard for a menu
pub fn create_menu_keyboard(menu: &Menu) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = menu
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| InlineKeyboardButton::callback(button_label(&button.label), button.callback.encode()))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

pub fn clean_run_name(name: &str) -> String {
    AUTO_PREFIX.replace_all(name, "").into_owned()
}

/// One-message summary used when listing runs
pub fn format_run_summary(run: &RunRecord) -> String {
    format!("[{}]\n{}\nStatus: {}", run.id, clean_run_name(&run.results_name), run.status)
}

/// Five circles, one blue per started 20%, capped at five
pub fn pcsquares(ratio: f64) -> String {
    let blue = if ratio.is_finite() && ratio > 0.0 {
        ((ratio * 100.0 / 20.0).floor() as usize + 1).min(5)
    } else {
        1
    };
    format!("{}{}", BLUE_CIRCLE.repeat(blue), WHITE_CIRCLE.repeat(5 - blue))
}

pub fn mark(passed: bool) -> &'static str {
    if passed {
        "✅"
    } else {
        "❌"
    }
}

/// Division that yields 0 instead of NaN or infinity
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Pass/fail mark against a threshold, or nothing when the run has none
fn threshold_mark(run: &RunRecord, key: &str, value: f64) -> String {
    run.experiment
        .as_ref()
        .and_then(|experiment| experiment.qc_thresholds.get(key))
        .map(|threshold| format!(" {}", mark(value >= *threshold)))
        .unwrap_or_default()
}

/// QC report of a run with both metric sets available
pub fn format_qc_report(run: &RunRecord, analysis: &AnalysisMetrics, library: &LibraryMetrics) -> String {
    let addressable = analysis.total_wells - analysis.excluded;
    let loading = ratio(analysis.bead, addressable);
    let live = ratio(analysis.live, analysis.bead);
    let lib = ratio(analysis.lib, analysis.live);
    let usable = ratio(analysis.lib_final, analysis.lib);
    let key_signal = library.ave_key_counts;

    let at_last_monitoring = if run.status == "Completed" {
        String::new()
    } else {
        format!(" {}", t("run-at-last-monitoring"))
    };

    format!(
        "[{}]\n{}\n\
         {} Loading: {}{}\n\
         {} Live: {}\n\
         {} Library: {}\n\
         {} Usable: {}{}\n\
         {} Key signal: {}{}\n\
         Mean length: {}\n\
         Status: {}{}",
        run.id,
        clean_run_name(&run.results_name),
        pcsquares(loading),
        percent(loading),
        threshold_mark(run, LOADING_THRESHOLD, loading * 100.0),
        pcsquares(live),
        percent(live),
        pcsquares(lib),
        percent(lib),
        pcsquares(usable),
        percent(usable),
        threshold_mark(run, USABLE_THRESHOLD, usable * 100.0),
        pcsquares(key_signal / 100.0),
        key_signal,
        threshold_mark(run, KEY_SIGNAL_THRESHOLD, key_signal),
        library.q20_mean_alignment_length,
        run.status,
        at_last_monitoring,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::action::Callback;
    use crate::bot::menu::MenuButton;
    use crate::dashboard::Experiment;
    use std::collections::HashMap;
    use teloxide::types::InlineKeyboardButtonKind;

    fn run(status: &str) -> RunRecord {
        let thresholds: HashMap<String, f64> = [
            (LOADING_THRESHOLD.to_string(), 30.0),
            (USABLE_THRESHOLD.to_string(), 30.0),
            (KEY_SIGNAL_THRESHOLD.to_string(), 30.0),
        ]
        .into_iter()
        .collect();
        RunRecord {
            id: 41,
            results_name: "Auto_user_PRO-41_run_41".to_string(),
            status: status.to_string(),
            analysismetrics: Some(AnalysisMetrics {
                total_wells: 1000.0,
                excluded: 100.0,
                bead: 810.0,
                live: 800.0,
                lib: 400.0,
                lib_final: 100.0,
            }),
            libmetrics: Some(LibraryMetrics {
                ave_key_counts: 85.0,
                q20_mean_alignment_length: 142.0,
            }),
            experiment: Some(Experiment { qc_thresholds: thresholds }),
        }
    }

    #[test]
    fn test_clean_run_name() {
        assert_eq!(clean_run_name("Auto_user_PRO-41_run_41"), "PRO-41_run_41");
        assert_eq!(clean_run_name("R_2024_manual"), "R_2024_manual");
    }

    #[test]
    fn test_run_summary() {
        assert_eq!(format_run_summary(&run("Started")), "[41]\nPRO-41_run_41\nStatus: Started");
    }

    #[test]
    fn test_pcsquares_bounds() {
        assert_eq!(pcsquares(0.0), "🔵⚪⚪⚪⚪");
        assert_eq!(pcsquares(0.19), "🔵⚪⚪⚪⚪");
        assert_eq!(pcsquares(0.45), "🔵🔵🔵⚪⚪");
        assert_eq!(pcsquares(0.80), "🔵🔵🔵🔵🔵");
        assert_eq!(pcsquares(1.0), "🔵🔵🔵🔵🔵");
        assert_eq!(pcsquares(f64::NAN), "🔵⚪⚪⚪⚪");
    }

    #[test]
    fn test_qc_report_marks_thresholds() {
        let record = run("Completed");
        let report = format_qc_report(
            &record,
            record.analysismetrics.as_ref().unwrap(),
            record.libmetrics.as_ref().unwrap(),
        );
        assert!(report.starts_with("[41]\nPRO-41_run_41\n"));
        assert!(report.contains("Loading: 90.0% ✅"));
        assert!(report.contains("Usable: 25.0% ❌"));
        assert!(report.contains("Key signal: 85 ✅"));
        assert!(report.contains("Mean length: 142"));
        assert!(report.ends_with("Status: Completed"));
    }

    #[test]
    fn test_qc_report_survives_zero_counts() {
        let mut record = run("Started");
        let analysis = AnalysisMetrics::default();
        record.experiment = None;
        let report = format_qc_report(&record, &analysis, record.libmetrics.as_ref().unwrap());
        assert!(report.contains("Loading: 0.0%\n"));
        assert!(report.ends_with("Status: Started (at last monitoring)"));
    }

    #[test]
    fn test_menu_keyboard_carries_callbacks() {
        let menu = Menu {
            heading: MenuHeading::Greeting,
            rows: vec![vec![
                MenuButton::new(ButtonLabel::Approve("carol".into()), Callback::Approve("carol".into())),
                MenuButton::new(ButtonLabel::Block, Callback::Block("carol".into())),
            ]],
        };
        let keyboard = create_menu_keyboard(&menu);
        let row = &keyboard.inline_keyboard[0];
        assert_eq!(row[0].text, "Approve carol");
        assert_eq!(row[0].kind, InlineKeyboardButtonKind::CallbackData("App_carol".into()));
        assert_eq!(row[1].text, "Block");
        assert_eq!(menu_text(&menu.heading, "Alice"), "How can I help you, Alice?");
    }
}
