// Colored terminal output for scan reports and one-off classifications.
//
// This module handles all terminal-specific formatting. The main.rs command
// handlers delegate here.

use colored::Colorize;

use super::truncate_chars;
use crate::bridge::memory::Stats;
use crate::pipeline::overlay::{Redaction, RedactionState};
use crate::pipeline::toast::{Toast, ToastKind};
use crate::toxicity::traits::{Category, Classification, Severity};

/// Display every redaction applied during a scan.
pub fn display_redactions(redactions: &[&Redaction]) {
    if redactions.is_empty() {
        println!("{}", "No content crossed the sensitivity threshold.".green());
        return;
    }

    println!(
        "\n{}",
        format!("=== Redacted Content ({} items) ===", redactions.len()).bold()
    );
    println!();

    println!(
        "  {:>6}  {:<18} {:<8} {:>5}  {}",
        "Node".dimmed(),
        "Category".dimmed(),
        "Severity".dimmed(),
        "Score".dimmed(),
        "Text".dimmed(),
    );
    println!("  {}", "-".repeat(78).dimmed());

    for redaction in redactions {
        let category = redaction
            .result
            .dominant_category
            .map(|c| c.label())
            .unwrap_or("?");
        let severity = redaction.result.severity();
        let marker = match redaction.state {
            RedactionState::Revealed => " (revealed)".dimmed().to_string(),
            _ => String::new(),
        };

        println!(
            "  {:>6}  {:<18} {:<8} {:>4}%  {}{}",
            redaction.node.to_string(),
            category,
            colorize_severity(severity),
            redaction.result.confidence_percent(),
            truncate_chars(&redaction.text, 40).dimmed(),
            marker,
        );
    }

    println!();

    let high = redactions
        .iter()
        .filter(|r| r.result.severity() == Severity::High)
        .count();
    let medium = redactions
        .iter()
        .filter(|r| r.result.severity() == Severity::Medium)
        .count();

    if high > 0 {
        println!("  {} {} high severity", "!!".red().bold(), high);
    }
    if medium > 0 {
        println!("  {} {} medium severity", "!".yellow(), medium);
    }
}

/// Display the toasts still on screen when the scan finished.
pub fn display_toasts(toasts: &[Toast]) {
    if toasts.is_empty() {
        return;
    }
    println!("\n{}", "Notifications".bold());
    for toast in toasts {
        let icon = match toast.kind {
            ToastKind::Detection => "●".red(),
            ToastKind::Warning => "●".yellow(),
            ToastKind::Info => "●".blue(),
        };
        println!("  {icon} {}", toast.message);
    }
}

/// Display the counters the stats recorder collected.
pub fn display_stats(stats: &Stats) {
    println!("\n{}", "Statistics".bold());
    println!("  Items scanned:  {}", stats.scanned);
    println!("  Items hidden:   {}", stats.detections);
    for (category, count) in &stats.by_category {
        println!("    {:<18} {}", category, count);
    }
}

/// Display what the page pipeline looked at.
pub fn display_page_activity(checked: usize, mutation_batches: u64) {
    println!("\n{}", "Page".bold());
    println!("  Nodes checked:    {}", checked);
    println!("  Mutation batches: {}", mutation_batches);
}

/// Display one classification with a score bar per category.
pub fn display_classification(text: &str, classification: &Classification) {
    println!("\n{} {}", "Text:".bold(), truncate_chars(text, 120));

    let result = match classification {
        Classification::Scored(result) => result,
        Classification::Skipped { .. } => {
            println!("  {}", "Too short to classify.".dimmed());
            return;
        }
        Classification::Failed { error } => {
            println!("  {} {}", "Classification failed:".red(), error);
            return;
        }
    };

    for category in Category::ALL {
        let score = result.score(category);
        let filled = (score * 20.0).round() as usize;
        let bar = format!("{}{}", "█".repeat(filled), "░".repeat(20 - filled));
        let colored_bar = match Severity::from_score(score) {
            Severity::High => bar.red(),
            Severity::Medium => bar.yellow(),
            Severity::Low => bar.green(),
        };
        println!("  {:<18} {} {:.2}", category.label(), colored_bar, score);
    }

    if let Some(category) = result.dominant_category {
        println!(
            "\n  Dominant: {} · {} · {}%",
            category.label().bold(),
            colorize_severity(result.severity()),
            result.confidence_percent()
        );
    }
}

fn colorize_severity(severity: Severity) -> colored::ColoredString {
    let label = severity.as_str();
    match severity {
        Severity::High => label.red().bold(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.green(),
    }
}
