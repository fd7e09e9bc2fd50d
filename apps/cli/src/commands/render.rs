//! Terminal rendering shared by the commands.

use colored::Colorize;
use kiln_training::{ClassificationReport, LogEntry, MetricPoint, Severity};

pub fn log_line(entry: &LogEntry) -> String {
    let tag = match entry.severity {
        Severity::Info => "info".dimmed(),
        Severity::Success => "ok".green(),
        Severity::Warning => "warn".yellow(),
        Severity::Error => "error".red().bold(),
    };
    format!("{} {:>5} {}", entry.timestamp.format("%H:%M:%S").to_string().dimmed(), tag, entry.text)
}

/// `0.6931` -> `69.31%`; absent values render as `-`.
pub fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}%", v * 100.0))
}

pub fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}

pub fn metric_line(point: &MetricPoint, total_epochs: u32, completion: f64) -> String {
    format!(
        "Epoch {}/{} [{:>3.0}%]  train acc {}  loss {}  |  val acc {}  loss {}",
        point.epoch.to_string().bold(),
        total_epochs,
        completion,
        percent(point.train_accuracy),
        number(point.train_loss),
        percent(point.val_accuracy).cyan(),
        number(point.val_loss),
    )
}

pub fn print_report(report: &ClassificationReport) {
    println!("{:<24} {:>10} {:>10} {:>10} {:>8}", "Class", "Precision", "Recall", "F1", "Support");
    println!("{}", "─".repeat(66));
    for (label, metrics) in &report.classes {
        println!(
            "{:<24} {:>10} {:>10} {:>10} {:>8}",
            label,
            number(metrics.precision),
            number(metrics.recall),
            number(metrics.f1_score),
            metrics.support.map_or_else(|| "-".to_string(), |s| format!("{s:.0}")),
        );
    }
    for (name, value) in &report.scalars {
        println!("{:<24} {:>10}", name, number(Some(*value)));
    }
}
