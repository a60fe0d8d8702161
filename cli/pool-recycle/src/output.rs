//! Console output for recycle runs.

use std::io::Write;

use colored::Colorize;
use pool_recycle_engine::{ProgressSink, RecycleReport, TaskReport};
use tabled::{Table, Tabled};

/// Writes progress lines to the terminal as they happen.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn info(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }

    fn error(&self, line: &str) {
        eprintln!("{}", line.red());
    }
}

#[derive(Debug, Tabled)]
struct TaskRow {
    #[tabled(rename = "Node")]
    source: String,

    #[tabled(rename = "Template")]
    template: String,

    #[tabled(rename = "Replacement")]
    destination: String,

    #[tabled(rename = "Machine Destroyed")]
    destroyed: String,

    #[tabled(rename = "State")]
    state: String,
}

impl From<&TaskReport> for TaskRow {
    fn from(task: &TaskReport) -> Self {
        Self {
            source: task.source.clone(),
            template: task.template.clone(),
            destination: task.destination.clone().unwrap_or_else(|| "-".to_string()),
            destroyed: if task.machine_destroyed { "yes" } else { "no" }.to_string(),
            state: task.state.to_string(),
        }
    }
}

/// Print the outcome of a finished run.
pub fn print_report(report: &RecycleReport) {
    if report.tasks.is_empty() {
        println!(
            "{}",
            format!("Pool \"{}\" has no nodes to recycle.", report.pool).dimmed()
        );
        return;
    }

    if report.dry_run {
        println!(
            "{} {} node(s) of pool \"{}\" would be recycled.",
            "Dry run:".blue().bold(),
            report.tasks.len(),
            report.pool
        );
        return;
    }

    let rows: Vec<TaskRow> = report.tasks.iter().map(TaskRow::from).collect();
    println!("{}", Table::new(rows));
    print_success(&format!(
        "Recycled {} node(s) of pool \"{}\".",
        report.tasks.len(),
        report.pool
    ));
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}
