//! Output formatting and styling module.
//!
//! Every line the CLI prints to the user goes through [`OutputFormatter`], so
//! colors and layout can be changed in one place. Diagnostics go through
//! `tracing` instead.

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use crate::audit::{AuditAction, AuditRecord};
use crate::file_category::{Classification, RuleSet};
use crate::rule_store::RetentionPolicy;

/// Manages all CLI output with consistent styling and formatting.
///
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Progress bars and summary tables
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use tidywatch::output::OutputFormatter;
    /// OutputFormatter::success("Watching ~/Downloads");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark, to stderr.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates a progress bar for a bulk sort of `total` files.
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        let pb = ProgressBar::new(total);
        pb.set_style(style);
        pb
    }

    /// Prints one audit record, colored by outcome.
    pub fn record(record: &AuditRecord) {
        let subject = record.subject.display();
        match record.action {
            AuditAction::Moved | AuditAction::Deleted => println!(
                "{} {} {} {}",
                "✓".green(),
                record.action.label().green(),
                subject,
                format!("-> {}", record.detail).dimmed()
            ),
            AuditAction::LeftUnmatched => {
                println!("{} {} {}", "·".dimmed(), record.action.label().dimmed(), subject)
            }
            _ => eprintln!(
                "{} {} {}: {}",
                "✗".red(),
                record.action.label().red(),
                subject,
                record.detail
            ),
        }
    }

    /// Prints how many records of each action a batch produced.
    pub fn records_summary(title: &str, records: &[AuditRecord]) {
        Self::header(title);
        if records.is_empty() {
            Self::plain("Nothing to do");
            return;
        }

        let actions = [
            AuditAction::Moved,
            AuditAction::LeftUnmatched,
            AuditAction::MoveFailed,
            AuditAction::Deleted,
            AuditAction::DeleteFailed,
        ];
        let rows: Vec<(String, usize)> = actions
            .iter()
            .map(|action| {
                let count = records.iter().filter(|r| r.action == *action).count();
                (action.label().to_string(), count)
            })
            .filter(|(_, count)| *count > 0)
            .collect();

        Self::summary_table("Action", &rows, records.len());
    }

    /// Prints a two-column table of counts with a total row.
    ///
    /// Rows are printed in the order given.
    pub fn summary_table(label: &str, rows: &[(String, usize)], total: usize) {
        let width = rows
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0)
            .max(label.len())
            .max(5);

        println!("{:<width$} | {}", label.bold(), "Files".bold(), width = width);
        println!("{}", "-".repeat(width + 10));
        for (name, count) in rows {
            println!(
                "{:<width$} | {} {}",
                name,
                count.to_string().green(),
                if *count == 1 { "file" } else { "files" },
                width = width
            );
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total.to_string().green().bold(),
            if total == 1 { "file" } else { "files" },
            width = width
        );
    }

    /// Prints the result of a dry run: where each pending file would go.
    pub fn preview(root_label: &str, plan: &[(std::path::PathBuf, Classification)]) {
        Self::dry_run_notice(&format!("Would sort {} file(s) in {}", plan.len(), root_label));
        for (path, classification) in plan {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match classification {
                Classification::Category(category) => {
                    println!("  {} -> {}/", name, category.cyan())
                }
                Classification::Unmatched => println!("  {} {}", name, "(unmatched)".dimmed()),
            }
        }
    }

    pub fn rules(rules: &RuleSet) {
        Self::header("RULES");
        if rules.is_empty() {
            Self::plain("No categories defined");
        }
        for category in rules.categories() {
            let extensions: Vec<String> = category
                .extensions
                .iter()
                .map(|e| format!(".{}", e))
                .collect();
            println!("{:<12} {}", category.name.bold(), extensions.join(" "));
        }
    }

    pub fn policy(policy: &RetentionPolicy) {
        Self::header("SETTINGS");
        let on_off = |flag: bool| if flag { "on".green() } else { "off".red() };
        println!(
            "scheduler_enabled        {}",
            on_off(policy.scheduler_enabled)
        );
        println!("scheduler_interval_hours {}", policy.scheduler_interval_hours);
        println!(
            "auto_delete_enabled      {}",
            on_off(policy.auto_delete_enabled)
        );
        println!("delete_after_days        {}", policy.delete_after_days);
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }
}
