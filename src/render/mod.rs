//! Incremental terminal rendering.
//!
//! The renderer turns the last valid snapshot into a styled text buffer and
//! draws it by moving the cursor home and clearing downward. The buffer is
//! compared against the previously drawn one and identical frames are
//! skipped, so an unchanged dashboard never flickers.

use std::io::{self, Write};

use colored::Colorize;
use crossterm::{cursor, terminal, QueueableCommand};

use crate::pipeline::{CrashReport, FileReport, RunSnapshot, SyntaxReport};
use crate::state::{TestIdentity, TestStatus};

/// Keybinding reminder appended to watch-mode frames.
const KEY_HINTS: &str = "u pudb · p pdb++ · r rerun · q quit";

/// Styled keybinding reminder line for the watch loop.
#[must_use]
pub fn key_hints() -> String {
    format!("\n{}\n", KEY_HINTS.dimmed())
}

/// Maximum execution-log lines shown in the deep-dive block.
const MAX_LOG_LINES: usize = 12;

/// Stateful incremental renderer.
#[derive(Debug, Default)]
pub struct Dashboard {
    last_frame: String,
}

impl Dashboard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the last frame so the next draw repaints everything.
    pub fn reset(&mut self) {
        self.last_frame.clear();
    }

    /// Draw a frame, skipping the terminal entirely when nothing changed.
    pub fn draw(&mut self, out: &mut impl Write, frame: &str) -> io::Result<()> {
        if frame == self.last_frame {
            return Ok(());
        }
        out.queue(cursor::MoveTo(0, 0))?;
        out.queue(terminal::Clear(terminal::ClearType::FromCursorDown))?;
        // Raw mode needs explicit carriage returns.
        for line in frame.lines() {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\r\n")?;
        }
        out.flush()?;
        self.last_frame = frame.to_string();
        Ok(())
    }
}

/// Render a completed run.
#[must_use]
pub fn render_snapshot(snapshot: &RunSnapshot) -> String {
    let mut buf = String::new();

    let stamp = snapshot
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    buf.push_str(&format!(
        "{} {}\n\n",
        "vigil".bold(),
        format!("last run {stamp}").dimmed()
    ));

    for file in &snapshot.files {
        render_file(&mut buf, file, &snapshot.transitioned);
    }

    if let Some(ref note) = snapshot.deep_dive_note {
        buf.push('\n');
        buf.push_str(&format!("{} {note}\n", "note:".yellow().bold()));
    }

    if let Some(ref dive) = snapshot.deep_dive {
        buf.push('\n');
        buf.push_str(&format!(
            "{} {}\n",
            "FIRST FAILURE".red().bold(),
            dive.identity.to_string().bold()
        ));

        for line in &dive.excerpt {
            if line.starts_with("--> ") {
                buf.push_str(&format!("{}\n", line.red()));
            } else {
                buf.push_str(line);
                buf.push('\n');
            }
        }

        if let Some(ref summary) = dive.summary {
            buf.push('\n');
            if summary.message.is_empty() {
                buf.push_str(&format!("{}\n", format!("{}:", summary.kind).red().bold()));
            } else {
                buf.push_str(&format!(
                    "{} {}\n",
                    format!("{}:", summary.kind).red().bold(),
                    summary.message
                ));
            }
            if let Some(ref actual) = summary.actual {
                buf.push_str(&format!("  Actual:   {}\n", actual.yellow()));
            }
            if let Some(ref expected) = summary.expected {
                buf.push_str(&format!("  Expected: {}\n", expected.green()));
            }
        }

        if !dive.exec_log.is_empty() {
            buf.push('\n');
            buf.push_str(&format!("{}\n", "executed:".dimmed()));
            let skipped = dive.exec_log.len().saturating_sub(MAX_LOG_LINES);
            if skipped > 0 {
                buf.push_str(&format!("{}\n", format!("  … {skipped} earlier").dimmed()));
            }
            for stmt in dive.exec_log.iter().skip(skipped) {
                buf.push_str(&format!("{}\n", format!("  >> {stmt}").dimmed()));
            }
        }
    }

    buf
}

fn render_file(buf: &mut String, file: &FileReport, transitioned: &std::collections::BTreeSet<TestIdentity>) {
    if file.no_tests && file.results.is_empty() {
        buf.push_str(&format!(
            "{} {}\n",
            file.label.cyan().bold(),
            "(no tests)".dimmed()
        ));
        return;
    }

    buf.push_str(&format!("{}\n", file.label.cyan().bold()));
    for (method, status) in &file.results {
        let mark = status_mark(*status);
        let identity = TestIdentity::new(&file.label, method);
        if transitioned.contains(&identity) {
            buf.push_str(&format!("  {mark} {} {}\n", method.bold(), "•".bold()));
        } else {
            buf.push_str(&format!("  {mark} {method}\n"));
        }
    }
}

fn status_mark(status: TestStatus) -> String {
    match status {
        TestStatus::Pass => "✓".green().to_string(),
        TestStatus::Fail => "✗".red().to_string(),
        TestStatus::Skip => "-".yellow().to_string(),
    }
}

/// Render the syntax-gate panel. The previous snapshot stays committed; only
/// the display changes.
#[must_use]
pub fn render_syntax(report: &SyntaxReport) -> String {
    let mut buf = String::new();
    buf.push_str(&format!(
        "{} {}\n\n",
        "SYNTAX ERROR".on_red().bold(),
        report.file.display().to_string().bold()
    ));
    for line in report.detail.lines() {
        buf.push_str(&format!("  {line}\n"));
    }
    buf
}

/// Render the crash panel.
#[must_use]
pub fn render_crash(report: &CrashReport) -> String {
    let mut buf = String::new();
    buf.push_str(&format!(
        "{} harness for {} aborted before running any test\n\n",
        "CRASH".on_red().bold(),
        report.label.bold()
    ));
    // Show only from the last traceback frame; the rest is noise.
    let lines: Vec<&str> = report.output.lines().collect();
    let start = lines
        .iter()
        .rposition(|l| l.trim_start().starts_with("File \""))
        .unwrap_or(0);
    for line in &lines[start..] {
        if line.contains("Error") || line.contains("Exception") {
            buf.push_str(&format!("  {}\n", line.red()));
        } else {
            buf.push_str(&format!("  {line}\n"));
        }
    }
    buf
}

/// Render a dedicated error panel (builder failures and the like); the
/// dashboard remains usable underneath.
#[must_use]
pub fn render_error_panel(heading: &str, detail: &str) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("{}\n\n", heading.on_red().bold()));
    for line in detail.lines() {
        buf.push_str(&format!("  {line}\n"));
    }
    buf
}
