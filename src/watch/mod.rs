//! The cooperative watch loop.
//!
//! Single logical thread: a bounded keypress poll alternates with a
//! fingerprint check. Harness runs and debugger launches are synchronous,
//! blocking subprocess calls and the loop suspends for their duration —
//! concurrent test runs against a mutating source tree would be unsound.

use std::io::{self, stdout, Stdout, Write};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::{cursor, terminal, ExecutableCommand};
use tracing::{info, warn};

use vigil::config::{DebuggerKind, WatchConfig};
use vigil::debug::DebugSessionManager;
use vigil::error::{Result, VigilError};
use vigil::monitor::{ChangeMonitor, Fingerprint};
use vigil::pipeline::{Pipeline, RunOutcome, RunSnapshot};
use vigil::render::{self, Dashboard};
use vigil::state::StateTracker;

/// Idle keypress poll window.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Restores the terminal on every exit path, including panics.
struct TerminalGuard;

impl TerminalGuard {
    fn acquire() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        stdout().execute(cursor::Hide)?;
        stdout().execute(terminal::Clear(terminal::ClearType::All))?;
        Ok(Self)
    }

    /// Release the terminal around a blocking debugger handoff.
    fn suspend(&self) -> io::Result<()> {
        terminal::disable_raw_mode()?;
        stdout().execute(cursor::Show)?;
        Ok(())
    }

    fn resume(&self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        stdout().execute(cursor::Hide)?;
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let _ = stdout().execute(cursor::Show);
    }
}

/// What a keypress asks the loop to do.
enum Action {
    Quit,
    Rerun,
    Debug(DebuggerKind),
}

/// The long-running watch dashboard.
pub struct Watcher {
    config: WatchConfig,
    dashboard: Dashboard,
    /// The last valid snapshot; crashed and syntax-blocked runs keep it.
    snapshot: Option<RunSnapshot>,
}

impl Watcher {
    #[must_use]
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            dashboard: Dashboard::new(),
            snapshot: None,
        }
    }

    /// Run until quit or interrupt. Exit codes do not encode test outcomes;
    /// this is a dashboard, not a one-shot CI check.
    pub fn run(mut self) -> Result<()> {
        let pipeline = Pipeline::new(&self.config);
        let mut tracker = StateTracker::from_persisted(pipeline.persistence().load()?);

        let guard = TerminalGuard::acquire()?;
        let mut out = stdout();

        // Startup run: the dashboard needs content before the first change.
        self.execute_and_draw(&pipeline, &mut tracker, &mut out)?;

        // Baseline fingerprint; taking it never triggers a run.
        let mut baseline = self.monitor()?.fingerprint()?;

        loop {
            if let Some(action) = poll_key(POLL_INTERVAL)? {
                match action {
                    Action::Quit => break,
                    Action::Rerun => {
                        self.execute_and_draw(&pipeline, &mut tracker, &mut out)?;
                        baseline = self.monitor()?.fingerprint()?;
                    }
                    Action::Debug(kind) => {
                        self.debug_session(kind, &guard, &pipeline, &mut tracker, &mut out)?;
                        baseline = self.monitor()?.fingerprint()?;
                    }
                }
                continue;
            }

            if !self.config.auto_refresh {
                continue;
            }

            let monitor = self.monitor()?;
            let current = monitor.fingerprint()?;
            if ChangeMonitor::has_changed(&baseline, &current) {
                // Let the editor's save sequence settle before acting.
                let settled: Fingerprint = monitor.settle()?;
                info!("change detected, rerunning");
                self.execute_and_draw(&pipeline, &mut tracker, &mut out)?;
                baseline = settled;
            }
        }

        drop(guard);
        Ok(())
    }

    /// The monitor is rebuilt per check: the active test directory can
    /// change when `custom_tests/` gains or loses its first source file.
    fn monitor(&self) -> Result<ChangeMonitor> {
        ChangeMonitor::new(&self.config.project_root, self.config.active_test_dir())
    }

    /// Execute one pipeline run and draw whatever it produced.
    fn execute_and_draw(
        &mut self,
        pipeline: &Pipeline,
        tracker: &mut StateTracker,
        out: &mut Stdout,
    ) -> Result<()> {
        let frame = match pipeline.execute(tracker) {
            Ok(RunOutcome::Completed(snapshot)) => {
                let frame = render::render_snapshot(&snapshot);
                self.snapshot = Some(*snapshot);
                frame
            }
            Ok(RunOutcome::SyntaxError(report)) => render::render_syntax(&report),
            Ok(RunOutcome::Crash(report)) => render::render_crash(&report),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("run failed: {e}");
                render::render_error_panel("RUN FAILED", &e.to_string())
            }
        };
        self.dashboard
            .draw(out, &(frame + &render::key_hints()))?;
        Ok(())
    }

    /// Hand the terminal to an external debugger, then take a fresh run so
    /// the dashboard reflects any fix made during the session.
    fn debug_session(
        &mut self,
        kind: DebuggerKind,
        guard: &TerminalGuard,
        pipeline: &Pipeline,
        tracker: &mut StateTracker,
        out: &mut Stdout,
    ) -> Result<()> {
        let Some(identity) = self
            .snapshot
            .as_ref()
            .and_then(|s| s.first_failure.clone())
        else {
            let frame = render::render_error_panel(
                "NOTHING TO DEBUG",
                "no failing test in the last completed run",
            ) + &render::key_hints();
            self.dashboard.draw(out, &frame)?;
            return Ok(());
        };

        guard.suspend()?;
        out.flush()?;
        let result = DebugSessionManager::new(&self.config).launch(&identity, kind);
        guard.resume()?;
        self.dashboard.reset();

        match result {
            Ok(()) => self.execute_and_draw(pipeline, tracker, out),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("debug session failed: {e}");
                let frame = render::render_error_panel("DEBUG SESSION FAILED", &e.to_string())
                    + &render::key_hints();
                self.dashboard.draw(out, &frame)?;
                Ok(())
            }
        }
    }
}

/// Bounded wait for one keypress; `None` on timeout.
fn poll_key(window: Duration) -> Result<Option<Action>> {
    if !event::poll(window).map_err(VigilError::Io)? {
        return Ok(None);
    }
    let Event::Key(key) = event::read().map_err(VigilError::Io)? else {
        return Ok(None);
    };
    if key.kind == KeyEventKind::Release {
        return Ok(None);
    }

    let action = match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        KeyCode::Char('r') => Some(Action::Rerun),
        KeyCode::Char('u') => Some(Action::Debug(DebuggerKind::Pudb)),
        KeyCode::Char('p') => Some(Action::Debug(DebuggerKind::Pdbpp)),
        _ => None,
    };
    Ok(action)
}
