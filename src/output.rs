use service_fleet::events::{ActionKind, Event};
use service_fleet::LifecycleState;

/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!` so that
/// output can be captured in tests or suppressed when only the exit code
/// matters.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Stopping all services...")
    fn status(&self, message: &str);

    /// Success message (e.g., "All services started")
    fn success(&self, message: &str);

    /// Warning message (e.g., "Proxy reload failed")
    fn warning(&self, message: &str);

    /// Error message (e.g., "Service 'db' failed to start")
    fn error(&self, message: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output: writes to stdout/stderr with ANSI colors.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("\x1b[32m{}\x1b[0m", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn blank(&self) {
        println!();
    }
}

/// One terminal line per lifecycle event.
pub fn print_event(event: &Event, out: &dyn UserOutput) {
    match event {
        Event::ServiceRegistered {
            id,
            name,
            icon,
            port,
            required,
            ..
        } => {
            let port = port.map(|p| format!(" :{}", p)).unwrap_or_default();
            let required = if *required { " (required)" } else { "" };
            let icon = if icon.is_empty() { "-" } else { icon.as_str() };
            out.status(&format!("  {} {:<20} {}{}{}", icon, id, name, port, required));
        }
        Event::ServiceAction { id, kind, message } => {
            let verb = match kind {
                ActionKind::Ensure => "ensure",
                ActionKind::Inspect => "inspect",
                ActionKind::Reclaim => "reclaim",
                ActionKind::Start => "start",
                ActionKind::Reload => "reload",
                ActionKind::Stop => "stop",
            };
            out.status(&format!("  . {:<20} {:<8} {}", id, verb, message));
        }
        Event::ServiceStatus {
            id,
            state,
            pid,
            message,
            ..
        } => {
            let pid = pid.map(|p| format!(" [PID {}]", p)).unwrap_or_default();
            let line = format!("  {} {:<20} {}{} {}", state_icon(*state), id, state, pid, message);
            match state {
                LifecycleState::Error | LifecycleState::Blocked => out.error(line.trim_end()),
                LifecycleState::Running => out.success(line.trim_end()),
                _ => out.status(line.trim_end()),
            }
        }
    }
}

fn state_icon(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Running => "+",
        LifecycleState::Reclaimed => "~",
        LifecycleState::Stopped => "o",
        LifecycleState::Error | LifecycleState::Blocked => "x",
        LifecycleState::Pending => ".",
    }
}
