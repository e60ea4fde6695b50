// Output formatting helpers for CLI commands

use clonal_service::{ExecutionEvent, LogLevel, TaskStatus};

/// Print a status message: "     Running message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

pub fn dim_success(message: &str) {
    eprintln!("\x1b[32m{}\x1b[0m", message);
}

pub fn dim_failure(message: &str) {
    eprintln!("\x1b[31m{}\x1b[0m", message);
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

/// Render one progress event
pub fn event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::TaskScheduled {
            handle_id,
            stage,
            upstream,
            ..
        } => {
            let after = if upstream.is_empty() {
                String::new()
            } else {
                let ids: Vec<&str> = upstream.iter().map(|id| id.as_str()).collect();
                format!(" after {}", ids.join(", "))
            };
            dim(&format!("   scheduled {} [{}]{}", stage, handle_id, after));
        }

        ExecutionEvent::TaskStarted { handle_id, stage } => {
            status("Running", &format!("{} [{}]", stage, handle_id));
        }

        ExecutionEvent::TaskCompleted {
            handle_id,
            stage,
            status,
            duration,
            exit_code,
        } => {
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            let line = format!(
                "    {} [{}] {} ({:.2}s){}",
                stage,
                handle_id,
                if *status == TaskStatus::Succeeded { "OK" } else { "FAIL" },
                duration.as_secs_f64(),
                exit_info
            );
            if *status == TaskStatus::Succeeded {
                dim_success(&line);
            } else {
                dim_failure(&line);
            }
        }

        ExecutionEvent::TaskSkipped {
            handle_id,
            stage,
            reason,
        } => {
            warning(&format!("{} [{}] skipped: {}", stage, handle_id, reason));
        }

        ExecutionEvent::InstanceScheduled {
            instance,
            root,
            terminal,
        } => {
            info(&format!("{}: {} -> {}", instance, root.display(), terminal));
        }

        ExecutionEvent::FanInScheduled {
            handle_id,
            instances,
        } => {
            header(&format!("Merging {} instances [{}]", instances, handle_id));
        }

        ExecutionEvent::Log { level, message } => match level {
            LogLevel::Error => error(message),
            LogLevel::Warning => warning(message),
            LogLevel::Info => dim(message),
        },
    }
}
