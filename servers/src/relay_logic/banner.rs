use chrono::{DateTime, Local, TimeDelta};
use lib_common::core::commands::format_uptime;

/// Frames `lines` in an ASCII box.
pub fn boxed(lines: &[String]) -> String {
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let edge = format!("+{}+", "-".repeat(width + 2));
    let mut out = vec![edge.clone()];
    for line in lines {
        let pad = width - line.chars().count();
        out.push(format!("| {}{} |", line, " ".repeat(pad)));
    }
    out.push(edge);
    out.join("\n")
}

pub fn start_banner(app: &str, started: DateTime<Local>) -> String {
    boxed(&[
        format!("{app} v{}", env!("CARGO_PKG_VERSION")),
        format!("started {}", started.to_rfc3339()),
    ])
}

pub fn exit_banner(app: &str, uptime: TimeDelta, restarts: u64) -> String {
    boxed(&[
        format!("{app} exiting"),
        format!("uptime {}", format_uptime(uptime)),
        format!("restarts {restarts}"),
    ])
}
