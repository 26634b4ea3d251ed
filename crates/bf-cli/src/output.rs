//! Terminal output: fleet tables and colored status lines

use tabled::{settings::Style, Table, Tabled};

use bf_orchestrator::{InstanceSnapshot, LaunchReport, ShutdownReport};

/// Format instance snapshots as a table
pub fn format_instances(instances: &[InstanceSnapshot]) -> String {
    if instances.is_empty() {
        return "No pipelines started".to_string();
    }

    #[derive(Tabled)]
    struct InstanceRow {
        #[tabled(rename = "PIPELINE")]
        name: String,
        #[tabled(rename = "PORTS")]
        ports: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "PUBLIC URL")]
        url: String,
        #[tabled(rename = "BOT")]
        bot: String,
        #[tabled(rename = "ERROR")]
        error: String,
    }

    let rows: Vec<InstanceRow> = instances
        .iter()
        .map(|i| InstanceRow {
            name: match &i.label {
                Some(label) => format!("{} ({})", i.id, label),
                None => i.id.to_string(),
            },
            ports: format!("{}/{}", i.ports.worker, i.ports.relay),
            state: i.state.to_string(),
            url: i.tunnel_url.clone().unwrap_or_else(|| "-".to_string()),
            bot: i
                .registration
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
            error: i
                .last_error
                .as_deref()
                .map(|e| truncate(e, 60))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// One-line launch outcome
pub fn format_launch_summary(report: &LaunchReport) -> String {
    let mut summary = format!(
        "{} of {} pipelines running",
        report.running(),
        report.requested
    );
    if report.failed() > 0 {
        summary.push_str(&format!(", {} failed", report.failed()));
    }
    if report.not_started() > 0 {
        summary.push_str(&format!(", {} not started", report.not_started()));
    }
    summary
}

/// One-line shutdown outcome
pub fn format_shutdown_summary(report: &ShutdownReport) -> String {
    let mut summary = format!(
        "Shutdown complete in {:.1}s: {} stopped",
        report.elapsed.as_secs_f64(),
        report.stopped
    );
    if report.failed > 0 {
        summary.push_str(&format!(", {} failed", report.failed));
    }
    if report.forced_kills > 0 {
        summary.push_str(&format!(", {} force-killed", report.forced_kills));
    }
    if report.deregistration_failures > 0 {
        summary.push_str(&format!(
            ", {} bot removals failed",
            report.deregistration_failures
        ));
    }
    summary
}

/// Truncate on a character boundary, with ellipsis
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
