use crate::output::UserOutput;
use service_fleet::port::{inspect, Ownership, SystemInspector};
use service_fleet::state::PidLedger;
use service_fleet::{config::Config, Options, Registry};

/// Probe every declared port of every enabled service.
pub async fn run_status(
    config: &Config,
    options: &Options,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let registry = Registry::from_config(config, options)?;
    let ledger = PidLedger::load_or_empty(options.pid_ledger_path());
    let inspector = SystemInspector;

    let mut rows = Vec::new();
    for spec in registry.enabled(options) {
        let expected_pid = ledger.get(&spec.id);
        for port in spec.ports() {
            let row = match inspect(&inspector, port, expected_pid, &spec, &options.marker) {
                Ok(probe) => serde_json::json!({
                    "service": spec.id,
                    "port": port,
                    "ownership": probe.ownership,
                    "pid": probe.pid,
                    "command": probe.command,
                }),
                Err(e) => serde_json::json!({
                    "service": spec.id,
                    "port": port,
                    "ownership": null,
                    "error": e.to_string(),
                }),
            };
            rows.push(row);
        }
    }

    if json {
        out.status(&serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    out.status("Port Ownership:");
    out.status(&format!("{:-<60}", ""));
    if rows.is_empty() {
        out.status("  No enabled services declare a port");
        return Ok(());
    }
    for row in rows {
        let service = row["service"].as_str().unwrap_or_default();
        let port = row["port"].as_u64().unwrap_or_default();
        let ownership: Option<Ownership> = serde_json::from_value(row["ownership"].clone()).ok();
        let line = match ownership {
            Some(Ownership::Free) => format!("  o {:<20} :{:<6} free", service, port),
            Some(ownership) => {
                let pid = row["pid"]
                    .as_u64()
                    .map(|p| format!(" PID {}", p))
                    .unwrap_or_default();
                let command = row["command"].as_str().unwrap_or_default();
                let icon = if ownership == Ownership::ThisService { "+" } else { "x" };
                format!(
                    "  {} {:<20} :{:<6} {}{} {}",
                    icon, service, port, ownership, pid, command
                )
            }
            None => format!(
                "  ? {:<20} :{:<6} unknown ({})",
                service,
                port,
                row["error"].as_str().unwrap_or_default()
            ),
        };
        out.status(line.trim_end());
    }
    Ok(())
}
