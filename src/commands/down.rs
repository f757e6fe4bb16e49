use crate::output::UserOutput;
use service_fleet::{config::Config, Options, Orchestrator};

pub async fn run_down(config: &Config, options: &Options, out: &dyn UserOutput) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config, options)?;

    out.status("Stopping all services...");
    let report = orchestrator.sweep(options).await;
    let mut total = 0;
    for (id, pids) in report {
        if pids.is_empty() {
            continue;
        }
        total += pids.len();
        let pids: Vec<String> = pids.iter().map(|p| p.to_string()).collect();
        out.status(&format!("  Stopped {} (PID {})", id, pids.join(", ")));
    }

    if total == 0 {
        out.status("Nothing was running");
    } else {
        out.success(&format!("Stopped {} process(es)", total));
    }
    Ok(())
}
