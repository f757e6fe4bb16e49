use crate::output::UserOutput;
use service_fleet::Parser as ConfigParser;
use std::path::PathBuf;

pub fn run_validate(config_path: Option<PathBuf>, out: &dyn UserOutput) -> anyhow::Result<()> {
    let parser = ConfigParser::new();
    let config_path = if let Some(path) = config_path {
        path
    } else {
        match parser.find_config_file() {
            Ok(path) => path,
            Err(_) => {
                out.error("Error: No configuration file found");
                out.status("\nSearched for fleet.yaml in:");
                out.status(&format!(
                    "  - Current directory: {}",
                    std::env::current_dir()?.display()
                ));
                out.status("  - Parent directories up to root");
                return Err(anyhow::anyhow!("Configuration file not found"));
            }
        }
    };

    out.status(&format!("Validating {}...", config_path.display()));

    let config = match parser.load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            out.error("Configuration failed to load");
            return Err(e.into());
        }
    };

    config.validate()?;

    out.success("Configuration is valid");
    out.blank();
    out.status(&format!(
        "Environment: {} (marker '{}')",
        config.environment, config.marker
    ));
    out.status(&format!("Services: {}", config.services.len()));
    for service in &config.services {
        let port = match service.port.resolve() {
            Ok(Some(port)) => format!(" :{}", port),
            _ => String::new(),
        };
        let flags = match (service.required, service.enabled) {
            (_, false) => " [disabled]",
            (true, true) => " [required]",
            (false, true) => "",
        };
        out.status(&format!(
            "  - {} ({}){}{}",
            service.id, service.kind, port, flags
        ));
    }

    if let Some(ref root) = config.proxy.root_service {
        out.status(&format!("\nProxy root: {}", root));
    }

    Ok(())
}
