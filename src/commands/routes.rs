use crate::output::UserOutput;
use service_fleet::{config::Config, proxy, Options, Registry};

/// Print the proxy configuration the enabled services would produce.
pub fn run_routes(config: &Config, options: &Options, out: &dyn UserOutput) -> anyhow::Result<()> {
    let registry = Registry::from_config(config, options)?;
    let specs = registry.enabled(options);

    match proxy::aggregate(&specs, options.proxy_root_service.as_deref()) {
        Some(config) => out.status(proxy::render_caddyfile(&config).trim_end()),
        None => out.warning("No enabled proxy service with a port; nothing to render"),
    }
    Ok(())
}
