//! Route aggregation and reverse-proxy configuration.

mod aggregate;
mod caddy;

pub use aggregate::{aggregate, ProxyConfig};
pub use caddy::{render_caddyfile, CaddyReloader, ProxyReloader};
