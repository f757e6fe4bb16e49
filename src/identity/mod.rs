//! Identity bootstrap for the messaging backbone.
//!
//! Generates once, then verifies on every run, the trust chain
//! operator → {system, application} accounts → one user per account.

mod bootstrap;
pub mod creds;
pub mod jwt;
pub mod nkey;

pub use bootstrap::{ensure, load, Artifacts, IdentityPaths};

/// Render the messaging server configuration for a verified trust chain.
///
/// Accounts are served from a memory resolver preloaded with both account JWTs.
pub fn render_server_config(artifacts: &Artifacts, port: Option<u16>) -> String {
    let listen = port
        .map(|p| format!("port: {}\n", p))
        .unwrap_or_default();
    format!(
        "# Generated by fleet; rewritten on every start.\n\
         {listen}\
         operator: \"{operator}\"\n\
         system_account: {system}\n\
         resolver: MEMORY\n\
         resolver_preload: {{\n\
         \x20 {system}: \"{system_jwt}\"\n\
         \x20 {app}: \"{app_jwt}\"\n\
         }}\n",
        listen = listen,
        operator = artifacts.operator_jwt_path.display(),
        system = artifacts.system_account_id,
        system_jwt = artifacts.system_account_jwt,
        app = artifacts.application_account_id,
        app_jwt = artifacts.application_account_jwt,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentitySettings;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn server_config_preloads_both_accounts() {
        let dir = tempfile::TempDir::new().unwrap();
        let artifacts =
            ensure(dir.path(), &IdentitySettings::default(), &CancellationToken::new()).unwrap();
        let conf = render_server_config(&artifacts, Some(4222));

        assert!(conf.contains("port: 4222\n"));
        assert!(conf.contains("resolver: MEMORY"));
        assert!(conf.contains(&format!("system_account: {}", artifacts.system_account_id)));
        assert!(conf.contains(&format!(
            "  {}: \"{}\"",
            artifacts.application_account_id, artifacts.application_account_jwt
        )));
        assert!(!render_server_config(&artifacts, None).contains("port:"));
    }
}
