use crate::output::UserOutput;
use service_fleet::{identity, Options};
use tokio_util::sync::CancellationToken;

pub async fn run_identity(options: &Options, out: &dyn UserOutput) -> anyhow::Result<()> {
    let dir = options.identity_dir.clone();
    let settings = options.identity.clone();
    let artifacts = tokio::task::spawn_blocking(move || {
        identity::ensure(&dir, &settings, &CancellationToken::new())
    })
    .await??;

    out.status(&format!("Identity in {}", options.identity_dir.display()));
    out.status(&format!("  operator            {}", artifacts.operator_id));
    out.status(&format!(
        "  system account      {}",
        artifacts.system_account_id
    ));
    out.status(&format!(
        "  application account {}",
        artifacts.application_account_id
    ));
    out.status(&format!("  system user         {}", artifacts.system_user_id));
    out.status(&format!(
        "  application user    {}",
        artifacts.application_user_id
    ));
    out.blank();
    out.status(&format!(
        "Credentials: {}",
        artifacts.application_user_creds.display()
    ));
    Ok(())
}
