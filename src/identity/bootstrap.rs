use super::creds::{format_creds, parse_creds};
use super::jwt::{self, Claims};
use super::nkey::{KeyKind, KeyPair};
use crate::config::IdentitySettings;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Only one bootstrap may run at a time within this process.
static BOOTSTRAP_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Well-known locations of the trust chain under the identity directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPaths {
    pub dir: PathBuf,
    pub operator_jwt: PathBuf,
    pub system_account_jwt: PathBuf,
    pub application_account_jwt: PathBuf,
    pub system_creds: PathBuf,
    pub application_creds: PathBuf,
    pub keys_dir: PathBuf,
}

impl IdentityPaths {
    pub fn new(dir: &Path, settings: &IdentitySettings) -> Self {
        let accounts = dir.join("accounts");
        let creds = dir.join("creds");
        Self {
            dir: dir.to_path_buf(),
            operator_jwt: dir.join("operator.jwt"),
            system_account_jwt: accounts.join(format!("{}.jwt", settings.system_account)),
            application_account_jwt: accounts
                .join(format!("{}.jwt", settings.application_account)),
            system_creds: creds.join(format!("{}.creds", settings.system_user)),
            application_creds: creds.join(format!("{}.creds", settings.application_user)),
            keys_dir: dir.join("keys"),
        }
    }

    /// The five artifacts whose joint presence means "already bootstrapped".
    pub fn artifacts(&self) -> [&Path; 5] {
        [
            &self.operator_jwt,
            &self.system_account_jwt,
            &self.application_account_jwt,
            &self.system_creds,
            &self.application_creds,
        ]
    }

    pub fn all_exist(&self) -> bool {
        self.artifacts().iter().all(|p| p.is_file())
    }
}

/// A verified trust chain, as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub operator_id: String,
    pub operator_jwt: String,
    pub operator_jwt_path: PathBuf,
    pub system_account_id: String,
    pub system_account_jwt: String,
    pub application_account_id: String,
    pub application_account_jwt: String,
    pub system_user_id: String,
    pub application_user_id: String,
    pub system_user_creds: PathBuf,
    pub application_user_creds: PathBuf,
}

/// Generate the trust chain under `dir` unless all five artifacts exist,
/// then read it back and verify it.
pub fn ensure(
    dir: &Path,
    settings: &IdentitySettings,
    cancel: &CancellationToken,
) -> Result<Artifacts> {
    let _guard = BOOTSTRAP_LOCK.lock();
    let paths = IdentityPaths::new(dir, settings);

    if paths.all_exist() {
        tracing::debug!("Identity artifacts present in {}, loading", dir.display());
    } else {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(
                "identity bootstrap cancelled before generation".to_string(),
            ));
        }
        tracing::info!("Generating identity trust chain in {}", dir.display());
        generate(&paths, settings)?;
    }

    load(&paths)
}

fn generate(paths: &IdentityPaths, settings: &IdentitySettings) -> Result<()> {
    for dir in [
        paths.dir.clone(),
        paths.dir.join("accounts"),
        paths.dir.join("creds"),
        paths.keys_dir.clone(),
    ] {
        fs::create_dir_all(&dir).map_err(|e| {
            Error::Filesystem(format!("Failed to create {}: {}", dir.display(), e))
        })?;
    }

    let operator = KeyPair::generate(KeyKind::Operator);
    let system_account = KeyPair::generate(KeyKind::Account);
    let application_account = KeyPair::generate(KeyKind::Account);

    let operator_jwt = jwt::encode(
        Claims::operator(
            &settings.operator,
            &operator.public_key(),
            &system_account.public_key(),
        ),
        &operator,
    )?;
    write_file(&paths.operator_jwt, &operator_jwt, false)?;
    write_file(
        &paths.keys_dir.join(format!("{}.nk", settings.operator)),
        &operator.seed(),
        true,
    )?;

    let accounts = [
        (
            &settings.system_account,
            &system_account,
            &paths.system_account_jwt,
            &settings.system_user,
            &paths.system_creds,
        ),
        (
            &settings.application_account,
            &application_account,
            &paths.application_account_jwt,
            &settings.application_user,
            &paths.application_creds,
        ),
    ];

    for (name, account, jwt_path, user_name, creds_path) in accounts {
        let account_jwt = jwt::encode(
            Claims::account(name, &account.public_key(), &operator.public_key()),
            &operator,
        )?;
        write_file(jwt_path, &account_jwt, false)?;
        write_file(
            &paths.keys_dir.join(format!("{}.nk", name)),
            &account.seed(),
            true,
        )?;

        let user = KeyPair::generate(KeyKind::User);
        let user_jwt = jwt::encode(
            Claims::user(user_name, &user.public_key(), &account.public_key()),
            account,
        )?;
        write_file(creds_path, &format_creds(&user_jwt, &user.seed()), true)?;
        tracing::debug!("Generated account '{}' with user '{}'", name, user_name);
    }

    Ok(())
}

/// Read the trust chain back and verify every link.
pub fn load(paths: &IdentityPaths) -> Result<Artifacts> {
    let operator_jwt = read_artifact(&paths.operator_jwt)?;
    let operator = jwt::verify(&operator_jwt)?;
    expect_kind(&operator, "operator", &paths.operator_jwt)?;
    if operator.iss != operator.sub {
        return Err(Error::IdentityMalformed(format!(
            "{}: operator JWT is not self-signed",
            paths.operator_jwt.display()
        )));
    }

    let system_account_jwt = read_artifact(&paths.system_account_jwt)?;
    let system_account =
        verify_issued(&system_account_jwt, "account", &operator.sub, &paths.system_account_jwt)?;
    let application_account_jwt = read_artifact(&paths.application_account_jwt)?;
    let application_account = verify_issued(
        &application_account_jwt,
        "account",
        &operator.sub,
        &paths.application_account_jwt,
    )?;

    if let Some(declared) = operator.system_account() {
        if declared != system_account.sub {
            return Err(Error::IdentityMalformed(format!(
                "operator names system account {} but {} holds {}",
                declared,
                paths.system_account_jwt.display(),
                system_account.sub
            )));
        }
    }

    let system_user = load_creds(&paths.system_creds, &system_account.sub)?;
    let application_user = load_creds(&paths.application_creds, &application_account.sub)?;

    Ok(Artifacts {
        operator_id: operator.sub,
        operator_jwt,
        operator_jwt_path: paths.operator_jwt.clone(),
        system_account_id: system_account.sub,
        system_account_jwt,
        application_account_id: application_account.sub,
        application_account_jwt,
        system_user_id: system_user,
        application_user_id: application_user,
        system_user_creds: paths.system_creds.clone(),
        application_user_creds: paths.application_creds.clone(),
    })
}

/// Verify the user JWT in a creds file and that its seed matches. Returns the user id.
fn load_creds(path: &Path, account_id: &str) -> Result<String> {
    let contents = read_artifact(path)?;
    let (user_jwt, seed) = parse_creds(&contents)
        .map_err(|e| Error::IdentityMalformed(format!("{}: {}", path.display(), e)))?;
    let user = verify_issued(&user_jwt, "user", account_id, path)?;
    let key = KeyPair::from_seed(&seed)
        .map_err(|e| Error::IdentityMalformed(format!("{}: {}", path.display(), e)))?;
    if key.public_key() != user.sub {
        return Err(Error::IdentityMalformed(format!(
            "{}: seed does not belong to user {}",
            path.display(),
            user.sub
        )));
    }
    Ok(user.sub)
}

fn verify_issued(token: &str, kind: &str, issuer: &str, path: &Path) -> Result<Claims> {
    let claims = jwt::verify(token)
        .map_err(|e| Error::IdentityMalformed(format!("{}: {}", path.display(), e)))?;
    expect_kind(&claims, kind, path)?;
    if claims.iss != issuer {
        return Err(Error::IdentityMalformed(format!(
            "{}: issued by {}, expected {}",
            path.display(),
            claims.iss,
            issuer
        )));
    }
    Ok(claims)
}

fn expect_kind(claims: &Claims, kind: &str, path: &Path) -> Result<()> {
    if claims.kind() != Some(kind) {
        return Err(Error::IdentityMalformed(format!(
            "{}: expected {} claims, found {:?}",
            path.display(),
            kind,
            claims.kind()
        )));
    }
    Ok(())
}

fn read_artifact(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Err(Error::IdentityMalformed(format!(
            "{} is empty",
            path.display()
        ))),
        Ok(contents) => Ok(contents.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::IdentityMissing(path.display().to_string()))
        }
        Err(e) => Err(Error::Filesystem(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Replace `path` with `contents`. Secrets are created with mode 0600.
fn write_file(path: &Path, contents: &str, secret: bool) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| {
            Error::Filesystem(format!("Failed to remove stale {}: {}", path.display(), e))
        })?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(if secret { 0o600 } else { 0o644 });
    }
    #[cfg(not(unix))]
    let _ = secret;

    let mut file = options
        .open(path)
        .map_err(|e| Error::Filesystem(format!("Failed to create {}: {}", path.display(), e)))?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|e| Error::Filesystem(format!("Failed to write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> IdentitySettings {
        IdentitySettings::default()
    }

    #[test]
    fn generates_then_loads_chain() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("identity");
        let artifacts = ensure(&root, &settings(), &CancellationToken::new()).unwrap();

        assert!(artifacts.operator_id.starts_with('O'));
        assert!(artifacts.system_account_id.starts_with('A'));
        assert!(artifacts.application_account_id.starts_with('A'));
        assert_ne!(artifacts.system_account_id, artifacts.application_account_id);
        assert!(artifacts.application_user_id.starts_with('U'));
        assert!(IdentityPaths::new(&root, &settings()).all_exist());
    }

    #[cfg(unix)]
    #[test]
    fn secrets_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let artifacts = ensure(dir.path(), &settings(), &CancellationToken::new()).unwrap();
        let mode = fs::metadata(&artifacts.application_user_creds)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn partial_chain_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let first = ensure(dir.path(), &settings(), &CancellationToken::new()).unwrap();
        fs::remove_file(&first.system_user_creds).unwrap();

        let second = ensure(dir.path(), &settings(), &CancellationToken::new()).unwrap();
        assert_ne!(first.operator_id, second.operator_id);
    }

    #[test]
    fn tampered_account_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        ensure(dir.path(), &settings(), &CancellationToken::new()).unwrap();
        let paths = IdentityPaths::new(dir.path(), &settings());

        // An account JWT signed by a different operator breaks the chain.
        let rogue = KeyPair::generate(KeyKind::Operator);
        let account = KeyPair::generate(KeyKind::Account);
        let forged = jwt::encode(
            Claims::account("APP", &account.public_key(), &rogue.public_key()),
            &rogue,
        )
        .unwrap();
        fs::write(&paths.application_account_jwt, forged).unwrap();

        let err = load(&paths).unwrap_err();
        assert!(matches!(err, Error::IdentityMalformed(_)));
    }

    #[test]
    fn cancelled_bootstrap_generates_nothing() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ensure(dir.path(), &settings(), &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(!dir.path().join("operator.jwt").exists());
    }
}
