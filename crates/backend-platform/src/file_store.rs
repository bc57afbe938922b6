use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{SecretStore, SecretStoreError};

type Secrets = BTreeMap<String, BTreeMap<String, String>>;

/// Secrets kept in one JSON file (`service -> account -> secret`).
///
/// Every write rewrites the whole file through a temp file and a rename, so
/// a crash never leaves a truncated store behind.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Secrets, SecretStoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Secrets::new()),
            Err(err) => {
                return Err(SecretStoreError::Unavailable(format!(
                    "failed reading {}: {err}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_slice(&raw).map_err(|err| {
            SecretStoreError::Backend(format!("failed parsing {}: {err}", self.path.display()))
        })
    }

    fn write_all(&self, secrets: &Secrets) -> Result<(), SecretStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                SecretStoreError::Unavailable(format!(
                    "failed creating {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let encoded = serde_json::to_vec_pretty(secrets)
            .map_err(|err| SecretStoreError::Backend(err.to_string()))?;
        let temp_path = temp_path_for(&self.path);
        fs::write(&temp_path, encoded).map_err(|err| {
            SecretStoreError::Unavailable(format!(
                "failed writing {}: {err}",
                temp_path.display()
            ))
        })?;
        restrict_permissions(&temp_path);

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows refuses to rename over an existing file.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(SecretStoreError::Backend(format!(
                        "failed replacing {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                SecretStoreError::Backend(format!(
                    "failed writing {} after temp write: {err}",
                    self.path.display()
                ))
            })?;
        }

        Ok(())
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, ()>, SecretStoreError> {
        self.lock
            .lock()
            .map_err(|_| SecretStoreError::Backend("poisoned lock".to_owned()))
    }
}

impl SecretStore for FileSecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        let _guard = self.locked()?;
        let mut secrets = self.read_all()?;
        secrets
            .entry(service.to_owned())
            .or_default()
            .insert(account.to_owned(), secret.to_owned());
        self.write_all(&secrets)
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        let _guard = self.locked()?;
        self.read_all()?
            .get(service)
            .and_then(|accounts| accounts.get(account))
            .cloned()
            .ok_or(SecretStoreError::NotFound)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        let _guard = self.locked()?;
        let mut secrets = self.read_all()?;
        let accounts = secrets.get_mut(service).ok_or(SecretStoreError::NotFound)?;
        accounts.remove(account).ok_or(SecretStoreError::NotFound)?;
        if accounts.is_empty() {
            secrets.remove(service);
        }
        self.write_all(&secrets)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("secrets.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::debug!(path = %path.display(), error = %err, "could not restrict secret file mode");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
