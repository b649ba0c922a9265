//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for Stackwire data when no home directory is usable.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/stackwire";

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "STACKWIRE_STATE_DIR";

/// File name of the deployment state document.
pub const STATE_FILE: &str = "state.json";

/// File name of the parameter registry document.
pub const REGISTRY_FILE: &str = "registry.json";

/// Suffix appended to a document path for its previous revision.
pub const BACKUP_SUFFIX: &str = "backup";

/// Version written into persisted documents.
pub const STATE_VERSION: u32 = 1;

/// Default bound on a single provider operation, in seconds.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 300;

/// Returns the data directory, preferring `$STACKWIRE_STATE_DIR`, then
/// `$HOME/.stackwire`, falling back to `/var/lib/stackwire`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".stackwire");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}
