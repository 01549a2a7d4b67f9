//! Signaling store housekeeping.

use commu_core::normalize_connection_code;
use commu_link::{FileStore, SignalingStore};
use tracing::info;

use crate::config::CommuConfig;
use crate::error::{CliError, CliResult};

/// Remove every signaling entry for `code`.
pub fn clear(config: &CommuConfig, code: &str) -> CliResult<()> {
    let code = normalize_connection_code(code)
        .ok_or_else(|| CliError::Config(format!("{code:?} is not a connection code")))?;
    let store = FileStore::open(config.signaling_dir())?;
    store.clear(&code)?;
    info!(%code, dir = %store.dir().display(), "Cleared signaling entries");
    println!("cleared signaling entries for {code}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use commu_link::{SIGNAL_TTL, SignalKind};
    use tempfile::TempDir;

    #[test]
    fn clear_removes_entries() {
        let dir = TempDir::new().unwrap();
        let mut config = CommuConfig::default();
        config.signaling.dir = Some(dir.path().to_path_buf());

        let store = FileStore::open(dir.path()).unwrap();
        store.put(&SignalKind::Offer.key("AB12CD"), "{}", SIGNAL_TTL).unwrap();

        clear(&config, "ab12cd").unwrap();
        assert!(store.get(&SignalKind::Offer.key("AB12CD")).unwrap().is_none());
    }

    #[test]
    fn clear_rejects_bad_code() {
        let config = CommuConfig::default();
        assert!(matches!(clear(&config, "../x"), Err(CliError::Config(_))));
    }
}
