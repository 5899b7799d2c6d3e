//! Wallet enumeration
//!
//! Lists known wallets without opening any of them: every `<name>.keys`
//! file in the wallet storage directory is one wallet.

use std::path::Path;

use serde::Serialize;

use upgui_core::prelude::*;

/// One entry of the wallet selection list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletEntry {
    pub name: String,
}

/// Scan `wallet_dir` for wallet key files, sorted by name.
pub fn list_wallets(wallet_dir: &Path) -> Result<Vec<WalletEntry>> {
    let mut wallets = Vec::new();

    for entry in std::fs::read_dir(wallet_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().map(|e| e == "keys").unwrap_or(false) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                wallets.push(WalletEntry {
                    name: stem.to_string(),
                });
            }
        }
    }

    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_wallets_finds_keys_files() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("main.keys"), b"").unwrap();
        std::fs::write(temp.path().join("savings.keys"), b"").unwrap();
        // Companion files and strangers are not wallets.
        std::fs::write(temp.path().join("main"), b"").unwrap();
        std::fs::write(temp.path().join("main.address.txt"), b"").unwrap();

        let wallets = list_wallets(temp.path()).unwrap();
        let names: Vec<&str> = wallets.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["main", "savings"]);
    }

    #[test]
    fn test_list_wallets_empty_dir() {
        let temp = tempdir().unwrap();
        assert!(list_wallets(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_list_wallets_missing_dir_is_error() {
        assert!(list_wallets(Path::new("/nonexistent/wallets")).is_err());
    }
}
