//! Per-device account lists read from `<dir>/<serial>.txt`

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

/// Ordered account names per serial, read once per run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSet {
    order: Vec<String>,
    accounts: HashMap<String, Vec<String>>,
}

impl AccountSet {
    /// Read account files for `serials`. Devices without a usable file are
    /// left out; they still post but never switch.
    pub fn load(dir: &Path, serials: &[String]) -> Self {
        let mut set = Self::default();
        for serial in serials {
            let path = dir.join(format!("{serial}.txt"));
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let names: Vec<String> = content
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect();
                    if names.is_empty() {
                        info!("{} lists no accounts, skipping {}", path.display(), serial);
                        continue;
                    }
                    debug!("{} account(s) for {}", names.len(), serial);
                    set.insert(serial, names);
                }
                Err(e) => info!("No account list for {} ({}), skipping", serial, e),
            }
        }
        set
    }

    pub fn insert(&mut self, serial: &str, names: Vec<String>) {
        if !self.accounts.contains_key(serial) {
            self.order.push(serial.to_string());
        }
        self.accounts.insert(serial.to_string(), names);
    }

    pub fn accounts_for(&self, serial: &str) -> Option<&[String]> {
        self.accounts.get(serial).map(Vec::as_slice)
    }

    pub fn account_at(&self, serial: &str, index: usize) -> Option<&str> {
        self.accounts
            .get(serial)
            .and_then(|names| names.get(index))
            .map(String::as_str)
    }

    /// Length of the longest list; the number of switching rounds
    pub fn max_len(&self) -> usize {
        self.accounts.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Serials that still have an account at `index`, in load order
    pub fn serials_at(&self, index: usize) -> Vec<String> {
        self.order
            .iter()
            .filter(|s| self.account_at(s, index).is_some())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }
}
