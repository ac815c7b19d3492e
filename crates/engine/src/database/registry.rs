//! Process-wide registry of open databases
//!
//! Opening the same directory twice returns the same `Database`, so two
//! handles never race on the lock file or write competing checkpoints.
//! Entries are weak and vanish once every handle is dropped.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Weak;

use super::Database;

/// Canonical data directory -> open database
pub(crate) static OPEN_DATABASES: Lazy<Mutex<HashMap<PathBuf, Weak<Database>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
