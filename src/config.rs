//! Configuration options for opening an environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::flags::EnvFlags;

/// Configuration options applied to an environment before it is opened.
///
/// Options are supplied by the owning application; [`EnvOptions::from_json`]
/// accepts a partial JSON document and fills the rest from the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvOptions {
    /// Size of the memory map in bytes; also the maximum size of the store.
    /// Default: 10MB
    pub map_size: usize,

    /// Maximum number of concurrent reader slots.
    /// Default: 126
    pub max_readers: u32,

    /// Maximum number of named keyspaces.
    /// Default: 16
    pub max_dbs: u32,

    /// Flags passed to the engine when opening.
    /// Default: empty
    pub flags: EnvFlags,

    /// Unix permissions for the data and lock files.
    /// Default: 0o644
    pub mode: u32,

    /// Create the directory of a directory-backed store if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            map_size: 10 * 1024 * 1024, // 10MB
            max_readers: 126,
            max_dbs: 16,
            flags: EnvFlags::empty(),
            mode: 0o644,
            create_if_missing: true,
        }
    }
}

impl EnvOptions {
    /// Creates a new EnvOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Sets the memory map size.
    pub fn map_size(mut self, size: usize) -> Self {
        self.map_size = size;
        self
    }

    /// Sets the maximum number of reader slots.
    pub fn max_readers(mut self, readers: u32) -> Self {
        self.max_readers = readers;
        self
    }

    /// Sets the maximum number of named keyspaces.
    pub fn max_dbs(mut self, dbs: u32) -> Self {
        self.max_dbs = dbs;
        self
    }

    /// Sets the open flags.
    pub fn flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the file mode.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Sets whether to create a missing store directory.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.map_size == 0 {
            return Err(crate::Error::invalid_argument("map_size must be > 0"));
        }
        if self.max_readers == 0 {
            return Err(crate::Error::invalid_argument("max_readers must be > 0"));
        }
        if self.mode > 0o7777 {
            return Err(crate::Error::invalid_argument("mode must be a permission mask"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = EnvOptions::default();
        assert_eq!(opts.map_size, 10 * 1024 * 1024);
        assert_eq!(opts.max_readers, 126);
        assert!(opts.create_if_missing);
        assert!(opts.flags.is_empty());
    }

    #[test]
    fn test_options_builder() {
        let opts = EnvOptions::new()
            .map_size(64 * 1024 * 1024)
            .max_dbs(4)
            .flags(EnvFlags::NO_SYNC)
            .create_if_missing(false);

        assert_eq!(opts.map_size, 64 * 1024 * 1024);
        assert_eq!(opts.max_dbs, 4);
        assert_eq!(opts.flags, EnvFlags::NO_SYNC);
        assert!(!opts.create_if_missing);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = EnvOptions::default();
        assert!(opts.validate().is_ok());

        opts.map_size = 0;
        assert!(opts.validate().is_err());

        opts.map_size = 1024;
        opts.max_readers = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_options_from_json() {
        let opts = EnvOptions::from_json(r#"{"max_dbs": 3, "map_size": 1048576}"#).unwrap();
        assert_eq!(opts.max_dbs, 3);
        assert_eq!(opts.map_size, 1048576);
        assert_eq!(opts.max_readers, 126);

        assert!(EnvOptions::from_json(r#"{"map_size": 0}"#).is_err());
        assert!(EnvOptions::from_json("not json").is_err());
    }
}
