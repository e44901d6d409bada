//! Configuration loading for `treasuryd`.

use anyhow::Context;
use std::path::{Path, PathBuf};
use treasury_core::{StorageConfig, TreasuryConfig};

/// Load the treasury config from `path` (defaults when absent), then apply overrides.
///
/// An explicitly named file must exist. `data_dir` switches storage to the file
/// backend rooted there, whatever the file says.
pub fn load(path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<TreasuryConfig> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<TreasuryConfig>(&contents)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => TreasuryConfig::default(),
    };

    if let Some(dir) = data_dir {
        config.storage = StorageConfig::file(dir);
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use treasury_core::{Amount, BasisPoints};

    #[test]
    fn defaults_without_file() {
        let config = load(None, None).unwrap();
        assert_eq!(config, TreasuryConfig::default());
    }

    #[test]
    fn missing_named_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/treasury.toml")), None).is_err());
    }

    #[test]
    fn toml_file_with_data_dir_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
reserve_fraction_bps = 2500
large_transaction_threshold = 50000
max_daily_distributions = 4

[allocation.priority_multipliers]
low = 1000

[storage]
backend = "file"
dir = "/srv/treasury"
"#
        )
        .unwrap();

        let config = load(Some(file.path()), Some(PathBuf::from("/tmp/override"))).unwrap();
        assert_eq!(config.reserve_fraction_bps, BasisPoints::percent(25));
        assert_eq!(config.payout_cap_bps, BasisPoints::percent(7));
        assert_eq!(config.large_transaction_threshold, Amount::from_units(500));
        assert_eq!(config.max_daily_distributions, 4);
        assert_eq!(config.allocation.priority_multipliers.low.get(), 1_000);
        assert_eq!(config.storage, StorageConfig::file("/tmp/override"));
    }

    #[test]
    fn invalid_fractions_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "payout_cap_bps = 10001").unwrap();
        assert!(load(Some(file.path()), None).is_err());
    }
}
