//! Command implementations.

pub mod cache;
pub mod history;
pub mod list;
pub mod run;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use zr_core::{Config, Error, Result};

use crate::cli::ColorChoice;

/// Default configuration file name, discovered in the current directory.
pub const DEFAULT_CONFIG: &str = "zr.toml";

/// Load the configuration and the project root it anchors.
///
/// The root is the directory containing the config file; relative working
/// directories and input globs resolve against it.
pub fn load_config(explicit: Option<&Path>) -> Result<(Config, PathBuf)> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(DEFAULT_CONFIG),
    };

    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::configuration(format!("cannot read config '{}': {e}", path.display()))
    })?;
    let config = Config::from_toml_str(&content)?;

    let root = path
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    Ok((config, root))
}

/// Resolve the effective colour setting against the terminal.
#[must_use]
pub fn use_color(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stderr().is_terminal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_reads_explicit_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(&path, "[tasks.a]\ncmd = \"true\"\n").unwrap();

        let (config, root) = load_config(Some(&path)).unwrap();
        assert!(config.get("a").is_some());
        assert_eq!(root, tmp.path().canonicalize().unwrap());
    }

    #[test]
    fn missing_config_is_a_configuration_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_config(Some(&tmp.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn color_choice_resolution() {
        assert!(use_color(ColorChoice::Always));
        assert!(!use_color(ColorChoice::Never));
    }
}
