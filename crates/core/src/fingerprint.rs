//! Content-addressed task fingerprints.
//!
//! A fingerprint is a pure function of a task's canonical command, its
//! declared environment pairs, the contents of files matched by its input
//! globs, and any extra key fields. Identical inputs always produce the
//! identical 16-hex-character key; any single-byte change produces a
//! different one.

use crate::config::TaskSpec;
use crate::{Error, Result};
use globset::GlobBuilder;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Bytes of the SHA-256 digest kept for file content hashes and for the
/// final key (8 bytes = 16 hex characters).
const DIGEST_PREFIX_LEN: usize = 8;

/// Compute the fingerprint for `task`, resolving input globs against
/// `root`.
///
/// The update order is fixed: canonical command, sorted env pairs, per-glob
/// sorted file paths with content digests, extra key fields.
pub fn compute(task: &TaskSpec, root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    hasher.update(task.cmd.canonical().as_bytes());

    let mut env_pairs: Vec<(&String, &String)> = task.env.iter().collect();
    env_pairs.sort();
    for (name, value) in env_pairs {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b";");
    }

    for pattern in &task.cache.input_globs {
        for (rel_path, content_digest) in resolve_glob(root, pattern)? {
            hasher.update(rel_path.as_bytes());
            hasher.update(content_digest);
        }
    }

    for field in &task.cache.extra_key_fields {
        hasher.update(field.as_bytes());
    }

    Ok(hex::encode(&hasher.finalize()[..DIGEST_PREFIX_LEN]))
}

/// Resolve a glob to `(relative path, truncated content digest)` pairs,
/// sorted by path for determinism.
fn resolve_glob(root: &Path, pattern: &str) -> Result<Vec<(String, [u8; DIGEST_PREFIX_LEN])>> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map_err(|e| Error::cache(format!("invalid input glob '{pattern}': {e}")))?
        .compile_matcher();

    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            // Unreadable directories degrade to "not an input".
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        // Glob patterns in configs use forward slashes on every platform.
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if !matcher.is_match(&rel_str) {
            continue;
        }

        let content = fs::read(entry.path())
            .map_err(|e| Error::io_at("read input file", entry.path(), e))?;
        let digest = Sha256::digest(&content);
        let mut truncated = [0u8; DIGEST_PREFIX_LEN];
        truncated.copy_from_slice(&digest[..DIGEST_PREFIX_LEN]);
        entries.push((rel_str, truncated));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, CommandSpec};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn task_with(cmd: CommandSpec, env: &[(&str, &str)], globs: &[&str], extra: &[&str]) -> TaskSpec {
        TaskSpec {
            name: "fp".into(),
            cmd,
            cwd: None,
            env: env
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            clean_env: false,
            deps: vec![],
            condition: None,
            timeout_ms: 0,
            retry: crate::config::RetryConfig::default(),
            cache: CacheConfig {
                enabled: true,
                input_globs: globs.iter().map(|s| (*s).to_string()).collect(),
                output_globs: vec![],
                extra_key_fields: extra.iter().map(|s| (*s).to_string()).collect(),
            },
            ignore_failure: false,
            description: None,
            tags: vec![],
            outputs: vec![],
        }
    }

    #[test]
    fn key_is_16_hex_chars() {
        let tmp = TempDir::new().unwrap();
        let task = task_with(CommandSpec::Shell("true".into()), &[], &[], &[]);
        let key = compute(&task, tmp.path()).unwrap();
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn identical_inputs_identical_keys() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"alpha").unwrap();

        let task = task_with(
            CommandSpec::Shell("make build".into()),
            &[("CC", "gcc")],
            &["*.txt"],
            &["v1"],
        );
        let first = compute(&task, tmp.path()).unwrap();
        let second = compute(&task, tmp.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn env_order_does_not_matter() {
        let tmp = TempDir::new().unwrap();
        let a = task_with(
            CommandSpec::Shell("true".into()),
            &[("A", "1"), ("B", "2")],
            &[],
            &[],
        );
        let mut b = a.clone();
        b.env = HashMap::new();
        b.env.insert("B".into(), "2".into());
        b.env.insert("A".into(), "1".into());

        assert_eq!(
            compute(&a, tmp.path()).unwrap(),
            compute(&b, tmp.path()).unwrap()
        );
    }

    #[test]
    fn command_change_changes_key() {
        let tmp = TempDir::new().unwrap();
        let a = task_with(CommandSpec::Shell("make build".into()), &[], &[], &[]);
        let b = task_with(CommandSpec::Shell("make test".into()), &[], &[], &[]);
        assert_ne!(
            compute(&a, tmp.path()).unwrap(),
            compute(&b, tmp.path()).unwrap()
        );
    }

    #[test]
    fn env_value_change_changes_key() {
        let tmp = TempDir::new().unwrap();
        let a = task_with(CommandSpec::Shell("true".into()), &[("CC", "gcc")], &[], &[]);
        let b = task_with(
            CommandSpec::Shell("true".into()),
            &[("CC", "clang")],
            &[],
            &[],
        );
        assert_ne!(
            compute(&a, tmp.path()).unwrap(),
            compute(&b, tmp.path()).unwrap()
        );
    }

    #[test]
    fn single_byte_file_change_changes_key() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.txt"), b"alpha").unwrap();

        let task = task_with(CommandSpec::Shell("true".into()), &[], &["src/*.txt"], &[]);
        let before = compute(&task, tmp.path()).unwrap();

        std::fs::write(src.join("a.txt"), b"alphb").unwrap();
        let after = compute(&task, tmp.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn new_matching_file_changes_key() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"alpha").unwrap();

        let task = task_with(CommandSpec::Shell("true".into()), &[], &["*.txt"], &[]);
        let before = compute(&task, tmp.path()).unwrap();

        std::fs::write(tmp.path().join("b.txt"), b"beta").unwrap();
        let after = compute(&task, tmp.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn non_matching_file_is_ignored() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"alpha").unwrap();

        let task = task_with(CommandSpec::Shell("true".into()), &[], &["*.txt"], &[]);
        let before = compute(&task, tmp.path()).unwrap();

        std::fs::write(tmp.path().join("ignored.bin"), b"junk").unwrap();
        let after = compute(&task, tmp.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn extra_key_field_changes_key() {
        let tmp = TempDir::new().unwrap();
        let a = task_with(CommandSpec::Shell("true".into()), &[], &[], &["node-18"]);
        let b = task_with(CommandSpec::Shell("true".into()), &[], &[], &["node-20"]);
        assert_ne!(
            compute(&a, tmp.path()).unwrap(),
            compute(&b, tmp.path()).unwrap()
        );
    }

    #[test]
    fn shell_and_argv_forms_hash_differently() {
        let tmp = TempDir::new().unwrap();
        let shell = task_with(CommandSpec::Shell("echo hi".into()), &[], &[], &[]);
        let argv = task_with(
            CommandSpec::Argv(vec!["echo".into(), "hi".into()]),
            &[],
            &[],
            &[],
        );
        assert_ne!(
            compute(&shell, tmp.path()).unwrap(),
            compute(&argv, tmp.path()).unwrap()
        );
    }

    #[test]
    fn invalid_glob_is_a_cache_error() {
        let tmp = TempDir::new().unwrap();
        let task = task_with(CommandSpec::Shell("true".into()), &[], &["[unclosed"], &[]);
        assert!(matches!(
            compute(&task, tmp.path()),
            Err(crate::Error::Cache(_))
        ));
    }
}
