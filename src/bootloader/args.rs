// CLASSIFICATION: COMMUNITY
// Filename: args.rs v0.3
// Date Modified: 2026-10-18
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────
// Cohesix · Kernel Command-Line Parser
//
// Parses the kernel command line handed to the measured-boot
// init (normally `/proc/cmdline`).  Tokens are separated by
// ASCII whitespace; a value may be wrapped in double quotes to
// carry spaces, the way the kernel itself splits parameters.
//
// Example cmdline:
//
//   console=ttyS0 netroot=iscsi:@10.0.0.5::3260::iqn.x:boot
//   rd.iscsi.initiator=iqn.1988-12.com.oracle:host quiet
//
// # Public API
// * [`BootArgs`] – read‑only view of parsed arguments
// * [`parse_cmdline`] – convert raw string → [`BootArgs`]
// * [`BootArgs::load`] – read and parse a cmdline file
// ─────────────────────────────────────────────────────────────

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

/// Kernel command line of a running Linux system.
pub const PROC_CMDLINE: &str = "/proc/cmdline";

#[derive(Debug, Error)]
pub enum CmdlineError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Key/value map of boot parameters.
///
/// Later occurrences of a key override earlier ones.
#[derive(Debug, Clone, Default)]
pub struct BootArgs {
    map: HashMap<String, String>,
}

impl BootArgs {
    /// Retrieve the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    /// Return `true` if `key` exists (`key[=value]`).
    pub fn has_flag(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Read and parse a command-line file such as `/proc/cmdline`.
    pub fn load(path: &Path) -> Result<Self, CmdlineError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CmdlineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(parse_cmdline(&raw))
    }
}

/// Split on unquoted whitespace. An unterminated quote runs to the end of
/// the line, as it does for the kernel.
fn split_tokens(cmdline: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in cmdline.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_ascii_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if quoted {
        warn!("cmdline: unterminated quote in {current:?}");
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Parse a raw kernel command line.
///
/// A token without `=` is a valueless flag stored with value `"1"`. Tokens
/// with an empty key are skipped.
///
/// # Examples
///
/// ```
/// use mboot::bootloader::args::parse_cmdline;
///
/// let args = parse_cmdline("root=/dev/sda1 quiet");
/// assert_eq!(args.get("root"), Some("/dev/sda1"));
/// assert!(args.has_flag("quiet"));
/// ```
pub fn parse_cmdline(cmdline: &str) -> BootArgs {
    let mut map = HashMap::new();

    for token in split_tokens(cmdline) {
        let (k, v) = match token.split_once('=') {
            Some((k, v)) => (k, v),
            None => (token.as_str(), "1"),
        };
        if k.is_empty() {
            warn!("cmdline: skipping token {token:?} without a key");
            continue;
        }
        map.insert(k.to_owned(), v.to_owned());
    }

    BootArgs { map }
}

// ───────────────────────────── tests ─────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_values() {
        let args = parse_cmdline("root=/dev/sda rw");
        assert_eq!(args.get("root"), Some("/dev/sda"));
        assert_eq!(args.get("rw"), Some("1"));
    }

    #[test]
    fn empty_key_token_is_skipped() {
        let args = parse_cmdline("=novalue netroot=iscsi:@10.0.0.1::3260::iqn.x quiet");
        assert!(!args.has_flag(""));
        assert_eq!(args.get("netroot"), Some("iscsi:@10.0.0.1::3260::iqn.x"));
        assert!(args.has_flag("quiet"));
    }

    #[test]
    fn keeps_separators_inside_values() {
        let args = parse_cmdline(
            "netroot=iscsi:@10.196.210.62::3260::iqn.1986-03.com.sun:ovs112-boot \
             rd.iscsi.initiator=iqn.1988-12.com.oracle:ovs112\n",
        );
        assert_eq!(
            args.get("netroot"),
            Some("iscsi:@10.196.210.62::3260::iqn.1986-03.com.sun:ovs112-boot")
        );
        assert_eq!(
            args.get("rd.iscsi.initiator"),
            Some("iqn.1988-12.com.oracle:ovs112")
        );
    }

    #[test]
    fn quoted_values_keep_spaces() {
        let args = parse_cmdline(r#"mboot.append="console=ttyS0 quiet" ro"#);
        assert_eq!(args.get("mboot.append"), Some("console=ttyS0 quiet"));
        assert!(args.has_flag("ro"));
    }

    #[test]
    fn stray_quote_keeps_earlier_arguments() {
        let args = parse_cmdline(
            "rd.iscsi.initiator=iqn.1988-12.com.oracle:h netroot=iscsi:@10.0.0.1::3260::iqn.x a=\"open rest",
        );
        assert_eq!(args.get("rd.iscsi.initiator"), Some("iqn.1988-12.com.oracle:h"));
        assert_eq!(args.get("netroot"), Some("iscsi:@10.0.0.1::3260::iqn.x"));
        assert_eq!(args.get("a"), Some("open rest"));
    }

    #[test]
    fn value_may_contain_equals() {
        let args = parse_cmdline("mboot.append=root=/dev/vda");
        assert_eq!(args.get("mboot.append"), Some("root=/dev/vda"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = BootArgs::load(Path::new("/nonexistent/cmdline")).unwrap_err();
        assert!(matches!(err, CmdlineError::Read { .. }));
    }
}
