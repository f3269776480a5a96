//! iptables command primitives.
//!
//! Everything that touches the host packet filter goes through the
//! [`Iptables`] trait: an existence query and a raw command runner.
//! [`SystemIptables`] spawns the real binary; [`MemoryIptables`] keeps an
//! in-memory rule table for tests and dry runs.
//!
//! Kernel state is never cached. Callers re-query before every mutation,
//! and since the check and the mutation are two separate commands, callers
//! must serialize orchestration per bridge.

use std::fmt;
use std::process::Command;

use crate::error::{NetworkError, NetworkResult};

mod chain;
mod memory;
mod rule;

pub use chain::{Chain, DOCKER_CHAIN, new_chain};
pub use memory::{Failure, MemoryIptables};
pub use rule::{Rule, program_chain_rule};

/// An iptables table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// The `nat` table.
    Nat,
    /// The `filter` table.
    Filter,
}

impl Table {
    /// Name passed to `iptables -t`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Nat => "nat",
            Self::Filter => "filter",
        }
    }

    /// Parse a table name as given to `iptables -t`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "nat" => Some(Self::Nat),
            "filter" => Some(Self::Filter),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nat => write!(f, "NAT"),
            Self::Filter => write!(f, "FILTER"),
        }
    }
}

/// A rule mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Append to the tail of a chain.
    Append,
    /// Insert at the head of a chain.
    Insert,
    /// Delete a matching rule.
    Delete,
}

impl Action {
    /// The iptables flag for this action.
    #[must_use]
    pub const fn flag(&self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Insert => "-I",
            Self::Delete => "-D",
        }
    }
}

/// Access to the host packet filter.
pub trait Iptables: Send + Sync {
    /// Whether a rule with exactly these match/action arguments exists in
    /// `table`/`chain`.
    fn exists(&self, table: Table, chain: &str, args: &[String]) -> bool;

    /// Run iptables with `args` and return its output.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Iptables`] if the command cannot be run or
    /// exits with a failure status.
    fn raw(&self, args: &[String]) -> NetworkResult<String>;
}

/// Convert string literals into an owned argument list.
#[must_use]
pub fn to_args(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| (*t).to_string()).collect()
}

/// Run a command and treat any output as a failure on `chain`.
///
/// iptables reports some problems (for example missing kernel modules) on
/// a zero exit status, so a successful command must also be silent.
pub(crate) fn raw_checked(ipt: &dyn Iptables, chain: &str, args: &[String]) -> NetworkResult<()> {
    let output = ipt.raw(args)?;
    if output.trim().is_empty() {
        Ok(())
    } else {
        Err(NetworkError::Chain {
            chain: chain.to_string(),
            output,
        })
    }
}

/// [`Iptables`] backed by the `iptables` binary.
#[derive(Debug, Clone)]
pub struct SystemIptables {
    binary: String,
    wait: bool,
}

impl SystemIptables {
    /// Use `iptables` from `PATH`, probing once for `--wait` support.
    #[must_use]
    pub fn detect() -> Self {
        Self::with_binary("iptables")
    }

    /// Use a specific iptables binary, probing once for `--wait` support.
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        let binary = binary.into();
        let wait = Command::new(&binary)
            .args(["--wait", "-L", "-n"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);

        tracing::debug!(binary = %binary, wait, "Detected iptables");
        Self { binary, wait }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        // Serialize with other xtables users instead of failing on the lock.
        if self.wait {
            cmd.arg("--wait");
        }
        cmd.args(args);
        cmd
    }
}

impl Iptables for SystemIptables {
    fn exists(&self, table: Table, chain: &str, args: &[String]) -> bool {
        let mut check = to_args(&["-t", table.as_str(), "-C", chain]);
        check.extend_from_slice(args);

        self.command(&check)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn raw(&self, args: &[String]) -> NetworkResult<String> {
        tracing::trace!(args = ?args, "Running iptables");

        let output = self
            .command(args)
            .output()
            .map_err(|e| NetworkError::Iptables {
                args: args.to_vec(),
                message: e.to_string(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(NetworkError::Iptables {
                args: args.to_vec(),
                message: combined.trim().to_string(),
            });
        }

        Ok(combined)
    }
}
