//! Rule descriptors and idempotent rule programming.

use crate::error::{NetworkError, NetworkResult};

use super::{Action, Iptables, Table, to_args};

/// A single packet-filter rule.
///
/// Existence is decided by `(table, chain, args)`. `pre_args` only selects
/// the table for mutating commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Table the rule lives in.
    pub table: Table,
    /// Chain the rule lives in.
    pub chain: String,
    /// Table selector prepended to mutating commands (may be empty).
    pub pre_args: Vec<String>,
    /// Match and target arguments.
    pub args: Vec<String>,
}

impl Rule {
    /// A rule in the `nat` table.
    #[must_use]
    pub fn nat(chain: &str, args: &[&str]) -> Self {
        Self {
            table: Table::Nat,
            chain: chain.to_string(),
            pre_args: to_args(&["-t", "nat"]),
            args: to_args(args),
        }
    }

    /// A rule in the default `filter` table.
    #[must_use]
    pub fn filter(chain: &str, args: &[&str]) -> Self {
        Self {
            table: Table::Filter,
            chain: chain.to_string(),
            pre_args: Vec::new(),
            args: to_args(args),
        }
    }

    /// Full iptables argument list for `action` on this rule.
    #[must_use]
    pub fn command(&self, action: Action) -> Vec<String> {
        let mut cmd = self.pre_args.clone();
        cmd.push(action.flag().to_string());
        cmd.push(self.chain.clone());
        cmd.extend(self.args.iter().cloned());
        cmd
    }

    /// Whether the rule is currently installed.
    pub fn exists(&self, ipt: &dyn Iptables) -> bool {
        ipt.exists(self.table, &self.chain, &self.args)
    }
}

/// Bring `rule` to the requested state.
///
/// With `insert` the rule is placed at the head of its chain unless it is
/// already present; otherwise it is deleted if present. Nothing is run when
/// the kernel already matches, so repeated calls converge.
///
/// # Errors
///
/// Returns [`NetworkError::RuleProgramming`] naming the operation and
/// `label` when the command fails, and [`NetworkError::Chain`] when it
/// succeeds but prints output.
pub fn program_chain_rule(
    ipt: &dyn Iptables,
    rule: &Rule,
    label: &str,
    insert: bool,
) -> NetworkResult<()> {
    let exists = rule.exists(ipt);

    let (needed, action, operation) = if insert {
        (!exists, Action::Insert, "enable")
    } else {
        (exists, Action::Delete, "disable")
    };

    if !needed {
        tracing::trace!(chain = %rule.chain, label, insert, "Rule already in desired state");
        return Ok(());
    }

    tracing::debug!(chain = %rule.chain, label, operation, "Programming rule");

    let output = ipt
        .raw(&rule.command(action))
        .map_err(|e| NetworkError::RuleProgramming {
            operation,
            label: label.to_string(),
            source: Box::new(e),
        })?;

    if output.trim().is_empty() {
        Ok(())
    } else {
        Err(NetworkError::Chain {
            chain: rule.chain.clone(),
            output,
        })
    }
}
