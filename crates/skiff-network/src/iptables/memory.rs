//! In-memory iptables used by tests and dry runs.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{NetworkError, NetworkResult};

use super::{Iptables, Table};

/// A canned result for commands matching a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The command fails with this message.
    Error(String),
    /// The command succeeds but prints this text and changes nothing.
    Output(String),
}

#[derive(Debug, Default)]
struct State {
    chains: HashMap<(Table, String), Vec<Vec<String>>>,
    commands: Vec<Vec<String>>,
    exists_queries: usize,
    failures: Vec<(String, Failure)>,
}

/// An [`Iptables`] that keeps rules in memory.
///
/// Understands the subset of iptables the drivers issue: `-t`, `-n`,
/// `-I`, `-A`, `-D`, `-C`, `-N`, `-L`, `-F` and `-X`. Every command is
/// recorded, including ones that fail.
#[derive(Debug)]
pub struct MemoryIptables {
    state: Mutex<State>,
}

impl Default for MemoryIptables {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIptables {
    /// Create an empty table set with the built-in chains.
    #[must_use]
    pub fn new() -> Self {
        let mut state = State::default();
        for chain in ["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"] {
            state.chains.insert((Table::Nat, chain.to_string()), Vec::new());
        }
        for chain in ["INPUT", "FORWARD", "OUTPUT"] {
            state.chains.insert((Table::Filter, chain.to_string()), Vec::new());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Make every later command whose joined text contains `pattern`
    /// return `failure`.
    pub fn fail_matching(&self, pattern: impl Into<String>, failure: Failure) {
        self.state.lock().failures.push((pattern.into(), failure));
    }

    /// Drop all configured failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Commands run so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().commands.clone()
    }

    /// Number of commands run so far.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.state.lock().commands.len()
    }

    /// Number of existence queries so far.
    #[must_use]
    pub fn exists_queries(&self) -> usize {
        self.state.lock().exists_queries
    }

    /// Rules of a chain in evaluation order (empty if the chain is missing).
    #[must_use]
    pub fn rules(&self, table: Table, chain: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .chains
            .get(&(table, chain.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a chain exists.
    #[must_use]
    pub fn has_chain(&self, table: Table, chain: &str) -> bool {
        self.state.lock().chains.contains_key(&(table, chain.to_string()))
    }

    /// Snapshot of every chain, for comparing whole kernel states.
    #[must_use]
    pub fn snapshot(&self) -> Vec<((Table, String), Vec<Vec<String>>)> {
        let mut chains: Vec<_> = self
            .state
            .lock()
            .chains
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        chains.sort();
        chains
    }
}

fn error(args: &[String], message: &str) -> NetworkError {
    NetworkError::Iptables {
        args: args.to_vec(),
        message: message.to_string(),
    }
}

impl State {
    fn apply(&mut self, args: &[String]) -> NetworkResult<String> {
        let mut table = Table::Filter;
        let mut rest = args;

        loop {
            match rest.first().map(String::as_str) {
                Some("-t") => {
                    let name = rest.get(1).ok_or_else(|| error(args, "missing table"))?;
                    table = Table::from_name(name)
                        .ok_or_else(|| error(args, "can't initialize iptables table"))?;
                    rest = &rest[2..];
                }
                Some("-n" | "--wait") => rest = &rest[1..],
                _ => break,
            }
        }

        let (op, chain, rule) = match rest {
            [op, chain, rule @ ..] => (op.as_str(), chain.clone(), rule.to_vec()),
            _ => return Err(error(args, "no command specified")),
        };
        let key = (table, chain);

        match op {
            "-N" => {
                if self.chains.contains_key(&key) {
                    return Err(error(args, "Chain already exists."));
                }
                self.chains.insert(key, Vec::new());
            }
            "-L" => {
                if !self.chains.contains_key(&key) {
                    return Err(error(args, "No chain/target/match by that name."));
                }
            }
            "-X" => {
                if self.chains.remove(&key).is_none() {
                    return Err(error(args, "No chain/target/match by that name."));
                }
            }
            _ => {
                let rules = self
                    .chains
                    .get_mut(&key)
                    .ok_or_else(|| error(args, "No chain/target/match by that name."))?;
                match op {
                    "-I" => rules.insert(0, rule),
                    "-A" => rules.push(rule),
                    "-F" => rules.clear(),
                    "-D" | "-C" => {
                        let pos = rules.iter().position(|r| *r == rule).ok_or_else(|| {
                            error(args, "Bad rule (does a matching rule exist in that chain?).")
                        })?;
                        if op == "-D" {
                            rules.remove(pos);
                        }
                    }
                    _ => return Err(error(args, "unknown option")),
                }
            }
        }

        Ok(String::new())
    }
}

impl Iptables for MemoryIptables {
    fn exists(&self, table: Table, chain: &str, args: &[String]) -> bool {
        let mut state = self.state.lock();
        state.exists_queries += 1;
        state
            .chains
            .get(&(table, chain.to_string()))
            .is_some_and(|rules| rules.iter().any(|r| r.as_slice() == args))
    }

    fn raw(&self, args: &[String]) -> NetworkResult<String> {
        let mut state = self.state.lock();
        state.commands.push(args.to_vec());

        let joined = args.join(" ");
        let failure = state
            .failures
            .iter()
            .find(|(pattern, _)| joined.contains(pattern.as_str()))
            .map(|(_, f)| f.clone());

        match failure {
            Some(Failure::Error(message)) => Err(error(args, &message)),
            Some(Failure::Output(output)) => Ok(output),
            None => state.apply(args),
        }
    }
}
