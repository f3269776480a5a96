//! # Skiff
//!
//! Command line front end for the Skiff network drivers.
//!
//! - `skiff bridge setup|teardown` programs or removes the iptables rules of
//!   a bridge network, or prints them with `--dry-run`.
//! - `skiff plugin <operation>` issues one call to a remote network plugin
//!   and prints the decoded reply as JSON.

#![warn(missing_docs)]

pub mod cli;
