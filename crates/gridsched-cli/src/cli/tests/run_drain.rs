//! Tests for run and drain subcommands.

use super::parse;
use crate::cli::{Cli, CliCommand, Switch};
use clap::Parser;

#[test]
fn cli_parse_run() {
    match parse(&["gridsched", "run"]) {
        CliCommand::Run => {}
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_with_config() {
    let cli = Cli::try_parse_from(["gridsched", "run", "--config", "/etc/gridsched.toml"]).unwrap();
    assert_eq!(
        cli.config.as_deref(),
        Some(std::path::Path::new("/etc/gridsched.toml"))
    );
    assert!(matches!(cli.command, CliCommand::Run));
}

#[test]
fn cli_parse_drain_on() {
    match parse(&["gridsched", "drain", "on"]) {
        CliCommand::Drain { state, node } => {
            assert_eq!(state, Switch::On);
            assert!(state.is_on());
            assert!(node.is_none());
        }
        _ => panic!("expected Drain"),
    }
}

#[test]
fn cli_parse_drain_off_for_node() {
    match parse(&["gridsched", "drain", "off", "--node", "fts-02"]) {
        CliCommand::Drain { state, node } => {
            assert_eq!(state, Switch::Off);
            assert_eq!(node.as_deref(), Some("fts-02"));
        }
        _ => panic!("expected Drain with --node"),
    }
}

#[test]
fn cli_parse_drain_rejects_other_values() {
    assert!(Cli::try_parse_from(["gridsched", "drain", "maybe"]).is_err());
    assert!(Cli::try_parse_from(["gridsched", "drain"]).is_err());
}
