use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn parse_status_with_defaults() {
	let cli = Cli::try_parse_from(["bless", "status"]).unwrap();

	assert_eq!(cli.command, Commands::Status);
	assert_eq!(cli.format, OutputFormat::Text);
	assert_eq!(cli.timeout_ms, DEFAULT_TIMEOUT_MS);
	assert_eq!(cli.label, None);
	assert_eq!(cli.domain, None);
	assert_eq!(cli.verbose, 0);
}

#[test]
fn parse_install_flags() {
	let cli = Cli::try_parse_from(["bless", "install", "--yes", "--helper-path", "/opt/helper"]).unwrap();

	match cli.command {
		Commands::Install { yes, helper_path } => {
			assert!(yes);
			assert_eq!(helper_path, Some(PathBuf::from("/opt/helper")));
		}
		other => panic!("expected install, got {other:?}"),
	}
}

#[test]
fn global_flags_after_subcommand() {
	let cli = Cli::try_parse_from([
		"bless",
		"unregister",
		"-y",
		"--domain",
		"user",
		"--label",
		"com.example.helper",
		"-f",
		"json",
		"-vv",
	])
	.unwrap();

	assert_eq!(cli.command, Commands::Unregister { yes: true });
	assert_eq!(cli.domain, Some(SupervisorDomain::User));
	assert_eq!(cli.label.as_deref(), Some("com.example.helper"));
	assert_eq!(cli.format, OutputFormat::Json);
	assert_eq!(cli.verbose, 2);
}

#[test]
fn unknown_domain_is_rejected() {
	assert!(Cli::try_parse_from(["bless", "status", "--domain", "global"]).is_err());
}

#[test]
fn command_names() {
	let cli = Cli::try_parse_from(["bless", "watch"]).unwrap();
	assert_eq!(cli.command.name(), "watch");
	let cli = Cli::try_parse_from(["bless", "helper", "--channel-dir", "/tmp/sockets"]).unwrap();
	assert_eq!(cli.command.name(), "helper");
	assert_eq!(cli.channel_dir, Some(PathBuf::from("/tmp/sockets")));
}
