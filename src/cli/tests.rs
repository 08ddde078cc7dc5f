use super::*;
use clap::CommandFactory;
use serial_test::serial;

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_parse_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["reforge", "check", "--json", "--verbose"]).unwrap();
    assert!(cli.json);
    assert!(cli.verbose);
    assert!(matches!(cli.command, Commands::Check(_)));
}

#[test]
fn test_verbose_conflicts_with_quiet() {
    assert!(Cli::try_parse_from(["reforge", "-v", "-q", "check"]).is_err());
}

#[test]
fn test_cherry_pick_requires_numbers() {
    assert!(Cli::try_parse_from(["reforge", "cherry-pick"]).is_err());

    let cli = Cli::try_parse_from(["reforge", "cherry-pick", "12", "-3"]).unwrap();
    match cli.command {
        Commands::CherryPick(cmd) => assert_eq!(cmd.numbers, vec![12, -3]),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_build_defaults() {
    let cli = Cli::try_parse_from(["reforge", "build"]).unwrap();
    match cli.command {
        Commands::Build(cmd) => {
            assert_eq!(cmd.tag, "build");
            assert!(!cmd.restart);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_quiet_turns_logging_off() {
    let cli = Cli::try_parse_from(["reforge", "--quiet", "backups"]).unwrap();
    assert_eq!(cli.log_filter().to_string(), "off");

    let cli = Cli::try_parse_from(["reforge", "--verbose", "backups"]).unwrap();
    assert_eq!(cli.log_filter().to_string(), "debug");
}

#[test]
#[serial]
fn test_service_uses_given_running_executable_and_pid() {
    let temp = tempfile::TempDir::new().unwrap();
    let exe = temp.path().join("service");
    std::fs::write(&exe, "running build").unwrap();

    let cli = Cli::try_parse_from([
        "reforge",
        "backups",
        "--install-dir",
        &temp.path().display().to_string(),
        "--running-exe",
        &exe.display().to_string(),
        "--pid",
        "4242",
    ])
    .unwrap();
    let service = cli.build_service().unwrap();

    assert_eq!(service.install_dir(), temp.path());
    assert_eq!(service.running_executable(), Some(exe.as_path()));
    assert_eq!(service.service_pid(), 4242);
}

#[test]
#[serial]
fn test_cli_is_not_the_running_service() {
    let temp = tempfile::TempDir::new().unwrap();
    let cli = Cli::try_parse_from([
        "reforge",
        "backups",
        "--install-dir",
        &temp.path().display().to_string(),
    ])
    .unwrap();
    let service = cli.build_service().unwrap();

    assert!(service.running_executable().is_none());
    assert!(service.current_executable().unwrap().is_none());
}
