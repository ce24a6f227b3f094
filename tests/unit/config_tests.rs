use std::time::Duration;

use analysis_supervisor::config::{SupervisorConfig, TimeoutConfig, ToolConfig};
use analysis_supervisor::models::version::ToolVersion;
use analysis_supervisor::AppError;

fn sample_toml() -> &'static str {
    r#"
enable = true
server_path = "  /opt/typeprof/bin/typeprof  "
login_shell = false
ipc_name = "supervisor-test"

[tool]
name = "typeprof"
display_name = "Ruby TypeProf"
minimum_version = "0.21.0"

[timeouts]
probe_seconds = 5
handshake_seconds = 0
connect_seconds = 2
terminate_grace_seconds = 1

[[workspace]]
name = "app"
uri = "file:///home/dev/app"

[[workspace]]
name = "lib"
uri = "file:///home/dev/lib"
"#
}

#[test]
fn default_config_is_valid_and_enabled() {
    let config = SupervisorConfig::from_toml_str("").expect("empty config parses");
    assert_eq!(config, SupervisorConfig::default());
    assert!(config.enable);
    assert!(config.login_shell);
    assert_eq!(config.ipc_name, "analysis-supervisor");
    assert!(config.workspaces.is_empty());
}

#[test]
fn default_tool_profile_targets_typeprof() {
    let tool = ToolConfig::default();
    assert_eq!(tool.name, "typeprof");
    assert_eq!(tool.display_name, "Ruby TypeProf");
    assert_eq!(tool.local_bin, "bin/typeprof");
    assert_eq!(tool.manifest, "Gemfile");
    assert_eq!(tool.run_prefix, vec!["bundle", "exec"]);
    assert_eq!(tool.version_arg, "--version");
    assert_eq!(tool.server_arg, "--lsp");
    assert_eq!(tool.minimum_version, ToolVersion::new(0, 20, 0));
    assert!(tool.setup_hint.contains("Gemfile"));
}

#[test]
fn full_config_parses_every_section() {
    let config = SupervisorConfig::from_toml_str(sample_toml()).expect("valid config");
    assert!(!config.login_shell);
    assert_eq!(config.ipc_name, "supervisor-test");
    assert_eq!(config.tool.minimum_version, ToolVersion::new(0, 21, 0));
    // Unspecified tool keys keep their defaults.
    assert_eq!(config.tool.server_arg, "--lsp");
    assert_eq!(config.workspaces.len(), 2);
    assert_eq!(config.workspaces[1].name, "lib");
}

#[test]
fn server_override_is_trimmed() {
    let config = SupervisorConfig::from_toml_str(sample_toml()).expect("valid config");
    assert_eq!(config.server_override(), Some("/opt/typeprof/bin/typeprof"));
}

#[test]
fn blank_server_override_is_ignored() {
    let config = SupervisorConfig::from_toml_str("server_path = \"   \"").expect("valid config");
    assert_eq!(config.server_override(), None);
}

#[test]
fn zero_timeout_disables_limit() {
    let config = SupervisorConfig::from_toml_str(sample_toml()).expect("valid config");
    assert_eq!(config.timeouts.probe(), Some(Duration::from_secs(5)));
    assert_eq!(config.timeouts.handshake(), None);
    assert_eq!(config.timeouts.connect(), Some(Duration::from_secs(2)));
    assert_eq!(config.timeouts.terminate_grace(), Duration::from_secs(1));
}

#[test]
fn default_timeouts() {
    let timeouts = TimeoutConfig::default();
    assert_eq!(timeouts.probe(), Some(Duration::from_secs(30)));
    assert_eq!(timeouts.handshake(), Some(Duration::from_secs(60)));
    assert_eq!(timeouts.connect(), Some(Duration::from_secs(10)));
    assert_eq!(timeouts.terminate_grace(), Duration::from_secs(5));
}

#[test]
fn duplicate_workspace_names_rejected() {
    let raw = r#"
[[workspace]]
name = "app"
uri = "file:///a"

[[workspace]]
name = "app"
uri = "file:///b"
"#;
    let err = SupervisorConfig::from_toml_str(raw).expect_err("duplicates must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("duplicate workspace name 'app'")));
}

#[test]
fn empty_tool_name_rejected() {
    let err = SupervisorConfig::from_toml_str("[tool]\nname = \"\"").expect_err("must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("tool.name")));
}

#[test]
fn empty_server_arg_rejected() {
    let err = SupervisorConfig::from_toml_str("[tool]\nserver_arg = \" \"").expect_err("must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("tool.server_arg")));
}

#[test]
fn malformed_minimum_version_rejected() {
    let err = SupervisorConfig::from_toml_str("[tool]\nminimum_version = \"zero\"")
        .expect_err("must fail");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn invalid_toml_maps_to_config_error() {
    let err = SupervisorConfig::from_toml_str("enable = = true").expect_err("must fail");
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = SupervisorConfig::load_from_path(&path).expect("load");
    assert_eq!(config.workspaces.len(), 2);
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = SupervisorConfig::load_from_path(dir.path().join("absent.toml"))
        .expect_err("missing file");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}
