//! Tool command resolution order.

use std::fs;

use analysis_supervisor::config::ToolConfig;
use analysis_supervisor::launcher::resolver::{resolve, CommandSource};

#[test]
fn local_bin_wins_over_everything() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("bin")).expect("mkdir");
    fs::write(dir.path().join("bin/typeprof"), "#!/bin/sh\n").expect("write");
    fs::write(dir.path().join("Gemfile"), "").expect("write");

    let cmd = resolve(dir.path(), Some("/usr/bin/other"), &ToolConfig::default(), "--lsp");

    assert_eq!(cmd.source, CommandSource::LocalBin);
    assert_eq!(
        cmd.program,
        dir.path().join("bin/typeprof").to_string_lossy()
    );
    assert_eq!(cmd.args, vec!["--lsp"]);
}

#[test]
fn override_used_when_no_local_bin() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("Gemfile"), "").expect("write");

    let cmd = resolve(
        dir.path(),
        Some("  /opt/tp/typeprof --quiet "),
        &ToolConfig::default(),
        "--version",
    );

    assert_eq!(cmd.source, CommandSource::Override);
    assert_eq!(cmd.program, "/opt/tp/typeprof");
    assert_eq!(cmd.args, vec!["--quiet", "--version"]);
}

#[test]
fn blank_override_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cmd = resolve(dir.path(), Some("   "), &ToolConfig::default(), "--lsp");
    assert_eq!(cmd.source, CommandSource::SearchPath);
}

#[test]
fn manifest_selects_dependency_manager() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("Gemfile"), "gem 'typeprof'\n").expect("write");

    let cmd = resolve(dir.path(), None, &ToolConfig::default(), "--lsp");

    assert_eq!(cmd.source, CommandSource::Manifest);
    assert_eq!(cmd.program, "bundle");
    assert_eq!(cmd.args, vec!["exec", "typeprof", "--lsp"]);
}

#[test]
fn bare_name_as_last_resort() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cmd = resolve(dir.path(), None, &ToolConfig::default(), "--version");

    assert_eq!(cmd.source, CommandSource::SearchPath);
    assert_eq!(cmd.program, "typeprof");
    assert_eq!(cmd.args, vec!["--version"]);
}

#[test]
fn directory_named_like_local_bin_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("bin/typeprof")).expect("mkdir");

    let cmd = resolve(dir.path(), None, &ToolConfig::default(), "--lsp");
    assert_eq!(cmd.source, CommandSource::SearchPath);
}

#[test]
fn shell_line_quotes_words_with_spaces() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cmd = resolve(
        dir.path(),
        Some("/opt/my tools/typeprof"),
        &ToolConfig::default(),
        "--lsp",
    );
    // No such file, so the override is split on whitespace.
    assert_eq!(cmd.shell_line(), "/opt/my tools/typeprof --lsp");

    let local = tempfile::Builder::new()
        .prefix("with space")
        .tempdir()
        .expect("tempdir");
    fs::create_dir_all(local.path().join("bin")).expect("mkdir");
    fs::write(local.path().join("bin/typeprof"), "").expect("write");
    let cmd = resolve(local.path(), None, &ToolConfig::default(), "--lsp");
    let line = cmd.shell_line();
    assert!(line.starts_with('\''), "{line}");
    assert!(line.ends_with(" --lsp"), "{line}");
}

#[test]
fn override_naming_existing_file_with_spaces_is_one_word() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let tools = tempfile::Builder::new()
        .prefix("my tools")
        .tempdir()
        .expect("tempdir");
    let tool_path = tools.path().join("typeprof");
    fs::write(&tool_path, "#!/bin/sh\n").expect("write");
    let override_cmd = tool_path.to_string_lossy().into_owned();

    let cmd = resolve(
        workspace.path(),
        Some(&override_cmd),
        &ToolConfig::default(),
        "--lsp",
    );

    assert_eq!(cmd.source, CommandSource::Override);
    assert_eq!(cmd.program, override_cmd);
    assert_eq!(cmd.args, vec!["--lsp"]);
}
