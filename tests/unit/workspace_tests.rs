use std::path::{Path, PathBuf};

use analysis_supervisor::config_watcher::parse_workspaces;
use analysis_supervisor::models::workspace::Workspace;

#[cfg(unix)]
#[test]
fn file_uri_maps_to_local_root() {
    let ws = Workspace::new("app", "file:///home/dev/my%20app");
    assert!(ws.is_local());
    assert_eq!(ws.scheme(), Some("file"));
    assert_eq!(ws.local_root(), Some(PathBuf::from("/home/dev/my app")));
}

#[cfg(unix)]
#[test]
fn localhost_authority_is_accepted() {
    let ws = Workspace::new("app", "file://localhost/srv/app");
    assert_eq!(ws.local_root(), Some(PathBuf::from("/srv/app")));
}

#[test]
fn scheme_match_is_case_insensitive() {
    let ws = Workspace::new("app", "FILE:///srv/app");
    assert!(ws.is_local());
}

#[test]
fn bare_path_is_local() {
    let ws = Workspace::new("app", "/srv/app");
    assert_eq!(ws.local_root(), Some(PathBuf::from("/srv/app")));
}

#[test]
fn remote_schemes_are_not_local() {
    for uri in ["vscode-vfs://github/org/repo", "ssh://host/srv/app", "untitled:Untitled-1"] {
        let ws = Workspace::new("remote", uri);
        assert!(!ws.is_local(), "{uri}");
        assert_eq!(ws.local_root(), None);
    }
}

#[test]
fn empty_uri_is_not_local() {
    assert!(!Workspace::new("empty", "").is_local());
}

#[cfg(unix)]
#[test]
fn from_path_round_trips_through_local_root() {
    let ws = Workspace::from_path("app", Path::new("/home/dev/my app"));
    assert_eq!(ws.uri, "file:///home/dev/my%20app");
    assert_eq!(ws.local_root(), Some(PathBuf::from("/home/dev/my app")));
}

#[cfg(unix)]
#[test]
fn literal_percent_in_directory_name_survives_round_trip() {
    let ws = Workspace::from_path("w", Path::new("/srv/a%20b"));
    assert_eq!(ws.uri, "file:///srv/a%2520b");
    assert_eq!(ws.local_root(), Some(PathBuf::from("/srv/a%20b")));
}

#[cfg(unix)]
#[test]
fn query_and_fragment_characters_survive_round_trip() {
    for dir in ["/srv/what?now", "/srv/issue#12", "/srv/100%"] {
        let ws = Workspace::from_path("w", Path::new(dir));
        assert_eq!(ws.local_root(), Some(PathBuf::from(dir)), "{}", ws.uri);
    }
}

#[test]
fn display_shows_name_and_uri() {
    let ws = Workspace::new("app", "file:///srv/app");
    assert_eq!(ws.to_string(), "app (file:///srv/app)");
}

#[test]
fn parse_workspaces_ignores_other_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
enable = true
ipc_name = "x"

[tool]
name = "typeprof"

[[workspace]]
name = "app"
uri = "file:///srv/app"
"#,
    )
    .expect("write");

    let list = parse_workspaces(&path).expect("parse");
    assert_eq!(list, vec![Workspace::new("app", "file:///srv/app")]);
}

#[test]
fn parse_workspaces_without_entries_is_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "enable = false\n").expect("write");
    assert!(parse_workspaces(&path).expect("parse").is_empty());
}

#[test]
fn parse_workspaces_rejects_malformed_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[[workspace]]\nname = 1\n").expect("write");
    assert!(parse_workspaces(&path).is_err());
}
