//! Command resolution for the external tool.
//!
//! Resolution order, first match wins:
//!
//! 1. `<root>/<local_bin>` exists → run it directly.
//! 2. A user override is configured → use it verbatim. An override naming an
//!    existing file is one word, even if the path has spaces; anything else
//!    is split into words.
//! 3. `<root>/<manifest>` exists → prefix with the dependency manager's run
//!    command (`bundle exec typeprof`).
//! 4. Otherwise → bare tool name from the search path.
//!
//! Nothing here checks that the result is executable; a bad command surfaces
//! later as a spawn failure or a non-zero probe exit.

use std::fmt::{Display, Formatter};
use std::path::Path;

use crate::config::ToolConfig;

/// Which resolution rule produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// Tool binary inside the workspace.
    LocalBin,
    /// User-configured path or command.
    Override,
    /// Dependency manifest present; run through the dependency manager.
    Manifest,
    /// Bare name resolved through `PATH`.
    SearchPath,
}

/// A concrete command line: program followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// Executable (absolute path, override word, or bare name).
    pub program: String,
    /// Remaining words, ending with the mode argument.
    pub args: Vec<String>,
    /// Rule that selected this command.
    pub source: CommandSource,
}

impl ResolvedCommand {
    /// Render as a single line for `sh -c`, quoting words that need it.
    #[must_use]
    pub fn shell_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Display for ResolvedCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.shell_line())
    }
}

/// Resolve the command line for `root`, suffixed with `mode_arg`.
#[must_use]
pub fn resolve(
    root: &Path,
    override_cmd: Option<&str>,
    tool: &ToolConfig,
    mode_arg: &str,
) -> ResolvedCommand {
    let local_bin = root.join(&tool.local_bin);
    let override_cmd = override_cmd.map(str::trim).filter(|s| !s.is_empty());

    let (mut words, source): (Vec<String>, CommandSource) = if local_bin.is_file() {
        (
            vec![local_bin.to_string_lossy().into_owned()],
            CommandSource::LocalBin,
        )
    } else if let Some(cmd) = override_cmd {
        (override_words(cmd), CommandSource::Override)
    } else if !tool.manifest.is_empty() && root.join(&tool.manifest).is_file() {
        let mut words = tool.run_prefix.clone();
        words.push(tool.name.clone());
        (words, CommandSource::Manifest)
    } else {
        (vec![tool.name.clone()], CommandSource::SearchPath)
    };

    words.push(mode_arg.to_owned());
    let program = words.remove(0);

    ResolvedCommand {
        program,
        args: words,
        source,
    }
}

fn override_words(cmd: &str) -> Vec<String> {
    if Path::new(cmd).is_file() {
        vec![cmd.to_owned()]
    } else {
        cmd.split_whitespace().map(str::to_owned).collect()
    }
}

/// Single-quote a word for POSIX-style shells when it contains anything
/// other than plain path characters.
fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if plain {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
