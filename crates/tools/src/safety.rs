//! Command-danger classification for approval gating.
//!
//! A shell command is classified dangerous when it touches destructive
//! verbs, mutates the network, or reaches outside the workspace roots.
//! The pattern sets are compiled once into `RegexSet`s; the
//! classification carries a reason code that travels on the approval
//! event.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Regex, RegexSet};

/// Why a command was classified dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DangerReason {
    DestructiveVerb,
    NetworkMutation,
    WorkspaceEscape,
}

impl DangerReason {
    pub fn code(&self) -> &'static str {
        match self {
            DangerReason::DestructiveVerb => "destructive_verb",
            DangerReason::NetworkMutation => "network_mutation",
            DangerReason::WorkspaceEscape => "workspace_escape",
        }
    }
}

const DESTRUCTIVE_VERBS: &[&str] = &[
    "rm", "rmdir", "unlink", "shred", "mkfs", "dd", "fdisk", "parted",
    "shutdown", "reboot", "halt", "poweroff", "kill", "killall", "pkill",
    "truncate", "chown", "chmod",
];

/// One pattern per verb, matched in command position: start of input,
/// after a pipe/chain separator, or after a wrapper like `sudo`. A path
/// prefix (`/bin/rm`) still matches.
static DESTRUCTIVE_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    let patterns: Vec<String> = DESTRUCTIVE_VERBS
        .iter()
        .map(|verb| format!(r"(?:^|[|;&]\s*|\b(?:sudo|env|xargs)\s+)(?:\S*/)?{verb}\b"))
        .collect();
    RegexSet::new(&patterns).expect("destructive verb patterns compile")
});

static CURL_WGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\S*/)?(?:curl|wget)\b").expect("curl/wget pattern compiles"));

/// `curl`/`wget` flags that carry a request body or method override.
static DATA_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\s)(?:-d|-F|-T|-X|--data(?:-raw|-binary|-urlencode)?|--form|--upload-file|--request|--post-data|--post-file|--method|--body-data|--body-file)(?:[=\s]|$)",
    )
    .expect("network data-flag pattern compiles")
});

static NETWORK_COMMAND_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"^\s*git\s+push\b",
        r"^\s*(?:\S*/)?ssh\b",
        r"^\s*(?:\S*/)?scp\b",
        r"^\s*(?:\S*/)?rsync\b",
    ])
    .expect("network command patterns compile")
});

/// A `..` component reaching upward: a token starting with `../`, a bare
/// `..`, or `/../` inside a path.
static PARENT_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)\.\.(?:/|\s|$)|/\.\./").expect("parent-escape pattern compiles")
});

/// Absolute-path arguments (the command word itself is exempt).
static ABSOLUTE_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s(/\S+)").expect("absolute-arg pattern compiles"));

/// Classify a shell command. `None` means no gating rule matched.
pub fn classify_command(command: &str, workspace_root: &Path) -> Option<DangerReason> {
    if DESTRUCTIVE_SET.is_match(command) {
        return Some(DangerReason::DestructiveVerb);
    }

    if CURL_WGET.is_match(command) && DATA_FLAG.is_match(command) {
        return Some(DangerReason::NetworkMutation);
    }
    if NETWORK_COMMAND_SET.is_match(command) {
        return Some(DangerReason::NetworkMutation);
    }

    if PARENT_ESCAPE.is_match(command) {
        return Some(DangerReason::WorkspaceEscape);
    }
    for capture in ABSOLUTE_ARG.captures_iter(command) {
        let path = Path::new(capture.get(1).map_or("", |m| m.as_str()));
        if !path.starts_with(workspace_root) && !path.starts_with("/tmp") {
            return Some(DangerReason::WorkspaceEscape);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> &'static Path {
        Path::new("/ws/project")
    }

    #[test]
    fn destructive_verbs_are_flagged() {
        assert_eq!(
            classify_command("rm -rf /", root()),
            Some(DangerReason::DestructiveVerb)
        );
        assert_eq!(
            classify_command("find . | xargs rm", root()),
            Some(DangerReason::DestructiveVerb)
        );
        assert_eq!(
            classify_command("sudo shutdown now", root()),
            Some(DangerReason::DestructiveVerb)
        );
        assert_eq!(
            classify_command("/bin/rm file.txt", root()),
            Some(DangerReason::DestructiveVerb)
        );
        assert_eq!(
            classify_command("echo done && rmdir build", root()),
            Some(DangerReason::DestructiveVerb)
        );
    }

    #[test]
    fn verb_matching_respects_word_boundaries() {
        // `rm` inside another word is not a verb.
        assert_eq!(classify_command("cargo fmt", root()), None);
        assert_eq!(classify_command("grep -r format src", root()), None);
        assert_eq!(classify_command("echo killing-time", root()), None);
    }

    #[test]
    fn plain_reads_are_not_flagged() {
        assert_eq!(classify_command("ls -la", root()), None);
        assert_eq!(classify_command("cat notes.txt", root()), None);
        assert_eq!(classify_command("git status", root()), None);
        assert_eq!(classify_command("curl https://example.com", root()), None);
    }

    #[test]
    fn network_mutations_are_flagged() {
        assert_eq!(
            classify_command("curl -X POST https://api.example.com", root()),
            Some(DangerReason::NetworkMutation)
        );
        assert_eq!(
            classify_command("curl --data-raw '{}' https://api.example.com", root()),
            Some(DangerReason::NetworkMutation)
        );
        assert_eq!(
            classify_command("wget --post-data=a=1 https://example.com", root()),
            Some(DangerReason::NetworkMutation)
        );
        assert_eq!(
            classify_command("git push origin main", root()),
            Some(DangerReason::NetworkMutation)
        );
    }

    #[test]
    fn workspace_escapes_are_flagged() {
        assert_eq!(
            classify_command("cat /etc/passwd", root()),
            Some(DangerReason::WorkspaceEscape)
        );
        assert_eq!(
            classify_command("cat ../../secrets.txt", root()),
            Some(DangerReason::WorkspaceEscape)
        );
        assert_eq!(classify_command("cat /ws/project/src/main.rs", root()), None);
        assert_eq!(classify_command("cat /tmp/scratch.txt", root()), None);
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(DangerReason::DestructiveVerb.code(), "destructive_verb");
        assert_eq!(DangerReason::NetworkMutation.code(), "network_mutation");
        assert_eq!(DangerReason::WorkspaceEscape.code(), "workspace_escape");
    }

    #[test]
    fn empty_command_is_not_flagged() {
        assert_eq!(classify_command("   ", root()), None);
    }
}
