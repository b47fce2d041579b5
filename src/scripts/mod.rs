//! Script catalog and `{token}` substitution.

pub mod shell;

use std::collections::BTreeMap;

use crate::error::{AppError, Result};

pub const CREATE_RELEASE: &str = "create-release";
pub const INSTALL_DEPENDENCIES: &str = "install-dependencies";
pub const ACTIVATE_RELEASE: &str = "activate-release";
pub const PURGE_OLD_RELEASES: &str = "purge-old-releases";
pub const SEND_FILE: &str = "send-file";
pub const RUN_OVER_SSH: &str = "run-over-ssh";
pub const CLEANUP_FAILED_RELEASE: &str = "cleanup-failed-release";
pub const FETCH_COMMIT_DETAILS: &str = "fetch-commit-details";
pub const CREATE_ARCHIVE: &str = "create-archive";
pub const UPDATE_MIRROR: &str = "update-mirror";

fn template(name: &str) -> Option<&'static str> {
    let body = match name {
        CREATE_RELEASE => include_str!("templates/create_release.sh"),
        INSTALL_DEPENDENCIES => include_str!("templates/install_dependencies.sh"),
        ACTIVATE_RELEASE => include_str!("templates/activate_release.sh"),
        PURGE_OLD_RELEASES => include_str!("templates/purge_old_releases.sh"),
        SEND_FILE => include_str!("templates/send_file.sh"),
        RUN_OVER_SSH => include_str!("templates/run_over_ssh.sh"),
        CLEANUP_FAILED_RELEASE => include_str!("templates/cleanup_failed_release.sh"),
        FETCH_COMMIT_DETAILS => include_str!("templates/fetch_commit_details.sh"),
        CREATE_ARCHIVE => include_str!("templates/create_archive.sh"),
        UPDATE_MIRROR => include_str!("templates/update_mirror.sh"),
        _ => return None,
    };
    Some(body)
}

/// Token values for one render. Every value is shell-quoted on insert.
#[derive(Debug, Clone, Default)]
pub struct ScriptTokens {
    values: BTreeMap<String, String>,
}

impl ScriptTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl AsRef<str>) -> &mut Self {
        self.values
            .insert(name.to_string(), shell::quote_arg(value.as_ref()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptParser;

impl ScriptParser {
    pub fn new() -> Self {
        Self
    }

    /// Renders a catalog template. Every placeholder the template uses must
    /// have a value.
    pub fn render(&self, name: &str, tokens: &ScriptTokens) -> Result<String> {
        let body = template(name).ok_or_else(|| {
            AppError::Configuration(format!("Unknown script template: {}", name))
        })?;

        let missing: Vec<String> = unresolved_tokens(body)
            .into_iter()
            .filter(|token| tokens.get(token).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Configuration(format!(
                "Script {} is missing values for {}",
                name,
                missing.join(", ")
            )));
        }

        Ok(substitute(body, tokens))
    }

    /// Renders a stored script body, e.g. a custom command.
    pub fn render_str(&self, body: &str, tokens: &ScriptTokens) -> String {
        substitute(body, tokens)
    }
}

fn is_token_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Single pass so substituted values are never rescanned. Unknown
/// placeholders are left as written.
fn substitute(body: &str, tokens: &ScriptTokens) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let replacement = after.find('}').and_then(|end| {
            let name = &after[..end];
            if !is_token_name(name) {
                return None;
            }
            tokens.get(name).map(|value| (value, end))
        });

        match replacement {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Placeholder names still present in `text`.
pub fn unresolved_tokens(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        if let Some(end) = after.find('}') {
            let name = &after[..end];
            if is_token_name(name) {
                found.push(name.to_string());
            }
        }
        rest = after;
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: [&str; 10] = [
        CREATE_RELEASE,
        INSTALL_DEPENDENCIES,
        ACTIVATE_RELEASE,
        PURGE_OLD_RELEASES,
        SEND_FILE,
        RUN_OVER_SSH,
        CLEANUP_FAILED_RELEASE,
        FETCH_COMMIT_DETAILS,
        CREATE_ARCHIVE,
        UPDATE_MIRROR,
    ];

    fn full_tokens() -> ScriptTokens {
        let mut tokens = ScriptTokens::new();
        for name in [
            "release",
            "release_path",
            "project_path",
            "branch",
            "sha",
            "short_sha",
            "deployer_name",
            "deployer_email",
            "committer_name",
            "committer_email",
            "remote_archive",
            "include_dev",
            "builds_to_keep",
            "shared_path",
            "releases_path",
            "private_key",
            "username",
            "port",
            "ip_address",
            "local_file",
            "remote_file",
            "mirror_path",
            "git_reference",
            "release_archive",
            "repository",
        ] {
            tokens.insert(name, format!("value-of-{name}"));
        }
        tokens
    }

    #[test]
    fn catalog_templates_resolve_every_token() {
        let parser = ScriptParser::new();
        let tokens = full_tokens();

        for name in CATALOG {
            let template = template(name).unwrap();
            assert!(
                !unresolved_tokens(template).is_empty(),
                "{name} should use at least one token"
            );

            let rendered = parser.render(name, &tokens).unwrap();
            assert!(
                unresolved_tokens(&rendered).is_empty(),
                "{name} left {:?} unresolved",
                unresolved_tokens(&rendered)
            );
        }
    }

    #[test]
    fn unknown_template_is_configuration_error() {
        let err = ScriptParser::new()
            .render("deploy-everything", &ScriptTokens::new())
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn missing_values_are_reported() {
        let mut tokens = ScriptTokens::new();
        tokens.insert("release_path", "/srv/r1");

        let err = ScriptParser::new()
            .render(INSTALL_DEPENDENCIES, &tokens)
            .unwrap_err();
        assert!(err.to_string().contains("include_dev"));
    }

    #[test]
    fn values_are_quoted() {
        let mut tokens = ScriptTokens::new();
        tokens
            .insert("committer_name", "Robert'); DROP")
            .insert("deployer_name", "$HOME")
            .insert("release", "20260101");

        let rendered = ScriptParser::new().render_str(
            "echo {committer_name} {release} {deployer_name}",
            &tokens,
        );

        assert_eq!(rendered, "echo 'Robert'\\''); DROP' 20260101 '$HOME'");
    }

    #[test]
    fn substitution_does_not_rescan_values() {
        let mut tokens = ScriptTokens::new();
        tokens
            .insert("committer_name", "{release}")
            .insert("release", "1");

        let rendered = ScriptParser::new().render_str("{committer_name} {release}", &tokens);
        assert_eq!(rendered, "'{release}' 1");
    }

    #[test]
    fn unknown_and_shell_braces_are_kept() {
        let tokens = ScriptTokens::new();
        let body = "echo ${HOME} {unknown} {}";
        assert_eq!(ScriptParser::new().render_str(body, &tokens), body);
        assert_eq!(unresolved_tokens(body), vec!["unknown".to_string()]);
    }
}
