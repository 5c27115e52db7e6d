//! Deterministic mapping from participant identifiers to remote resource names.

use crate::client::{AppType, ResourceRef};

pub const JUPYTER_SPACE_SUFFIX: &str = "-jupyter-space";
pub const CODE_EDITOR_SPACE_SUFFIX: &str = "-ce-space";

/// Username for an identifier: the ASCII letters and digits of the text
/// before the first `@`.
pub fn username_of(identifier: &str) -> String {
    identifier
        .split('@')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceNames {
    pub jupyter: String,
    pub code_editor: String,
}

pub fn workspace_names(username: &str) -> WorkspaceNames {
    WorkspaceNames {
        jupyter: format!("{username}{JUPYTER_SPACE_SUFFIX}"),
        code_editor: format!("{username}{CODE_EDITOR_SPACE_SUFFIX}"),
    }
}

pub fn profile_ref(username: &str, scope_id: &str) -> ResourceRef {
    ResourceRef::profile(username, scope_id)
}

/// Both workspaces a participant owns, jupyter first.
pub fn workspace_refs(username: &str, scope_id: &str) -> [ResourceRef; 2] {
    let names = workspace_names(username);
    [
        ResourceRef::workspace(names.jupyter, scope_id, username, AppType::JupyterLab),
        ResourceRef::workspace(names.code_editor, scope_id, username, AppType::CodeEditor),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResourceKind;

    #[test]
    fn test_username_strips_non_alphanumerics() {
        assert_eq!(username_of("alice.smith+hack@example.com"), "alicesmithhack");
        assert_eq!(username_of("Bob_99@corp.io"), "Bob99");
        assert_eq!(username_of("ålice@example.com"), "lice");
    }

    #[test]
    fn test_username_uses_text_before_first_at() {
        assert_eq!(username_of("a@b@c"), "a");
        assert_eq!(username_of("no-at-sign"), "noatsign");
        assert_eq!(username_of("@example.com"), "");
        assert_eq!(username_of(""), "");
    }

    #[test]
    fn test_username_is_alphanumeric_and_stable() {
        let inputs = [
            "x",
            "first.last@example.com",
            "weird !#$%&'*+/=?^_`{|}~ chars@example.com",
            "日本語@example.com",
            "tab\tand\nnewline@example.com",
        ];
        for input in inputs {
            let username = username_of(input);
            assert!(username.chars().all(|c| c.is_ascii_alphanumeric()), "{input:?}");
            assert_eq!(username, username_of(input));
        }
    }

    #[test]
    fn test_workspace_names() {
        let names = workspace_names("alice");
        assert_eq!(names.jupyter, "alice-jupyter-space");
        assert_eq!(names.code_editor, "alice-ce-space");
    }

    #[test]
    fn test_workspace_refs_are_owned_by_profile() {
        let [jupyter, editor] = workspace_refs("alice", "d-1");
        for workspace in [&jupyter, &editor] {
            assert_eq!(workspace.kind, ResourceKind::Workspace);
            assert_eq!(workspace.parent.as_deref(), Some("alice"));
            assert_eq!(workspace.scope_id, "d-1");
        }
        assert_eq!(jupyter.app_type, Some(AppType::JupyterLab));
        assert_eq!(editor.app_type, Some(AppType::CodeEditor));
        assert_eq!(profile_ref("alice", "d-1").parent, None);
    }
}
