use serde::{Deserialize, Serialize};

/// The path set a capability key (or event subscriber) is restricted to.
/// Fixed at key issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum Scope {
  /// Every path in the workspace.
  Workspace,
  /// A path prefix, usually ending in `/`.
  Folder(String),
  /// A single file path.
  File(String),
}

impl Scope {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Workspace => "workspace",
      Self::Folder(_) => "folder",
      Self::File(_) => "file",
    }
  }

  pub fn path(&self) -> &str {
    match self {
      Self::Workspace => "/",
      Self::Folder(p) | Self::File(p) => p,
    }
  }

  pub fn from_kind(kind: &str, path: &str) -> Option<Self> {
    match kind {
      "workspace" => Some(Self::Workspace),
      "folder" => Some(Self::Folder(path.to_string())),
      "file" => Some(Self::File(path.to_string())),
      _ => None,
    }
  }

  /// Whether `path` falls inside this scope. Used both for key
  /// authorization and for event fan-out filtering.
  pub fn matches(&self, path: &str) -> bool {
    match self {
      Self::Workspace => true,
      Self::Folder(scope) | Self::File(scope) => prefix_matches(path, scope),
    }
  }
}

/// The scope matching rules:
/// - empty or `/` matches every path;
/// - exact equality always matches;
/// - a scope ending in `/` requires the prefix including that slash, so
///   `/foo/` does not match `/foobar`;
/// - otherwise the scope is a literal string prefix, so `/foo` matches
///   both `/foobar` and `/foo/bar`.
pub fn prefix_matches(path: &str, scope: &str) -> bool {
  if scope.is_empty() || scope == "/" {
    return true;
  }
  if path == scope {
    return true;
  }
  path.starts_with(scope)
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn matching_table() {
    assert!(prefix_matches("/foo", "/"));
    assert!(prefix_matches("/foo", ""));
    assert!(!prefix_matches("/other/file.md", "/projects/"));
    assert!(prefix_matches("/projects/alpha/file.md", "/projects/"));
    assert!(prefix_matches("/foobar", "/foo"));
    assert!(prefix_matches("/foo/bar", "/foo"));
    assert!(!prefix_matches("/foobar", "/foo/"));
    assert!(prefix_matches("/foo/", "/foo/"));
  }

  #[test]
  fn workspace_scope_matches_everything() {
    assert!(Scope::Workspace.matches("/anything/at/all.md"));
    assert!(Scope::Folder("/projects/".into()).matches("/projects/x.md"));
    assert!(!Scope::Folder("/projects/".into()).matches("/notes/x.md"));
    assert!(Scope::File("/notes/today.md".into()).matches("/notes/today.md"));
    assert!(!Scope::File("/notes/today.md".into()).matches("/notes/tomorrow.md"));
  }

  proptest! {
    // Anything under `scope` + "/" must match, and adding a trailing
    // slash to the scope can only ever shrink the matched set.
    #[test]
    fn children_always_match(scope in "/[a-z]{1,8}", child in "[a-z/]{1,16}") {
      let path = format!("{scope}/{child}");
      prop_assert!(prefix_matches(&path, &scope));
      let closed = format!("{scope}/");
      prop_assert!(prefix_matches(&path, &closed));
    }

    #[test]
    fn trailing_slash_narrows(path in "/[a-z/]{1,24}", scope in "/[a-z]{1,8}") {
      let closed = format!("{scope}/");
      if prefix_matches(&path, &closed) {
        prop_assert!(prefix_matches(&path, &scope));
      }
    }
  }
}
