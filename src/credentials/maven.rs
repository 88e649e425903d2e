// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Maven `settings.xml` server entries for the package registry token.
//!
//! The entries live between two marker comments. Re-materializing replaces the
//! block instead of appending a second one.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use walkdir::WalkDir;

use crate::error::CredentialError;

const MARKER_START: &str = "<!-- cifix registry token start -->";
const MARKER_END: &str = "<!-- cifix registry token end -->";

/// Directories never searched for `pom.xml`.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "dist", "build", "target", ".idea", ".vscode"];

static MARKER_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?s)[ \t]*{}.*?{}[ \t]*\n?",
        regex::escape(MARKER_START),
        regex::escape(MARKER_END)
    ))
    .expect("marker regex")
});
static SERVERS_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<servers>").expect("servers regex"));
static SERVERS_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[ \t]*</servers>").expect("servers regex"));
static SETTINGS_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</settings>").expect("settings regex"));
static REPOSITORY_BLOCKS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"(?is)<repository\b.*?</repository>").expect("repository regex"),
        Regex::new(r"(?is)<pluginRepository\b.*?</pluginRepository>").expect("repository regex"),
    ]
});
static ID_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<id>(.*?)</id>").expect("id regex"));

pub fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Replace every occurrence of `secret` with `****`.
pub fn redact_secret(content: &str, secret: &str) -> String {
    if secret.is_empty() {
        return content.to_string();
    }
    content
        .replace(secret, "****")
        .replace(&escape_xml(secret), "****")
}

/// One `<server>` per id, wrapped in the marker comments.
pub fn servers_snippet(ids: &[String], token: &str) -> String {
    let token = escape_xml(token);
    let servers: Vec<String> = ids
        .iter()
        .map(|id| {
            format!(
                "    <server>\n      <id>{}</id>\n      <username>oauth2</username>\n      \
                 <password>{token}</password>\n      <configuration>\n        <httpHeaders>\n          \
                 <property>\n            <name>Private-Token</name>\n            <value>{token}</value>\n          \
                 </property>\n        </httpHeaders>\n      </configuration>\n    </server>",
                escape_xml(id)
            )
        })
        .collect();
    format!("    {MARKER_START}\n{}\n    {MARKER_END}", servers.join("\n"))
}

fn wrap_settings(snippet: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<settings xmlns=\"http://maven.apache.org/SETTINGS/1.0.0\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xsi:schemaLocation=\"http://maven.apache.org/SETTINGS/1.0.0 https://maven.apache.org/xsd/settings-1.0.0.xsd\">\n  \
         <servers>\n{snippet}\n  </servers>\n</settings>\n"
    )
}

/// Merge the server snippet into existing settings content.
pub fn merge_settings(existing: &str, snippet: &str) -> String {
    if existing.trim().is_empty() {
        return wrap_settings(snippet);
    }

    let cleaned = MARKER_BLOCK.replace_all(existing, "");
    if SERVERS_OPEN.is_match(&cleaned) && SERVERS_CLOSE.is_match(&cleaned) {
        let replacement = format!("{snippet}\n  </servers>");
        return SERVERS_CLOSE
            .replacen(&cleaned, 1, NoExpand(&replacement))
            .into_owned();
    }
    if SETTINGS_CLOSE.is_match(&cleaned) {
        let replacement = format!("  <servers>\n{snippet}\n  </servers>\n</settings>");
        return SETTINGS_CLOSE
            .replacen(&cleaned, 1, NoExpand(&replacement))
            .into_owned();
    }
    wrap_settings(snippet)
}

/// Repository ids from `pom.xml` files whose repository URL matches `pattern`.
///
/// Ids keep first-seen order without duplicates.
pub fn collect_repository_ids(repo: &Path, pattern: &Regex) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let poms = WalkDir::new(repo)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.depth() > 0
                && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.file_name() == "pom.xml");

    for pom in poms {
        let Ok(content) = std::fs::read_to_string(pom.path()) else {
            continue;
        };
        if !pattern.is_match(&content) {
            continue;
        }
        for block_re in REPOSITORY_BLOCKS.iter() {
            for block in block_re.find_iter(&content) {
                let block = block.as_str();
                if !pattern.is_match(block) {
                    continue;
                }
                if let Some(id) = ID_TAG.captures(block).and_then(|c| c.get(1)) {
                    let id = id.as_str().trim().to_string();
                    if !id.is_empty() && !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
    }
    ids
}

/// Result of writing `~/.m2/settings.xml`.
#[derive(Debug, Clone)]
pub struct SettingsUpdate {
    pub path: PathBuf,
    pub server_ids: Vec<String>,
    /// File content with the token replaced by `****`, safe to log.
    pub redacted: String,
}

/// Write or update `{home}/.m2/settings.xml` with entries for `token`.
pub async fn ensure_settings(
    home: &Path,
    repo: &Path,
    token: &str,
    url_pattern: Option<&str>,
    default_server_id: &str,
) -> Result<SettingsUpdate, CredentialError> {
    let m2 = home.join(".m2");
    tokio::fs::create_dir_all(&m2).await?;
    let path = m2.join("settings.xml");

    let existing = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut server_ids = match url_pattern.map(str::trim).filter(|p| !p.is_empty()) {
        Some(pattern) => {
            let re = regex::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| CredentialError::Pattern(e.to_string()))?;
            let repo = repo.to_path_buf();
            tokio::task::spawn_blocking(move || collect_repository_ids(&repo, &re))
                .await
                .unwrap_or_default()
        }
        None => Vec::new(),
    };
    if server_ids.is_empty() {
        server_ids.push(default_server_id.to_string());
    }

    let content = merge_settings(&existing, &servers_snippet(&server_ids, token));
    super::write_private(&path, content.as_bytes()).await?;

    Ok(SettingsUpdate {
        path,
        server_ids,
        redacted: redact_secret(&content, token),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const POM: &str = r#"<project>
  <repositories>
    <repository>
      <id>corp-maven</id>
      <url>https://gitlab.example.com/api/v4/packages/maven</url>
    </repository>
    <repository>
      <id>central</id>
      <url>https://repo.maven.apache.org/maven2</url>
    </repository>
  </repositories>
  <pluginRepositories>
    <pluginRepository>
      <id>corp-plugins</id>
      <url>https://gitlab.example.com/api/v4/packages/maven</url>
    </pluginRepository>
  </pluginRepositories>
</project>"#;

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml(r#"a&b<c>"d"'e'"#), "a&amp;b&lt;c&gt;&quot;d&quot;&apos;e&apos;");
    }

    #[test]
    fn test_merge_into_empty() {
        let content = merge_settings("", &servers_snippet(&["gitlab-maven".into()], "tok"));
        assert!(content.starts_with("<?xml"));
        assert_eq!(count(&content, MARKER_START), 1);
        assert!(content.contains("<id>gitlab-maven</id>"));
        assert!(content.contains("<name>Private-Token</name>"));
        assert!(content.contains("<password>tok</password>"));
    }

    #[test]
    fn test_merge_is_idempotent_and_replaces_token() {
        let ids = vec!["gitlab-maven".to_string()];
        let first = merge_settings("", &servers_snippet(&ids, "old-token"));
        let second = merge_settings(&first, &servers_snippet(&ids, "new-token"));
        let third = merge_settings(&second, &servers_snippet(&ids, "new-token"));

        assert_eq!(count(&second, MARKER_START), 1);
        assert_eq!(count(&second, MARKER_END), 1);
        assert!(!second.contains("old-token"));
        assert_eq!(count(&second, "new-token"), 2);
        assert_eq!(second, third);
    }

    #[test]
    fn test_merge_keeps_existing_servers() {
        let existing = "<settings>\n  <servers>\n    <server><id>other</id></server>\n  </servers>\n</settings>\n";
        let merged = merge_settings(existing, &servers_snippet(&["corp".into()], "t"));
        assert!(merged.contains("<server><id>other</id></server>"));
        assert!(merged.contains("<id>corp</id>"));
        assert_eq!(count(&merged, "</servers>"), 1);
    }

    #[test]
    fn test_merge_adds_servers_section() {
        let existing = "<settings>\n  <localRepository>/tmp/m2</localRepository>\n</settings>\n";
        let merged = merge_settings(existing, &servers_snippet(&["corp".into()], "t"));
        assert!(merged.contains("<localRepository>/tmp/m2</localRepository>"));
        assert_eq!(count(&merged, "<servers>"), 1);
        assert!(merged.trim_end().ends_with("</settings>"));
    }

    #[test]
    fn test_token_with_dollar_is_literal() {
        let merged = merge_settings(
            "<settings><servers></servers></settings>",
            &servers_snippet(&["x".into()], "a$1b"),
        );
        assert!(merged.contains("<password>a$1b</password>"));
    }

    #[test]
    fn test_collect_repository_ids() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("module")).unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("pom.xml"), POM).unwrap();
        std::fs::write(dir.path().join("module/pom.xml"), POM).unwrap();
        std::fs::write(
            dir.path().join("target/pom.xml"),
            POM.replace("corp-maven", "ignored"),
        )
        .unwrap();

        let pattern = Regex::new(r"gitlab\.example\.com/api/v4/packages/maven").unwrap();
        let ids = collect_repository_ids(dir.path(), &pattern);
        assert_eq!(ids, vec!["corp-maven", "corp-plugins"]);
    }

    #[test]
    fn test_redact_secret() {
        let text = "<password>tok&en</password><value>tok&amp;en</value>";
        let redacted = redact_secret(text, "tok&en");
        assert_eq!(redacted, "<password>****</password><value>****</value>");
    }

    #[tokio::test]
    async fn test_ensure_settings_twice() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        std::fs::write(repo.path().join("pom.xml"), POM).unwrap();
        let pattern = Some(r"gitlab\.example\.com");

        let first = ensure_settings(home.path(), repo.path(), "glpat-one", pattern, "gitlab-maven")
            .await
            .unwrap();
        assert_eq!(first.server_ids, vec!["corp-maven", "corp-plugins"]);
        assert!(!first.redacted.contains("glpat-one"));

        ensure_settings(home.path(), repo.path(), "glpat-two", pattern, "gitlab-maven")
            .await
            .unwrap();
        let content = std::fs::read_to_string(home.path().join(".m2/settings.xml")).unwrap();
        assert_eq!(count(&content, MARKER_START), 1);
        assert!(!content.contains("glpat-one"));
        assert!(content.contains("glpat-two"));
    }

    #[tokio::test]
    async fn test_ensure_settings_default_id() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        let update = ensure_settings(home.path(), repo.path(), "t0k3n", None, "gitlab-maven")
            .await
            .unwrap();
        assert_eq!(update.server_ids, vec!["gitlab-maven"]);
        assert_eq!(update.path, home.path().join(".m2/settings.xml"));
    }

    #[tokio::test]
    async fn test_ensure_settings_bad_pattern() {
        let home = tempdir().unwrap();
        let err = ensure_settings(home.path(), home.path(), "t", Some("("), "id")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Pattern(_)));
    }
}
