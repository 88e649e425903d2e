// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! System prompt for the sandbox agent.

use super::types::SandboxBrief;

const ECONOMY_GUIDANCE: &str = "Economy mode is active: avoid large reads, prefer short commands, \
keep answers brief and do not rerun commands without a reason.";

const HTTP_GUIDANCE: &str = "If you need documentation, articles or other public material from the \
internet, use the http_get tool (unauthenticated GET requests only, no sensitive headers).";

/// Build the system message for a job.
pub fn system_prompt(brief: &SandboxBrief) -> String {
    let mut prompt = format!(
        "You are working in an isolated sandbox at {}. Use the tools to read and change files and \
         to run commands. Suggested test command: {}. Always stay inside the repository directory. \
         Prefer rg for recursive searches instead of grep -R, which is slower.",
        brief.root.display(),
        brief.test_command.as_deref().unwrap_or("n/a"),
    );

    if brief.profile.is_economy() {
        prompt.push_str("\n");
        prompt.push_str(ECONOMY_GUIDANCE);
    }

    if !brief.problem_files.is_empty() {
        prompt.push_str(
            "\nFiles attached to the problem report are available relative to the repository root. \
             They are reference material and are not part of the change set:",
        );
        for file in &brief.problem_files {
            prompt.push_str("\n- ");
            prompt.push_str(file);
        }
    }

    prompt.push_str("\n");
    prompt.push_str(HTTP_GUIDANCE);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::Profile;
    use std::path::PathBuf;

    fn brief(profile: Profile) -> SandboxBrief {
        SandboxBrief {
            root: PathBuf::from("/work/cifix-1/repo"),
            test_command: None,
            profile,
            problem_files: Vec::new(),
        }
    }

    #[test]
    fn test_standard_prompt() {
        let prompt = system_prompt(&brief(Profile::Standard));
        assert!(prompt.contains("/work/cifix-1/repo"));
        assert!(prompt.contains("Suggested test command: n/a."));
        assert!(prompt.contains("Prefer rg"));
        assert!(prompt.contains("http_get"));
        assert!(!prompt.contains("Economy mode"));
        assert!(!prompt.contains("attached to the problem report"));
    }

    #[test]
    fn test_economy_prompt_with_attachments() {
        let mut b = brief(Profile::Economy);
        b.test_command = Some("mvn -q test".to_string());
        b.problem_files = vec![
            ".cifix/problem-files/stacktrace.txt".to_string(),
            ".cifix/problem-files/log.txt".to_string(),
        ];
        let prompt = system_prompt(&b);
        assert!(prompt.contains("Suggested test command: mvn -q test."));
        assert!(prompt.contains("Economy mode is active"));
        assert!(prompt.contains("\n- .cifix/problem-files/stacktrace.txt"));
        assert!(prompt.contains("\n- .cifix/problem-files/log.txt"));
    }
}
