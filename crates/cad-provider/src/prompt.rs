//! Prompt assembly: conversation flattening, tool-capability mapping, and
//! the standing instructions for fresh calls.

use std::path::Path;

use cad_core::types::{Message, MessageRole, ToolSpec};

fn push_message(parts: &mut Vec<String>, msg: &Message) {
    let text = &msg.content;
    match msg.role {
        MessageRole::System => parts.push(format!("[System Instructions]:\n{text}")),
        MessageRole::User => parts.push(format!("[User]:\n{text}")),
        MessageRole::Assistant => parts.push(format!("[Assistant]:\n{text}")),
        MessageRole::Tool => {
            let tool_name = msg
                .metadata
                .get("tool_name")
                .map(String::as_str)
                .unwrap_or("unknown");
            let call_id = msg.tool_call_id.as_deref().unwrap_or("unknown");
            parts.push(format!(
                "[Tool Result for '{tool_name}' (call_id: {call_id})]:\n{text}"
            ));
        }
    }
}

/// Map the caller's logical tools onto the agent's native tools.
fn format_tool_specs(tool_specs: &[ToolSpec], workspace_root: Option<&Path>) -> String {
    let mut tool_mappings = Vec::new();
    for spec in tool_specs {
        let name = &spec.name;
        let desc = &spec.description;
        let lower = name.to_lowercase();
        if name.contains("save_file") || lower.contains("write") {
            tool_mappings.push(format!(
                "- {name}: {desc}\n  -> Use your Write tool to create/save files with relative paths."
            ));
        } else if name.contains("read_file") || lower.contains("read") {
            tool_mappings.push(format!(
                "- {name}: {desc}\n  -> Use your Read tool to read file contents."
            ));
        } else if lower.contains("run") || lower.contains("exec") || lower.contains("bash") {
            tool_mappings.push(format!(
                "- {name}: {desc}\n  -> Use your Bash tool to execute commands."
            ));
        } else {
            tool_mappings.push(format!("- {name}: {desc}"));
        }
    }

    let mut lines = vec![
        "[Task Capabilities — Native Tool Mapping]:".to_string(),
        "You have built-in tools: Write, Edit, Read, Bash.".to_string(),
        "The following tasks are expected. Use your tools directly to accomplish them:".to_string(),
        String::new(),
    ];
    lines.extend(tool_mappings);
    lines.push(String::new());
    lines.push(
        "CRITICAL: Create all files using your Write tool with RELATIVE paths \
         (e.g. 'main.py', not absolute paths). \
         Your working directory is already set to the project workspace."
            .to_string(),
    );
    if let Some(root) = workspace_root {
        lines.push(format!("Workspace: {}", root.display()));
    }
    lines.join("\n")
}

/// Assemble the single prompt string handed to the agent CLI.
///
/// Fresh calls carry the full conversation, the tool-capability section, the
/// working-directory notice, and the standing instructions. Continuations
/// carry only new user input and tool results; everything else is already
/// established in the resumed session.
pub(crate) fn build_prompt(
    conversation: &[Message],
    tool_specs: &[ToolSpec],
    is_continuation: bool,
    workspace_root: Option<&Path>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    for msg in conversation {
        if is_continuation && !matches!(msg.role, MessageRole::User | MessageRole::Tool) {
            continue;
        }
        push_message(&mut parts, msg);
    }

    if !is_continuation {
        if !tool_specs.is_empty() {
            parts.push(format_tool_specs(tool_specs, workspace_root));
        }

        if let Some(root) = workspace_root {
            parts.push(format!(
                "[Working Directory]: {}\n\
                 Your current working directory is set to the project workspace above. \
                 All files you create with your Write tool will be saved there. \
                 Use relative paths (e.g. 'main.py', 'src/utils.py') for all file operations.",
                root.display()
            ));
        }

        parts.push(
            "[Progress Reporting]:\n\
             You have a report_progress MCP tool available. Call it at natural \
             transition points (e.g. after analyzing requirements, before starting \
             implementation, after writing key files, before/after running tests). \
             Keep reports concise (1-2 sentences). Do NOT over-report — 2-5 calls \
             per session is ideal. If reporting fails, continue your work normally."
                .to_string(),
        );

        parts.push(
            "[Turn Budget & Output Priority]:\n\
             You have a LIMITED number of agentic turns. Your PRIMARY deliverable \
             (document, code, report) is MORE important than exhaustive research.\n\
             - Spend at most 60% of your effort on research and analysis\n\
             - Reserve at least 40% for writing your final deliverable output\n\
             - If you have gathered enough context, STOP researching and START writing\n\
             - Do NOT end your response with 'I will now...' or 'Let me next...' — \
             always produce a complete deliverable before your turns run out\n\
             - Limit sequential thinking (mcp sequentialthinking) to maximum 5 steps — \
             consolidate your analysis into fewer, deeper steps rather than many shallow ones\n\
             - If you must choose between perfect research and a complete deliverable, \
             ALWAYS choose the complete deliverable"
                .to_string(),
        );
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cad_core::types::Message;
    use std::path::PathBuf;

    fn sample_conversation() -> Vec<Message> {
        vec![
            Message::system("You are a careful engineer."),
            Message::user("Write the parser."),
            Message::assistant("Starting now."),
            Message::tool_result("save_file", "call_3", "saved parser.py"),
        ]
    }

    #[test]
    fn test_fresh_prompt_labels_all_roles() {
        let prompt = build_prompt(&sample_conversation(), &[], false, None);
        assert!(prompt.contains("[System Instructions]:\nYou are a careful engineer."));
        assert!(prompt.contains("[User]:\nWrite the parser."));
        assert!(prompt.contains("[Assistant]:\nStarting now."));
        assert!(prompt.contains("[Tool Result for 'save_file' (call_id: call_3)]:\nsaved parser.py"));
        assert!(prompt.contains("[Progress Reporting]:"));
        assert!(prompt.contains("[Turn Budget & Output Priority]:"));
    }

    #[test]
    fn test_continuation_keeps_only_user_and_tool_messages() {
        let prompt = build_prompt(&sample_conversation(), &[], true, None);
        assert!(prompt.contains("[User]:"));
        assert!(prompt.contains("[Tool Result for 'save_file'"));
        assert!(!prompt.contains("[System Instructions]:"));
        assert!(!prompt.contains("[Assistant]:"));
        assert!(!prompt.contains("[Progress Reporting]:"));
        assert!(!prompt.contains("[Turn Budget & Output Priority]:"));
        assert!(!prompt.contains("[Working Directory]:"));
    }

    #[test]
    fn test_workspace_notice_on_fresh_calls() {
        let root = PathBuf::from("/tmp/ws");
        let prompt = build_prompt(&sample_conversation(), &[], false, Some(&root));
        assert!(prompt.contains("[Working Directory]: /tmp/ws"));
        assert!(prompt.contains("Use relative paths"));
    }

    #[test]
    fn test_tool_specs_map_to_native_tools() {
        let specs = vec![
            ToolSpec::new("save_file", "Persist a document"),
            ToolSpec::new("read_file", "Load a document"),
            ToolSpec::new("run_tests", "Execute the suite"),
            ToolSpec::new("summarize", "Summarize findings"),
        ];
        let prompt = build_prompt(&[Message::user("go")], &specs, false, None);
        assert!(prompt.contains("save_file: Persist a document\n  -> Use your Write tool"));
        assert!(prompt.contains("read_file: Load a document\n  -> Use your Read tool"));
        assert!(prompt.contains("run_tests: Execute the suite\n  -> Use your Bash tool"));
        assert!(prompt.contains("- summarize: Summarize findings"));
        assert!(!prompt.contains("summarize: Summarize findings\n  ->"));
    }

    #[test]
    fn test_tool_specs_omitted_on_continuation() {
        let specs = vec![ToolSpec::new("save_file", "Persist")];
        let prompt = build_prompt(&[Message::user("go")], &specs, true, None);
        assert!(!prompt.contains("[Task Capabilities"));
    }

    #[test]
    fn test_sections_joined_by_blank_lines() {
        let prompt = build_prompt(
            &[Message::user("one"), Message::user("two")],
            &[],
            true,
            None,
        );
        assert_eq!(prompt, "[User]:\none\n\n[User]:\ntwo");
    }
}
