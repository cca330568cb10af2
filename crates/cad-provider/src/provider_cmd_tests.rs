use super::*;
use cad_core::types::ProviderKind;
use std::path::PathBuf;

fn args_of(cmd: &Command) -> Vec<String> {
    cmd.as_std()
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
}

fn binary() -> PathBuf {
    PathBuf::from("/usr/local/bin/agent")
}

#[test]
fn test_claude_fresh_command_shape() {
    let provider = Provider::new(ProviderKind::ClaudeCode, None);
    let cmd = provider.build_command(
        &binary(),
        "do the thing",
        None,
        Some(Path::new("/tmp/cfg.json")),
        30,
    );
    let args = args_of(&cmd);

    assert_eq!(
        args,
        [
            "-p",
            "do the thing",
            "--output-format",
            "stream-json",
            "--verbose",
            "--dangerously-skip-permissions",
            "--max-turns",
            "30",
            "--mcp-config",
            "/tmp/cfg.json",
        ]
    );
}

#[test]
fn test_claude_resume_command_includes_session() {
    let provider = Provider::new(ProviderKind::ClaudeCode, Some("sonnet".to_string()));
    let cmd = provider.build_resume_command(&binary(), "sid-1", "continue", None, 20);
    let args = args_of(&cmd);

    let resume_at = args.iter().position(|a| a == "--resume").expect("--resume");
    assert_eq!(args[resume_at + 1], "sid-1");
    assert!(args.contains(&"--max-turns".to_string()));
    assert!(args.contains(&"--model".to_string()));
    assert!(args.contains(&"sonnet".to_string()));
}

#[test]
fn test_prompt_is_a_single_argv_element() {
    let provider = Provider::new(ProviderKind::ClaudeCode, None);
    let prompt = "[User]:\nline one\n\nline two with spaces";
    let cmd = provider.build_command(&binary(), prompt, None, None, 30);
    let args = args_of(&cmd);
    assert_eq!(args[0], "-p");
    assert_eq!(args[1], prompt);
}

#[test]
fn test_gemini_command_has_no_turn_or_config_flags() {
    let provider = Provider::new(ProviderKind::GeminiCli, None);
    let cmd = provider.build_command(
        &binary(),
        "prompt",
        Some("sid-9"),
        Some(Path::new("/tmp/cfg.json")),
        30,
    );
    let args = args_of(&cmd);

    assert_eq!(
        args,
        [
            "-p",
            "prompt",
            "--output-format",
            "stream-json",
            "--approval-mode",
            "yolo",
            "--resume",
            "sid-9",
        ]
    );
}

#[test]
fn test_copilot_command_prefixes_config_path() {
    let provider = Provider::new(ProviderKind::CopilotCli, None);
    let cmd = provider.build_command(
        &binary(),
        "prompt",
        Some("sid-2"),
        Some(Path::new("/tmp/cfg.json")),
        30,
    );
    let args = args_of(&cmd);

    assert_eq!(
        args,
        [
            "-p",
            "prompt",
            "--yolo",
            "--resume",
            "sid-2",
            "--additional-mcp-config",
            "@/tmp/cfg.json",
        ]
    );
}

#[test]
fn test_claude_model_flag_resolution() {
    let cases = [
        (None, None),
        (Some("claude"), None),
        (Some("default"), None),
        (Some("opus"), Some("opus")),
        (Some("claude-sonnet-4"), Some("sonnet")),
        (Some("Claude-Opus-4"), Some("opus")),
        (Some("haiku-latest"), Some("haiku")),
        (Some("custom-model"), Some("custom-model")),
    ];
    for (input, expected) in cases {
        let provider = Provider::new(ProviderKind::ClaudeCode, input.map(str::to_string));
        assert_eq!(
            provider.resolve_model_flag().as_deref(),
            expected,
            "input {input:?}"
        );
    }
}

#[test]
fn test_gemini_and_copilot_model_flags_pass_through() {
    let provider = Provider::new(
        ProviderKind::GeminiCli,
        Some("gemini-2.5-pro".to_string()),
    );
    assert_eq!(provider.resolve_model_flag().as_deref(), Some("gemini-2.5-pro"));

    let provider = Provider::new(ProviderKind::GeminiCli, Some("default".to_string()));
    assert_eq!(provider.resolve_model_flag(), None);

    let provider = Provider::new(ProviderKind::CopilotCli, Some("copilot".to_string()));
    assert_eq!(provider.resolve_model_flag(), None);
}

#[test]
fn test_provider_identity_table() {
    let claude = Provider::new(ProviderKind::ClaudeCode, None);
    assert_eq!(claude.binary_name(), "claude");
    assert_eq!(claude.provider_tag(), "claude-code");
    assert_eq!(claude.sessions_file(), ".claude_sessions.json");
    assert_eq!(claude.stream_flavor(), StreamFlavor::Ndjson);
    assert_eq!(claude.settings_dir(), None);

    let gemini = Provider::new(ProviderKind::GeminiCli, None);
    assert_eq!(gemini.sessions_file(), ".gemini_sessions.json");
    assert_eq!(gemini.settings_dir(), Some(".gemini"));
    assert_eq!(gemini.stream_flavor(), StreamFlavor::Ndjson);

    let copilot = Provider::new(ProviderKind::CopilotCli, None);
    assert_eq!(copilot.sessions_file(), ".copilot_sessions.json");
    assert_eq!(copilot.stream_flavor(), StreamFlavor::PlainText);
    assert_eq!(copilot.settings_dir(), None);
}

#[test]
fn test_fallback_paths_cover_common_installs() {
    let provider = Provider::new(ProviderKind::ClaudeCode, None);
    assert!(provider.fallback_paths().contains(&"/usr/local/bin/claude"));
    assert!(provider.fallback_paths().iter().any(|p| p.starts_with("~/")));
}
