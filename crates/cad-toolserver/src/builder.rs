//! Server-map assembly: naming, collision resolution, `$ENV{}` interpolation,
//! and built-in progress-reporter injection.

use std::collections::HashMap;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::tooling::{ToolingSpec, ToolingTransport};

/// Name and command of the built-in progress-reporter entry.
pub const REPORTER_NAME: &str = "cad-reporter";
const REPORTER_COMMAND: &str = "cad-reporter";

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$ENV\{([A-Za-z0-9_]+)\}").unwrap_or_else(|e| panic!("placeholder regex: {e}"))
});

/// Resolved server entry as it appears in the emitted document.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ServerEntry {
    Local(LocalServer),
    Remote(RemoteServer),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LocalServer {
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RemoteServer {
    /// Always `"http"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Identity of the call the built-in reporter should report into.
#[derive(Debug, Clone)]
pub struct ReporterContext<'a> {
    pub node_id: &'a str,
    pub session_id: &'a str,
    pub server_port: u16,
}

/// Substitute every `$ENV{NAME}` in `value` from `env_map`.
///
/// Returns the resolved string and whether every referenced variable had a
/// binding.
fn resolve_env_str(value: &str, env_map: &HashMap<String, String>) -> (String, bool) {
    let mut ok = true;
    let resolved = ENV_PLACEHOLDER.replace_all(value, |caps: &regex::Captures<'_>| {
        match env_map.get(&caps[1]) {
            Some(bound) => bound.clone(),
            None => {
                ok = false;
                caps[0].to_string()
            }
        }
    });
    (resolved.into_owned(), ok)
}

fn resolve_map(
    values: &HashMap<String, String>,
    env_map: &HashMap<String, String>,
    all_ok: &mut bool,
) -> HashMap<String, String> {
    values
        .iter()
        .map(|(k, v)| {
            let (resolved, ok) = resolve_env_str(v, env_map);
            if !ok {
                *all_ok = false;
            }
            (k.clone(), resolved)
        })
        .collect()
}

/// Resolve every string field of an entry; `None` when any variable is unset.
///
/// Partial substitutions never reach the output: one missing binding drops
/// the whole entry.
fn resolve_entry(entry: ServerEntry, env_map: &HashMap<String, String>) -> Option<ServerEntry> {
    let mut all_ok = true;
    let resolved = match entry {
        ServerEntry::Local(local) => {
            let (command, ok) = resolve_env_str(&local.command, env_map);
            if !ok {
                all_ok = false;
            }
            let args = local
                .args
                .iter()
                .map(|a| {
                    let (resolved, ok) = resolve_env_str(a, env_map);
                    if !ok {
                        all_ok = false;
                    }
                    resolved
                })
                .collect();
            let env = resolve_map(&local.env, env_map, &mut all_ok);
            let cwd = local.cwd.as_deref().map(|c| {
                let (resolved, ok) = resolve_env_str(c, env_map);
                if !ok {
                    all_ok = false;
                }
                resolved
            });
            ServerEntry::Local(LocalServer {
                command,
                args,
                env,
                cwd,
            })
        }
        ServerEntry::Remote(remote) => {
            let (url, ok) = resolve_env_str(&remote.url, env_map);
            if !ok {
                all_ok = false;
            }
            let headers = resolve_map(&remote.headers, env_map, &mut all_ok);
            ServerEntry::Remote(RemoteServer {
                kind: remote.kind,
                url,
                headers,
            })
        }
    };
    all_ok.then_some(resolved)
}

/// Derive a server name from a local command line.
///
/// Inspects the first arg that is neither a flag nor a path, strips a
/// `.py`/`.js` extension, and hyphenates underscores; falls back to the
/// command itself.
fn infer_local_name(command: &str, args: &[String]) -> String {
    let candidate = args.iter().find(|arg| {
        !arg.starts_with('-')
            && !arg.starts_with('/')
            && !arg.starts_with("./")
            && !arg.starts_with("../")
            && !arg.starts_with('~')
            && !(arg.contains('/') && !arg.contains('@'))
    });

    match candidate {
        Some(candidate) => {
            let name = candidate.rsplit('/').next().unwrap_or(candidate);
            let name = name
                .strip_suffix(".py")
                .or_else(|| name.strip_suffix(".js"))
                .unwrap_or(name);
            let name = name.replace('_', "-");
            if name.is_empty() {
                "mcp-server".to_string()
            } else {
                name
            }
        }
        None => command.replace('_', "-"),
    }
}

/// Derive a server name from a remote URL's hostname.
///
/// `mcp.deepwiki.com` names the server `deepwiki`; other hosts use their
/// first label.
fn infer_remote_name(url: &str) -> String {
    let host = url.split("//").nth(1).unwrap_or(url);
    let host = host.split(['/', '?', '#']).next().unwrap_or("");
    let host = host.rsplit('@').next().unwrap_or(host);
    let host = host.split(':').next().unwrap_or("");
    if host.is_empty() {
        return "mcp-remote".to_string();
    }

    let hyphenated = host.replace('.', "-");
    let parts: Vec<&str> = hyphenated.split('-').collect();
    let name = if parts.len() > 2 && parts[0] == "mcp" {
        parts[1]
    } else {
        parts[0]
    };
    if name.is_empty() {
        "mcp-remote".to_string()
    } else {
        name.to_string()
    }
}

/// Pick a unique name for `base`, appending `-2`, `-3`, … on collision.
fn unique_name(
    base: String,
    seen: &mut HashMap<String, u32>,
    servers: &IndexMap<String, ServerEntry>,
) -> String {
    let mut counter = seen.get(&base).copied().unwrap_or(0) + 1;
    seen.insert(base.clone(), counter);
    let mut name = if counter > 1 {
        format!("{base}-{counter}")
    } else {
        base.clone()
    };
    while servers.contains_key(&name) {
        counter += 1;
        seen.insert(base.clone(), counter);
        name = format!("{base}-{counter}");
    }
    name
}

/// Build the name → entry map for the tool-server document.
///
/// The built-in reporter (when a session id is supplied) comes first and
/// never collides. Entries whose `$ENV{…}` references cannot all be resolved
/// are dropped.
pub fn build_server_map(
    specs: &[ToolingSpec],
    env_map: &HashMap<String, String>,
    reporter: Option<&ReporterContext<'_>>,
) -> IndexMap<String, ServerEntry> {
    let mut servers: IndexMap<String, ServerEntry> = IndexMap::new();

    if let Some(ctx) = reporter
        && !ctx.session_id.is_empty()
    {
        let mut env = HashMap::new();
        env.insert(
            "CAD_SERVER_URL".to_string(),
            format!("http://127.0.0.1:{}", ctx.server_port),
        );
        env.insert("CAD_SESSION_ID".to_string(), ctx.session_id.to_string());
        env.insert("CAD_NODE_ID".to_string(), ctx.node_id.to_string());
        servers.insert(
            REPORTER_NAME.to_string(),
            ServerEntry::Local(LocalServer {
                command: REPORTER_COMMAND.to_string(),
                args: Vec::new(),
                env,
                cwd: None,
            }),
        );
    }

    let mut seen: HashMap<String, u32> = HashMap::new();
    for spec in specs {
        let base = match spec.prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => prefix.to_string(),
            _ => match &spec.transport {
                ToolingTransport::Local { command, args, .. } => infer_local_name(command, args),
                ToolingTransport::Remote { url, .. } => infer_remote_name(url),
            },
        };
        let name = unique_name(base, &mut seen, &servers);

        let entry = match &spec.transport {
            ToolingTransport::Local {
                command,
                args,
                env,
                cwd,
            } => ServerEntry::Local(LocalServer {
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
                cwd: cwd.clone(),
            }),
            ToolingTransport::Remote { url, headers } => ServerEntry::Remote(RemoteServer {
                kind: "http".to_string(),
                url: url.clone(),
                headers: headers.clone(),
            }),
        };

        match resolve_entry(entry, env_map) {
            Some(resolved) => {
                servers.insert(name, resolved);
            }
            None => {
                debug!(server = %name, "dropping tool-server entry with unresolved $ENV references");
            }
        }
    }

    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn local_spec(prefix: Option<&str>, command: &str, args: &[&str]) -> ToolingSpec {
        ToolingSpec {
            prefix: prefix.map(str::to_string),
            transport: ToolingTransport::Local {
                command: command.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                env: HashMap::new(),
                cwd: None,
            },
        }
    }

    fn remote_spec(prefix: Option<&str>, url: &str) -> ToolingSpec {
        ToolingSpec {
            prefix: prefix.map(str::to_string),
            transport: ToolingTransport::Remote {
                url: url.to_string(),
                headers: HashMap::new(),
            },
        }
    }

    #[test]
    fn test_infer_local_name_from_args() {
        assert_eq!(
            infer_local_name("python", &["memory_server.py".to_string()]),
            "memory-server"
        );
        assert_eq!(
            infer_local_name("npx", &["-y".to_string(), "repomix@latest".to_string()]),
            "repomix@latest"
        );
        assert_eq!(
            infer_local_name("node", &["/abs/path/server.js".to_string()]),
            "node"
        );
        assert_eq!(infer_local_name("my_tool", &[]), "my-tool");
    }

    #[test]
    fn test_infer_remote_name_from_hostname() {
        assert_eq!(infer_remote_name("https://mcp.deepwiki.com/mcp"), "deepwiki");
        assert_eq!(infer_remote_name("https://api.example.com/mcp"), "api");
        assert_eq!(infer_remote_name("http://localhost:8080/mcp"), "localhost");
        assert_eq!(infer_remote_name("not a url"), "not a url");
        assert_eq!(infer_remote_name("https:///mcp"), "mcp-remote");
    }

    #[test]
    fn test_env_resolution_totality() {
        let env = env_of(&[("KEY", "secret"), ("HOST", "example.com")]);
        let specs = [local_spec(
            None,
            "srv",
            &["--key", "$ENV{KEY}", "--host", "$ENV{HOST}"],
        )];
        let servers = build_server_map(&specs, &env, None);

        let ServerEntry::Local(local) = &servers["srv"] else {
            panic!("expected local entry");
        };
        assert_eq!(local.args, ["--key", "secret", "--host", "example.com"]);
        for arg in &local.args {
            assert!(!arg.contains("$ENV{"), "unresolved placeholder in {arg}");
        }
    }

    #[test]
    fn test_unresolved_env_drops_entire_entry() {
        let specs = [
            local_spec(None, "srv", &["--key", "$ENV{MISSING_KEY}"]),
            local_spec(None, "kept", &[]),
        ];
        let servers = build_server_map(&specs, &HashMap::new(), None);

        assert!(!servers.contains_key("srv"));
        assert!(servers.contains_key("kept"));
    }

    #[test]
    fn test_partial_resolution_never_reaches_output() {
        let env = env_of(&[("PRESENT", "yes")]);
        let specs = [local_spec(
            None,
            "srv",
            &["$ENV{PRESENT}", "$ENV{ABSENT}"],
        )];
        let servers = build_server_map(&specs, &env, None);
        assert!(servers.is_empty());
    }

    #[test]
    fn test_headers_and_env_values_are_interpolated() {
        let env = env_of(&[("TOKEN", "t0ken")]);
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer $ENV{TOKEN}".to_string());
        let specs = [ToolingSpec {
            prefix: Some("wiki".to_string()),
            transport: ToolingTransport::Remote {
                url: "https://mcp.example.com/mcp".to_string(),
                headers,
            },
        }];
        let servers = build_server_map(&specs, &env, None);

        let ServerEntry::Remote(remote) = &servers["wiki"] else {
            panic!("expected remote entry");
        };
        assert_eq!(remote.headers["Authorization"], "Bearer t0ken");
        assert_eq!(remote.kind, "http");
    }

    #[test]
    fn test_name_collisions_get_numeric_suffixes() {
        let specs = [
            local_spec(Some("search"), "srv-a", &[]),
            local_spec(Some("search"), "srv-b", &[]),
            local_spec(Some("search"), "srv-c", &[]),
        ];
        let servers = build_server_map(&specs, &HashMap::new(), None);
        let names: Vec<_> = servers.keys().cloned().collect();
        assert_eq!(names, ["search", "search-2", "search-3"]);
    }

    #[test]
    fn test_all_names_unique_even_with_explicit_suffix_clash() {
        let specs = [
            local_spec(Some("search-2"), "srv-a", &[]),
            local_spec(Some("search"), "srv-b", &[]),
            local_spec(Some("search"), "srv-c", &[]),
        ];
        let servers = build_server_map(&specs, &HashMap::new(), None);
        let names: std::collections::BTreeSet<_> = servers.keys().cloned().collect();
        assert_eq!(names.len(), servers.len(), "names must be unique");
    }

    #[test]
    fn test_reporter_injected_first_with_bindings() {
        let specs = [local_spec(None, "other", &[])];
        let ctx = ReporterContext {
            node_id: "node-7",
            session_id: "sess-9",
            server_port: 8123,
        };
        let servers = build_server_map(&specs, &HashMap::new(), Some(&ctx));

        let first = servers.keys().next().expect("non-empty");
        assert_eq!(first, REPORTER_NAME);
        let ServerEntry::Local(reporter) = &servers[REPORTER_NAME] else {
            panic!("expected local reporter");
        };
        assert_eq!(reporter.env["CAD_SERVER_URL"], "http://127.0.0.1:8123");
        assert_eq!(reporter.env["CAD_SESSION_ID"], "sess-9");
        assert_eq!(reporter.env["CAD_NODE_ID"], "node-7");
    }

    #[test]
    fn test_reporter_skipped_without_session() {
        let ctx = ReporterContext {
            node_id: "node-7",
            session_id: "",
            server_port: 8123,
        };
        let servers = build_server_map(&[], &HashMap::new(), Some(&ctx));
        assert!(servers.is_empty());
    }

    #[test]
    fn test_prefix_wins_over_inference() {
        let specs = [remote_spec(Some("named"), "https://mcp.deepwiki.com/mcp")];
        let servers = build_server_map(&specs, &HashMap::new(), None);
        assert!(servers.contains_key("named"));
        assert!(!servers.contains_key("deepwiki"));
    }
}
