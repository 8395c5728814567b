//! System prompt construction.
//!
//! The prompt lists the registered tools and teaches the model the three
//! call syntaxes the extractor understands.

use super::registry::ToolRegistry;

const SYSTEM_PROMPT_INTRO: &str = "\
You are a helpful assistant running locally on the user's machine. You can use \
tools to inspect and change the system on the user's behalf.";

/// Call-syntax instructions and behavioral rules.
fn system_prompt_rules() -> String {
    let home = dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/home/user".to_string());

    format!("\
To use a tool, reply with exactly ONE tool call in one of these forms:\n\n\
```json\n\
{{\"tool\": \"read_file\", \"params\": {{\"path\": \"{home}/notes.md\"}}}}\n\
```\n\n\
<tool>\n  <name>read_file</name>\n  <params>\n    <path>{home}/notes.md</path>\n  </params>\n</tool>\n\n\
To run a shell command, a ```bash block is enough:\n\n\
```bash\n\
ls -la\n\
```\n\n\
Rules:\n\
1. One tool call per reply. Wait for the result before calling the next tool.\n\
2. Tool results arrive wrapped in <tool_result> tags; failures in <tool_error> tags.\n\
3. Some tools need the user's approval. If a call is denied, do not retry it; \
explain what you would have done instead.\n\
4. When you have everything you need, answer in plain text with no tool call.\n\
5. Use absolute paths (e.g. {home}/Documents). Be concise.")
}

/// Build the default system prompt from the tool registry.
pub fn build_system_prompt(registry: &ToolRegistry) -> String {
    let capabilities = registry.capability_summary();
    let rules = system_prompt_rules();
    format!("{SYSTEM_PROMPT_INTRO}\n\nAvailable tools:\n{capabilities}\n\n{rules}")
}
