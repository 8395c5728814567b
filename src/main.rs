//! `localagent` — interactive console for a locally hosted model.
//!
//! Reads a line, runs one agent turn, prints the answer. Tool calls that need
//! approval are asked on the console. Ctrl-C cancels the running turn.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

use localagent::agent_core::{
    build_system_prompt, Agent, AgentError, ChannelApproval, PermissionRequest,
    PermissionResponse, ToolRegistry,
};
use localagent::builtin_tools::{ExecuteTool, ReadFileTool};
use localagent::config;
use localagent::inference::InferenceClient;

type ConsoleLines = Lines<BufReader<Stdin>>;

const HELP: &str = "\
Commands:
  /clear          forget the conversation (keeps the system prompt)
  /model <name>   switch model
  /models         list models installed on the server
  /temp <t>       set sampling temperature
  /permissions    show tool permission levels
  /quit           exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match localagent::init_tracing() {
        Ok(path) => eprintln!("logging to {}", path.display()),
        Err(e) => eprintln!("warning: file logging disabled: {e}"),
    }

    let config = config::load_or_default().context("failed to load configuration")?;

    let client = Arc::new(
        InferenceClient::new(&config.model.base_url).context("failed to build model client")?,
    );
    match client.health_check().await {
        Ok(true) => tracing::info!(base_url = %client.base_url(), "model server reachable"),
        Ok(false) | Err(_) => {
            tracing::warn!(base_url = %client.base_url(), "model server unreachable at startup");
            eprintln!(
                "warning: no model server at {} (is Ollama running?)",
                client.base_url()
            );
        }
    }

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ExecuteTool::new()));
    registry.register(Arc::new(ReadFileTool));

    let permissions = Arc::new(config.build_permissions());
    let (approval, mut approvals) = ChannelApproval::new(1);
    permissions.set_approval_callback(Arc::new(approval));

    let mut agent = Agent::new(
        client.clone(),
        Arc::new(registry),
        permissions,
        config.loop_config(),
    );

    let system_prompt = match config.agent.system_prompt {
        Some(ref prompt) => prompt.clone(),
        None => build_system_prompt(agent.tools()),
    };
    agent.add_system_message(&system_prompt);

    println!(
        "localagent {} using model {} (type /help for commands)",
        env!("CARGO_PKG_VERSION"),
        agent.config().generation.model
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt("> ")?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            if !run_command(&mut agent, &client, command).await {
                break;
            }
            continue;
        }

        let cancel = CancellationToken::new();
        let turn = agent.process_message(&cancel, input);
        tokio::pin!(turn);

        let outcome = loop {
            tokio::select! {
                res = &mut turn => break res,
                Some(pending) = approvals.recv() => {
                    let response = ask_approval(&pending.request, &mut lines, &cancel).await?;
                    if !pending.respond(response) {
                        tracing::debug!("approval answered after the turn moved on");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                }
            }
        };

        match outcome {
            Ok(answer) => println!("\n{answer}\n"),
            Err(AgentError::Cancelled) => println!("\n(cancelled)\n"),
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                eprintln!("\nerror: {e}\n");
            }
        }
    }

    Ok(())
}

fn prompt(text: &str) -> std::io::Result<()> {
    print!("{text}");
    std::io::stdout().flush()
}

/// Handle a `/command`. Returns `false` when the session should end.
async fn run_command(agent: &mut Agent, client: &InferenceClient, command: &str) -> bool {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "exit" => return false,
        "help" => println!("{HELP}"),
        "clear" => {
            agent.clear_context();
            println!("conversation cleared");
        }
        "model" if !arg.is_empty() => {
            agent.set_model(arg);
            println!("model set to {arg}");
        }
        "models" => match client.list_models().await {
            Ok(models) if models.is_empty() => println!("no models installed"),
            Ok(models) => {
                for model in models {
                    println!("  {model}");
                }
            }
            Err(e) => eprintln!("error: {e}"),
        },
        "temp" => match arg.parse::<f32>() {
            Ok(t) if (0.0..=2.0).contains(&t) => {
                agent.set_temperature(t);
                println!("temperature set to {t}");
            }
            _ => eprintln!("usage: /temp <0.0..2.0>"),
        },
        "permissions" => {
            for policy in agent.permissions().policies() {
                println!(
                    "  {:<16} {:?} ({} remembered)",
                    policy.tool_name,
                    policy.level,
                    policy.remembered.len()
                );
            }
        }
        _ => eprintln!("unknown command: /{command} (try /help)"),
    }
    true
}

/// Ask the user to approve a tool call. Ctrl-C denies and cancels the turn.
async fn ask_approval(
    request: &PermissionRequest,
    lines: &mut ConsoleLines,
    cancel: &CancellationToken,
) -> anyhow::Result<PermissionResponse> {
    println!("\n{}", request.description);
    prompt("Allow? [y]es / [n]o / [a]lways / ne[v]er: ")?;

    let line = tokio::select! {
        line = lines.next_line() => line?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            return Ok(PermissionResponse::deny());
        }
    };

    let answer = line.unwrap_or_default().trim().to_lowercase();
    let response = match answer.as_str() {
        "y" | "yes" => PermissionResponse::allow(),
        "a" | "always" => PermissionResponse::allow_always(),
        "v" | "never" => PermissionResponse::deny_always(),
        _ => PermissionResponse::deny(),
    };
    tracing::info!(
        tool = %request.tool_name,
        granted = response.granted,
        remember = response.remember_me,
        "user answered approval"
    );
    Ok(response)
}
