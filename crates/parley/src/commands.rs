//! parley command implementations

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info};

use parley_agent::{Agent, CheckResult, ConsoleObserver, LlmFunction, Reply, Tool};
use parley_config::{self, BackendKind, Config};
use parley_memory::MemoryBank;
use parley_provider::{
    AgentUsage, AnthropicBackend, Backend, OpenAiBackend, RequestOptions,
};

/// Options for `parley ask`
pub struct AskOptions {
    pub message: Option<String>,
    pub session: String,
    pub json: bool,
}

/// Options for `parley func`
pub struct FuncOptions {
    pub prompt: String,
    pub shape: Option<String>,
    pub attempts: Option<u32>,
    pub query: String,
}

fn request_options(config: &Config) -> RequestOptions {
    RequestOptions {
        temperature: Some(config.agent.temperature),
        max_tokens: Some(config.agent.max_tokens),
    }
}

/// Backend selected by the config, sharing one HTTP client
fn build_backend(config: &Config) -> Result<Arc<dyn Backend>> {
    let api_key = config.api_key().with_context(|| {
        format!(
            "No API key configured. Set backend.api_key in {} or export {}",
            parley_config::config_path().display(),
            config.backend.kind.api_key_env()
        )
    })?;
    let client = reqwest::Client::new();
    let model = Some(config.default_model());
    let options = request_options(config);

    let backend: Arc<dyn Backend> = match config.backend.kind {
        BackendKind::OpenAi => Arc::new(
            OpenAiBackend::new(client, api_key, config.api_base(), model).with_options(options),
        ),
        BackendKind::Anthropic => Arc::new(
            AnthropicBackend::new(client, api_key, config.api_base(), model)
                .with_options(options),
        ),
    };
    debug!("using {:?} backend, model {}", config.backend.kind, backend.default_model());
    Ok(backend)
}

/// Tool reporting the local date and time
pub fn current_time_tool() -> Tool {
    Tool::no_input(
        "current_time",
        "Get the current local date and time",
        json!({"type": "object", "properties": {}}),
        || async {
            let now = chrono::Local::now();
            Ok(json!({ "message": now.format("%Y-%m-%d %H:%M:%S %Z").to_string() }))
        },
    )
    .with_prompt("Use the current_time tool whenever the answer depends on today's date or time.")
}

/// Shape check used by `parley func`: every top-level field of the shape must be present
pub fn shape_validator(shape: &Value) -> impl Fn(Value) -> CheckResult<Value> + Send + Sync {
    let fields: Vec<String> = shape
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();

    move |value: Value| {
        let Some(object) = value.as_object() else {
            return CheckResult::fail("The answer must be a JSON object.");
        };
        let missing: Vec<&str> = fields
            .iter()
            .filter(|field| !object.contains_key(field.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            CheckResult::Ok(value)
        } else {
            CheckResult::fail(format!(
                "The answer is missing these fields: {}. Reply again with all fields.",
                missing.join(", ")
            ))
        }
    }
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Text(text) => println!("\n◆ {}\n", text),
        Reply::Json(value) => {
            let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            println!("\n{}\n", pretty);
        }
    }
}

/// Initialize config and memory directory
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing parley...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = parley_config::init().await?;

    println!("Config:  {}", parley_config::config_path().display());
    println!("Memory:  {}", parley_config::memory_dir().display());
    println!("Backend: {:?} ({})", config.backend.kind, config.default_model());

    println!("\nNext steps:");
    println!(
        "  1. Add your API key to {} or export {}",
        parley_config::config_path().display(),
        config.backend.kind.api_key_env()
    );
    println!("  2. Start chatting: parley ask -m \"Hello!\"");

    Ok(())
}

/// Show configuration status
pub async fn status_command() -> Result<()> {
    let config_path = parley_config::config_path();
    let memory_dir = parley_config::memory_dir();

    println!("◆ parley status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!(
        "Config:   {} {}",
        config_path.display(),
        if config_path.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );
    println!(
        "Memory:   {} {}",
        memory_dir.display(),
        if memory_dir.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );

    let config = Config::load().await?;
    println!("Backend:  {:?}", config.backend.kind);
    println!("Model:    {}", config.default_model());
    println!(
        "API Key:  {}",
        if config.has_api_key() {
            "[Set]"
        } else {
            "[Missing]"
        }
    );
    println!(
        "Limits:   {} iterations, {} attempts, {} calls per tool",
        config.agent.max_iterations, config.agent.max_attempts, config.agent.tool_call_limit
    );

    if memory_dir.exists() {
        let bank = MemoryBank::new(&memory_dir);
        let sessions = bank.list().await;
        println!("Sessions: {}", sessions.len());
    }

    Ok(())
}

/// Chat with the agent, once or interactively
pub async fn ask_command(options: AskOptions) -> Result<()> {
    let config = Config::load().await?;
    let backend = build_backend(&config)?;

    let bank = Arc::new(MemoryBank::with_max_messages(
        parley_config::memory_dir(),
        config.memory_max_messages(),
    ));
    let memory = bank.memory(options.session.as_str());

    let mut agent = Agent::from_config(backend, &config)
        .with_memory(memory)
        .with_json_reply(options.json)
        .with_tool(current_time_tool());

    if let Some(message) = options.message {
        let reply = agent.ask(message, None).await;
        print_reply(&reply);
        return Ok(());
    }

    println!("◆ Interactive mode, session '{}' (type 'exit' to quit)", options.session);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut usage = AgentUsage::new();
    loop {
        print!("◆ ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let reply = agent.ask(input, Some(&mut usage)).await;
        print_reply(&reply);
    }

    info!("interactive session '{}' ended", options.session);
    println!("{}", usage);

    Ok(())
}

/// Run one validated function call
pub async fn func_command(options: FuncOptions) -> Result<()> {
    let config = Config::load().await?;
    let backend = build_backend(&config)?;

    let mut builder = LlmFunction::builder(backend, options.prompt)
        .options(request_options(&config))
        .max_attempts(options.attempts.unwrap_or(config.agent.max_attempts));

    if let Some(shape) = options.shape {
        let shape: Value = serde_json::from_str(&shape).context("--shape must be valid JSON")?;
        builder = builder.validator(shape_validator(&shape)).shape(shape);
    }
    if !config.logging.is_silent() {
        builder = builder.observer(Arc::new(ConsoleObserver::new(config.logging)));
    }

    let function = builder.build();
    let mut usage = AgentUsage::new();

    match function.call(options.query, Some(&mut usage)).await {
        CheckResult::Ok(value) => {
            match value {
                Value::String(text) => println!("{}", text),
                other => println!("{}", serde_json::to_string_pretty(&other)?),
            }
            if config.logging.print_usage_report {
                eprintln!("{}", usage);
            }
            Ok(())
        }
        CheckResult::Fail(message) => anyhow::bail!("function failed: {}", message),
    }
}
