//! parlor - converse with philosopher personas and unmask the impostor

mod commands;
mod config;
mod personas;
mod retriever;

use clap::Parser;
use futures::StreamExt;
use parlor_agent::{
    FileStore, GameEvent, Orchestrator, PersonaDescriptor, PersonaRegistry, ProviderGenerator,
    ProviderSummarizer, ToolId, TurnEvent,
};
use parlor_ai::{Model, Provider, providers::LlmProvider, providers::openai::OpenAiProvider};
use std::io::{self, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::retriever::KnowledgeRetriever;

const DEFAULT_THREAD: &str = "default";

/// parlor - converse with philosopher personas
#[derive(Parser, Debug)]
#[command(name = "parlor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Persona to talk to (default: the thread's last persona, or socrates)
    #[arg(short, long)]
    persona: Option<String>,

    /// Conversation thread id
    #[arg(short, long)]
    thread: Option<String>,

    /// Send a single message and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Provider (openai, groq, custom)
    #[arg(long)]
    provider: Option<String>,

    /// Model for persona replies
    #[arg(short, long)]
    model: Option<String>,

    /// Reset a thread and exit (the selected thread when no id is given)
    #[arg(long)]
    reset: Option<Option<String>>,

    /// Reset every thread and exit
    #[arg(long)]
    reset_all: bool,

    /// List available personas
    #[arg(long)]
    personas: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn build_model(provider: Provider, id: &str, base_url: Option<&str>) -> Model {
    let model = Model::new(provider, id);
    match base_url {
        Some(url) => model.with_base_url(url),
        None => model,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    let filter = if args.verbose {
        EnvFilter::new("parlor=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let registry = personas::registry(&cfg);

    if args.personas {
        print!("{}", commands::list_personas(&registry));
        return Ok(());
    }

    // Merge config with CLI args (CLI takes precedence)
    let provider_name = args
        .provider
        .or(cfg.provider.clone())
        .unwrap_or_else(|| config::DEFAULT_PROVIDER.to_string())
        .to_lowercase();
    let provider = Provider::parse(&provider_name)
        .ok_or_else(|| anyhow::anyhow!("Unknown provider: {}", provider_name))?;

    let model_id = args
        .model
        .or(cfg.model.clone())
        .unwrap_or_else(|| config::DEFAULT_MODEL.to_string());
    let summary_model_id = cfg
        .summary_model
        .clone()
        .unwrap_or_else(|| config::DEFAULT_SUMMARY_MODEL.to_string());
    let context_model_id = cfg
        .context_summary_model
        .clone()
        .unwrap_or_else(|| summary_model_id.clone());

    let base_url = cfg.base_url.as_deref();
    let model = build_model(provider, &model_id, base_url);
    let summary_model = build_model(provider, &summary_model_id, base_url);
    let context_model = build_model(provider, &context_model_id, base_url);

    let resetting = args.reset_all || args.reset.is_some();
    let api_key = cfg.get_api_key(&provider_name);
    let llm: Arc<dyn LlmProvider> = match OpenAiProvider::for_model(&model, api_key.as_deref()) {
        Ok(provider) => Arc::new(provider),
        // Resetting never calls the model
        Err(_) if resetting => Arc::new(OpenAiProvider::new(String::new())),
        Err(_) => {
            let api_key_var = provider.api_key_env_var().unwrap_or("GROQ_API_KEY");
            eprintln!("Error: No API key found for {}", provider_name);
            eprintln!("Set your API key with: export {}=your-key", api_key_var);
            eprintln!("Or add it to config file: parlor --init-config");
            std::process::exit(1);
        }
    };

    let retriever = match cfg.knowledge_dir() {
        Some(dir) => KnowledgeRetriever::load(&dir, cfg.rag_top_k())?,
        None => {
            tracing::debug!("No knowledge_dir configured; retrieval will find nothing");
            KnowledgeRetriever::from_texts(std::iter::empty(), cfg.rag_top_k())
        }
    };

    let orchestrator = Orchestrator::builder()
        .generator(Arc::new(ProviderGenerator::new(Arc::clone(&llm), model)))
        .retriever(Arc::new(retriever))
        .summarizer(Arc::new(ProviderSummarizer::new(
            Arc::clone(&llm),
            summary_model,
        )))
        .context_summarizer(Arc::new(ProviderSummarizer::new(llm, context_model)))
        .store(Arc::new(FileStore::new(cfg.data_dir())))
        .registry(Arc::new(registry))
        .config(cfg.orchestrator_config())
        .build()?;

    let thread_id = args.thread.unwrap_or_else(|| DEFAULT_THREAD.to_string());

    // Reset and exit
    if args.reset_all {
        let outcome = orchestrator.reset(None).await?;
        println!("Reset {} thread(s).", outcome.details.threads_deleted);
        return Ok(());
    }
    if let Some(target) = args.reset {
        let target = target.unwrap_or_else(|| thread_id.clone());
        reset_thread(&orchestrator, &target).await?;
        return Ok(());
    }

    // Pick the persona: flag, then the thread's last persona, then the default
    let persona_id = match args.persona {
        Some(id) => id,
        None => orchestrator
            .load_state(&thread_id)
            .await?
            .map(|s| s.persona_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| personas::DEFAULT_PERSONA.to_string()),
    };
    let Some(persona) = orchestrator.registry().get(&persona_id) else {
        eprintln!("Unknown persona: {}", persona_id);
        eprint!("{}", commands::list_personas(orchestrator.registry().as_ref()));
        std::process::exit(1);
    };

    // Non-interactive mode
    if let Some(message) = args.command {
        let ok = run_turn(&orchestrator, &thread_id, &persona, &message).await?;
        if !ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    run_interactive(&orchestrator, thread_id, persona).await
}

async fn reset_thread(orchestrator: &Orchestrator, thread_id: &str) -> anyhow::Result<()> {
    let outcome = orchestrator.reset(Some(thread_id)).await?;
    if outcome.deleted {
        println!("Reset thread {}.", thread_id);
    } else {
        println!("Thread {} had no saved state.", thread_id);
    }
    Ok(())
}

/// Stream one turn to the terminal. Returns false if the turn failed.
async fn run_turn(
    orchestrator: &Orchestrator,
    thread_id: &str,
    persona: &PersonaDescriptor,
    message: &str,
) -> anyhow::Result<bool> {
    let cancel = CancellationToken::new();
    let mut events = orchestrator.run_turn_stream(thread_id, message, persona, cancel.clone());

    let printing = async {
        let mut stdout = io::stdout();
        let mut line_open = false;
        let mut ok = false;

        while let Some(event) = events.next().await {
            match event {
                TurnEvent::TextDelta { delta } => {
                    if !line_open {
                        print!("{}: ", persona.name);
                        line_open = true;
                    }
                    print!("{}", delta);
                    stdout.flush()?;
                }
                TurnEvent::MessageEnd { message } => {
                    if line_open {
                        println!();
                        line_open = false;
                    }
                    for call in message.tool_calls() {
                        if ToolId::from_name(call.name) == Some(ToolId::RetrieveContext) {
                            let query = call
                                .arguments
                                .get("query")
                                .and_then(|q| q.as_str())
                                .unwrap_or_default();
                            eprintln!("[{} consults the archives: {}]", persona.name, query);
                        }
                    }
                }
                TurnEvent::ToolCallSkipped {
                    tool_name, reason, ..
                } => {
                    tracing::debug!("Skipped {}: {}", tool_name, reason);
                }
                TurnEvent::CompactionEnd {
                    messages_before,
                    messages_after,
                } => {
                    eprintln!(
                        "[Summarized history: {} -> {} messages]",
                        messages_before, messages_after
                    );
                }
                TurnEvent::TurnEnd { state, .. } => {
                    ok = true;
                    if state.game_event == Some(GameEvent::Victory) {
                        println!();
                        println!("*** VICTORY! You unmasked {}. ***", state.persona_name);
                    }
                }
                TurnEvent::Error { report } => {
                    if line_open {
                        println!();
                        line_open = false;
                    }
                    eprintln!("Error: {}", report.message);
                    if report.retry_safe {
                        eprintln!("(nothing was saved; you can send the message again)");
                    }
                }
                _ => {}
            }
        }
        Ok::<bool, io::Error>(ok)
    };

    tokio::select! {
        result = printing => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            eprintln!("\n[Interrupted]");
            Ok(false)
        }
    }
}

async fn run_interactive(
    orchestrator: &Orchestrator,
    mut thread_id: String,
    mut persona: PersonaDescriptor,
) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!(
            "parlor ({}) thread: {}  /help for commands",
            persona.name, thread_id
        );
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input, orchestrator.registry().as_ref())
        {
            match result {
                commands::CommandResult::SwitchPersona(next) => {
                    println!("Now talking to {}.", next.name);
                    persona = next;
                }
                commands::CommandResult::SwitchThread(next) => {
                    println!("Switched to thread {}.", next);
                    thread_id = next;
                }
                commands::CommandResult::ShowState => {
                    let state = orchestrator.load_state(&thread_id).await?;
                    println!("{}", commands::describe_state(&thread_id, state.as_ref()));
                }
                commands::CommandResult::Reset => {
                    reset_thread(orchestrator, &thread_id).await?;
                }
                commands::CommandResult::ResetAll => {
                    let outcome = orchestrator.reset(None).await?;
                    println!("Reset {} thread(s).", outcome.details.threads_deleted);
                }
                commands::CommandResult::Message(msg) => {
                    println!("{}", msg);
                }
                commands::CommandResult::Exit => {
                    break;
                }
                commands::CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            continue;
        }

        run_turn(orchestrator, &thread_id, &persona, input).await?;
        println!();
    }

    Ok(())
}
