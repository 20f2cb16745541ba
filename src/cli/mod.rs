//! Command-line interface parsing and handling.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::parse_strategy;
use crate::core::aggregator::Aggregator;
use crate::core::chat_client::{ChatClient, PartialUpdate};
use crate::core::config::Config;
use crate::core::transcript::SessionTranscript;

#[derive(Parser)]
#[command(name = "chimera")]
#[command(about = "A terminal chat client that aggregates responses from multiple LLMs")]
#[command(
    long_about = "Chimera sends each chat message to a set of models through an \
OpenRouter-compatible API and combines their replies.\n\n\
Strategies (chosen per message by prefix):\n\
  (none)            Race — first model to finish a complete reply wins\n\
  /series <text>    Chain — each model refines the previous model's reply\n\
  /parallel <text>  Fan-out — all models answer, one synthesizes the results\n\n\
Environment Variables:\n\
  OPENROUTER_API_KEY  API key for the configured endpoint (required)\n\
  CHIMERA_API_KEY     Fallback API key variable\n\
  CHIMERA_LOG         Diagnostic log filter (e.g. chimera=debug)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Comma-separated model ids, overriding the configured roster
    #[arg(short = 'm', long, global = true, value_name = "MODELS")]
    pub models: Option<String>,

    /// Session file to continue, overriding the configured one
    #[arg(short = 's', long, global = true, value_name = "FILE")]
    pub session: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat loop (default)
    Chat,
    /// Send one prompt and print the streamed reply
    Say {
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Set a configuration value (base-url, models, race-policy, session-file)
    Set {
        key: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset { key: String },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    crate::logging::init();
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = Config::load()?;

    match args.command {
        None | Some(Commands::Chat) => run_chat(&config, &args).await,
        Some(Commands::Say { ref prompt }) => run_say(&config, &args, prompt.clone()).await,
        Some(Commands::Set { key, value }) => {
            let mut config = config;
            let message = config.set(&key, value.join(" ").trim())?;
            config.save()?;
            println!("{message}");
            Ok(())
        }
        Some(Commands::Unset { key }) => {
            let mut config = config;
            let message = config.unset(&key)?;
            config.save()?;
            println!("{message}");
            Ok(())
        }
    }
}

fn selected_models(config: &Config, args: &Args) -> Vec<String> {
    match &args.models {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect(),
        None => config.models(),
    }
}

fn build_aggregator(config: &Config) -> Result<Aggregator<ChatClient>, Box<dyn Error>> {
    let client = ChatClient::new(
        config.base_url().to_string(),
        Config::api_key()?,
        config.referer().to_string(),
        config.title().to_string(),
    );
    Ok(Aggregator::new(client)
        .with_retry(config.retry_policy())
        .with_race_policy(config.race_policy()))
}

fn open_transcript(config: &Config, args: &Args) -> Result<SessionTranscript, Box<dyn Error>> {
    match args.session.clone().or_else(|| config.session_file()) {
        Some(path) => SessionTranscript::load(path),
        None => Ok(SessionTranscript::new()),
    }
}

/// Prints streamed partial output, reprinting from scratch when a faster
/// model overtakes the one currently on screen.
struct StreamPrinter {
    model: String,
    last: String,
}

impl StreamPrinter {
    fn new() -> Self {
        Self {
            model: String::new(),
            last: String::new(),
        }
    }

    fn observe(&mut self, update: &PartialUpdate) {
        if update.model != self.model {
            if !self.model.is_empty() {
                println!();
            }
            println!("[{}]", update.model);
            self.model = update.model.clone();
            self.last.clear();
        }
        match update.text.strip_prefix(self.last.as_str()) {
            Some(suffix) => print!("{suffix}"),
            None => print!("\n{}", update.text),
        }
        self.last = update.text.clone();
        let _ = std::io::stdout().flush();
    }
}

async fn run_chat(config: &Config, args: &Args) -> Result<(), Box<dyn Error>> {
    let models = selected_models(config, args);
    let aggregator = build_aggregator(config)?;
    let mut transcript = open_transcript(config, args)?;

    println!("Chimera — models: {}", models.join(", "));
    println!("Prefix a message with /series or /parallel to change strategy. Ctrl-D exits.");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (strategy, prompt) = parse_strategy(input);
        if prompt.trim().is_empty() {
            eprintln!("Usage: /{} <text>", strategy.as_str());
            continue;
        }

        let mut printer = StreamPrinter::new();
        let round = aggregator
            .run_round(&mut transcript, strategy, prompt, &models, &mut |update| {
                printer.observe(update)
            })
            .await;
        match round {
            Ok(result) => println!("\n— {}", result.contributing_model),
            Err(err) => eprintln!("\n❌ {err}"),
        }
    }
    Ok(())
}

async fn run_say(config: &Config, args: &Args, prompt: Vec<String>) -> Result<(), Box<dyn Error>> {
    let input = prompt.join(" ");
    if input.trim().is_empty() {
        eprintln!("Usage: chimera say <prompt>");
        std::process::exit(1);
    }

    let models = selected_models(config, args);
    let aggregator = build_aggregator(config)?;
    let mut transcript = open_transcript(config, args)?;

    let (strategy, prompt) = parse_strategy(&input);
    let mut printer = StreamPrinter::new();
    let round = aggregator
        .run_round(&mut transcript, strategy, prompt, &models, &mut |update| {
            printer.observe(update)
        })
        .await;
    match round {
        Ok(_) => {
            println!();
            Ok(())
        }
        Err(err) => {
            eprintln!("\n❌ {err}");
            std::process::exit(1);
        }
    }
}
