mod terminal;

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use guide_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use guide_contracts::context::LANDMARK_PLACEHOLDER;
use guide_contracts::events::EventWriter;
use guide_contracts::models::{PresetRegistry, CAPTION, GENERATION};
use guide_contracts::session::ConversationSession;
use guide_engine::config::{config_path_from_env, credential_from_env};
use guide_engine::{
    ConfigOverrides, GuideConfig, GuideReply, HttpTransport, InteractionController,
};
use serde_json::json;

use crate::terminal::TerminalUi;

#[derive(Debug, Parser)]
#[command(
    name = "landmark-guide",
    version,
    about = "Identify a landmark from a photo and chat with a travel guide about it"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: /identify an image, then ask questions.
    Chat(ChatArgs),
    /// Caption a single image and print the landmark.
    Identify(IdentifyArgs),
    /// Identify an image, then ask one question about it.
    Ask(AskArgs),
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Args)]
struct IdentifyArgs {
    #[arg(long)]
    image: PathBuf,
    /// Print the reply as a JSON object.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Args)]
struct AskArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    question: String,
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Default, Args)]
struct CommonArgs {
    /// TOML config file. Falls back to LANDMARK_GUIDE_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Append session events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    caption_model: Option<String>,
    #[arg(long)]
    generation_model: Option<String>,
    #[arg(long)]
    caption_endpoint: Option<String>,
    #[arg(long)]
    generation_endpoint: Option<String>,
    #[arg(long)]
    max_attempts: Option<u32>,
    /// Seconds to wait between attempts.
    #[arg(long)]
    retry_delay: Option<f64>,
    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<f64>,
    #[arg(long)]
    max_new_tokens: Option<u32>,
    #[arg(long)]
    temperature: Option<f64>,
    /// Only send the last N turns to the language model.
    #[arg(long)]
    history_window: Option<usize>,
}

impl CommonArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            caption_model: self.caption_model.clone(),
            caption_endpoint: self.caption_endpoint.clone(),
            generation_model: self.generation_model.clone(),
            generation_endpoint: self.generation_endpoint.clone(),
            max_attempts: self.max_attempts,
            retry_delay_secs: self.retry_delay,
            timeout_secs: self.timeout,
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            history_window: self.history_window,
            strip_prompt_echo: None,
        }
    }
}

/// Exit code for one-shot commands whose reply is a fallback message.
const FALLBACK_EXIT_CODE: i32 = 2;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("landmark-guide error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Identify(args) => run_identify(args),
        Command::Ask(args) => run_ask(args),
    }
}

fn layered_overrides(
    common: &CommonArgs,
    env_config_path: Option<PathBuf>,
    env_layer: ConfigOverrides,
) -> Result<ConfigOverrides> {
    let mut layered = ConfigOverrides::default();
    if let Some(path) = common.config.clone().or(env_config_path) {
        layered = layered.overlay(ConfigOverrides::load(&path)?);
    }
    Ok(layered.overlay(env_layer).overlay(common.overrides()))
}

fn load_config(common: &CommonArgs) -> Result<GuideConfig> {
    let overrides = layered_overrides(common, config_path_from_env(), ConfigOverrides::from_env()?)?;
    let config = GuideConfig::resolve(&overrides, credential_from_env())?;
    for warning in &config.warnings {
        eprintln!("Warning: {warning}");
    }
    Ok(config)
}

fn build_controller(common: &CommonArgs) -> Result<(InteractionController, GuideConfig)> {
    let config = load_config(common)?;
    let session = ConversationSession::new();
    let session_id = session.id().to_string();
    let events = match &common.events {
        Some(path) => EventWriter::new(path.clone(), session_id),
        None => EventWriter::disabled(session_id),
    };
    let transport = Arc::new(HttpTransport::new()?);
    let controller = InteractionController::from_config(&config, transport, events, session)?;
    Ok((controller, config))
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read image {}", path.display()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatFlow {
    Continue,
    Quit,
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let (mut controller, config) = build_controller(&args.common)?;
    let mut ui = TerminalUi::new(io::stdout());

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Landmark guide started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let flow = handle_chat_line(input, &mut controller, &config, &mut ui)?;
        ui.take_error()?;
        if flow == ChatFlow::Quit {
            break;
        }
    }

    Ok(())
}

/// Runs one line of chat input. Per-command problems such as an unreadable
/// image are reported to the user; only event-log failures are returned.
fn handle_chat_line<W: Write>(
    input: &str,
    controller: &mut InteractionController,
    config: &GuideConfig,
    ui: &mut TerminalUi<W>,
) -> Result<ChatFlow> {
    let intent = parse_intent(input);
    match intent.action.as_str() {
        "noop" => {}
        "help" => {
            ui.line(&format!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")));
            ui.line("Anything else is sent to the guide as a question.");
        }
        "identify" => {
            let Some(path_text) = intent.arg_str("path") else {
                ui.line("/identify requires an image path");
                return Ok(ChatFlow::Continue);
            };
            let path = PathBuf::from(path_text);
            if !path.exists() {
                ui.line(&format!(
                    "Identify failed: file not found ({})",
                    path.display()
                ));
                return Ok(ChatFlow::Continue);
            }
            match read_image(&path) {
                Ok(bytes) => {
                    controller.submit_image(&bytes, ui)?;
                }
                Err(err) => ui.line(&format!("Identify failed: {err:#}")),
            }
        }
        "show_landmark" => {
            let snapshot = controller.session().snapshot();
            let landmark = if snapshot.landmark.is_empty() {
                LANDMARK_PLACEHOLDER
            } else {
                snapshot.landmark
            };
            ui.line(&format!("Landmark: {landmark}"));
        }
        "show_history" => {
            ui.print_history(controller.session().snapshot().transcript);
        }
        "list_models" => print_presets(config, ui),
        "quit" => return Ok(ChatFlow::Quit),
        "message" => {
            if let Some(message) = intent.message.as_deref() {
                controller.submit_message(message, ui)?;
            }
        }
        _ => {
            let command = intent.arg_str("command").unwrap_or("?");
            ui.line(&format!(
                "Unknown command /{command}. Type /help for commands."
            ));
        }
    }
    Ok(ChatFlow::Continue)
}

fn print_presets<W: Write>(config: &GuideConfig, ui: &mut TerminalUi<W>) {
    let registry = PresetRegistry::default();
    for (capability, active) in [
        (CAPTION, config.caption.preset.as_deref()),
        (GENERATION, config.generation.preset.as_deref()),
    ] {
        ui.line(&format!("{capability} models:"));
        for preset in registry.by_capability(capability) {
            let marker = if active == Some(preset.name.as_str()) {
                "*"
            } else {
                " "
            };
            ui.line(&format!("  {marker} {} ({})", preset.name, preset.model_id));
        }
    }
    if config.caption.preset.is_none() {
        ui.line(&format!("caption endpoint: {}", config.caption.url));
    }
    if config.generation.preset.is_none() {
        ui.line(&format!("generation endpoint: {}", config.generation.url));
    }
}

fn run_identify(args: IdentifyArgs) -> Result<i32> {
    let bytes = read_image(&args.image)?;
    let (mut controller, _) = build_controller(&args.common)?;

    let reply = if args.json {
        let mut quiet = TerminalUi::new(io::sink());
        let reply = controller.submit_image(&bytes, &mut quiet)?;
        print_json_reply(&controller, &reply, None)?;
        reply
    } else {
        let mut ui = TerminalUi::new(io::stdout());
        let reply = controller.submit_image(&bytes, &mut ui)?;
        ui.take_error()?;
        reply
    };
    Ok(exit_code(&[&reply]))
}

fn run_ask(args: AskArgs) -> Result<i32> {
    if args.question.trim().is_empty() {
        bail!("--question must not be blank");
    }
    let bytes = read_image(&args.image)?;
    let (mut controller, _) = build_controller(&args.common)?;

    let mut ui = if args.json {
        TerminalUi::new(Box::new(io::sink()) as Box<dyn Write>)
    } else {
        TerminalUi::new(Box::new(io::stdout()) as Box<dyn Write>)
    };
    let landmark = controller.submit_image(&bytes, &mut ui)?;
    let answer = controller.submit_message(&args.question, &mut ui)?;
    ui.take_error()?;

    let Some(answer) = answer else {
        bail!("--question must not be blank");
    };
    if args.json {
        print_json_reply(&controller, &landmark, Some(&answer))?;
    }
    Ok(exit_code(&[&landmark, &answer]))
}

fn print_json_reply(
    controller: &InteractionController,
    landmark: &GuideReply,
    answer: Option<&GuideReply>,
) -> Result<()> {
    let mut payload = json!({
        "session_id": controller.session().id().to_string(),
        "landmark": landmark.text,
        "landmark_failure": landmark.failure.map(|kind| kind.as_str()),
    });
    if let Some(answer) = answer {
        payload["answer"] = json!(answer.text);
        payload["answer_failure"] = json!(answer.failure.map(|kind| kind.as_str()));
    }
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn exit_code(replies: &[&GuideReply]) -> i32 {
    if replies.iter().any(|reply| reply.is_fallback()) {
        FALLBACK_EXIT_CODE
    } else {
        0
    }
}
