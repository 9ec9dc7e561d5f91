// Sommaii CLI — terminal front end for the legal chatbot.
//
//   sommaii login --email a@b.c          (password from SOMMAII_PASSWORD or prompt)
//   sommaii ask --room <id> "คำถาม"      (Ctrl-C stops the answer)
//   sommaii history --room <id> [--json]
//   sommaii rate --room <id> --chat <chat id> dislike --feedback "..."
//   sommaii logout

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{info, warn};
use sommaii::{
    ChatTurn, ClientConfig, EngineError, HttpBackend, Rating, SessionController, TokenStore,
    TurnChange, TurnUpdate,
};
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Parser)]
#[command(name = "sommaii", version, about = "Ask the Sommaii legal chatbot from the terminal")]
struct Cli {
    /// Backend API base URL (overrides config.toml).
    #[arg(long, global = true, env = "SOMMAII_BACKEND_API")]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sign in and store the token pair.
    Login {
        #[arg(long, env = "SOMMAII_EMAIL")]
        email: String,
        #[arg(long, env = "SOMMAII_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Revoke the refresh token and forget stored credentials.
    Logout,
    /// Ask a question and stream the answer.
    Ask {
        #[arg(long)]
        room: String,
        /// Inference model id (defaults to `default_model_id` from config).
        #[arg(long)]
        model: Option<String>,
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Print the stored conversation of a room.
    History {
        #[arg(long)]
        room: String,
        #[arg(long)]
        json: bool,
    },
    /// Rate a stored answer.
    Rate {
        #[arg(long)]
        room: String,
        /// Backend chat id of the answer.
        #[arg(long)]
        chat: String,
        rating: RatingArg,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Print shell completions.
    Completions { shell: Shell },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RatingArg {
    Like,
    Dislike,
}

impl From<RatingArg> for Rating {
    fn from(arg: RatingArg) -> Self {
        match arg {
            RatingArg::Like => Rating::Like,
            RatingArg::Dislike => Rating::Dislike,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "sommaii", &mut io::stdout());
        return Ok(());
    }

    let mut config = ClientConfig::load()?;
    if let Some(url) = cli.backend {
        config.backend_url = url;
        config.validate()?;
    }
    let token_path = config
        .token_path()
        .ok_or_else(|| EngineError::Config("no config directory for the token file".into()))?;
    let tokens = Arc::new(TokenStore::load(token_path)?);
    let backend = Arc::new(HttpBackend::new(&config, tokens)?);

    match cli.command {
        Commands::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt("Password: ")?,
            };
            backend.login(&email, &password).await?;
            println!("Signed in as {}", email);
        }
        Commands::Logout => {
            backend.logout().await?;
            println!("Signed out");
        }
        Commands::Ask { room, model, question } => {
            let model = model
                .or_else(|| config.default_model_id.clone())
                .ok_or("no model: pass --model or set default_model_id in config.toml")?;
            let session = open_session(backend, config);
            ask(&session, &room, &model, &question.join(" ")).await?;
        }
        Commands::History { room, json } => {
            let session = open_session(backend, config);
            session.load_room(&room).await?;
            let turns = session.transcript();
            if json {
                let out = serde_json::to_string_pretty(&turns).map_err(|e| e.to_string())?;
                println!("{}", out);
            } else {
                turns.iter().for_each(print_turn);
            }
        }
        Commands::Rate { room, chat, rating, feedback } => {
            let session = open_session(backend, config);
            session.load_room(&room).await?;
            let turn = session
                .transcript()
                .into_iter()
                .find(|t| t.persistent_id == chat)
                .ok_or_else(|| format!("chat {} not found in room {}", chat, room))?;
            session.rate(turn.correlation_id, rating.into(), feedback).await?;
            println!("Rated {} as {:?}", chat, Rating::from(rating));
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

/// Session sharing the backend's token store, so refreshes made by either
/// side are seen by both.
fn open_session(backend: Arc<HttpBackend>, config: ClientConfig) -> SessionController<HttpBackend> {
    let tokens = Arc::clone(backend.tokens());
    SessionController::new(backend, tokens, config)
}

async fn ask(
    session: &SessionController<HttpBackend>,
    room: &str,
    model: &str,
    question: &str,
) -> Result<(), String> {
    // History decides whether this is the room's first question.
    if let Err(e) = session.load_room(room).await {
        warn!("Could not load history for room {}: {}", room, e);
        session.switch_room(room, Vec::new());
    }

    let mut updates = session.subscribe();
    let asking = session.ask_question(question, model, room);
    tokio::pin!(asking);

    let mut stopping = false;
    let outcome = loop {
        tokio::select! {
            outcome = &mut asking => break outcome?,
            update = updates.recv() => match update {
                Ok(update) => render(&update),
                Err(RecvError::Lagged(n)) => warn!("Dropped {} updates", n),
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                info!("Stopping answer");
                session.stop();
            }
        }
    };
    while let Ok(update) = updates.try_recv() {
        render(&update);
    }
    println!();

    if let Some(turn) = session.turn(outcome.correlation_id) {
        print_references(&turn);
        if turn.stopped_by_user {
            println!("(stopped)");
        }
    }
    if outcome.status.is_done() {
        Ok(())
    } else {
        Err("the question failed".into())
    }
}

fn render(update: &TurnUpdate) {
    match &update.change {
        TurnChange::Fragment(text) => {
            print!("{}", text);
            let _ = io::stdout().flush();
        }
        TurnChange::Failed(reason) => eprintln!("\nFailed: {}", reason),
        _ => {}
    }
}

fn print_turn(turn: &ChatTurn) {
    println!("[{}] {} ({:?})", turn.created_at.format("%Y-%m-%d %H:%M"), turn.persistent_id, turn.status);
    println!("Q: {}", turn.question);
    println!("A: {}", turn.answer_text);
    if let Some(rating) = turn.rating {
        println!("Rating: {:?} {}", rating, turn.feedback.as_deref().unwrap_or(""));
    }
    print_references(turn);
    println!();
}

fn print_references(turn: &ChatTurn) {
    let Some(references) = &turn.law_references else {
        return;
    };
    for r in references {
        println!("  • {} {} ({:.2}) {}", r.law_name, r.law_code, r.score, r.url);
    }
}

fn prompt(label: &str) -> Result<String, String> {
    print!("{}", label);
    io::stdout().flush().map_err(|e| e.to_string())?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| e.to_string())?;
    Ok(line.trim_end().to_string())
}
