//! Line-oriented session loop.
//!
//! Every line is either a slash command or a player action:
//! - `/help` lists the commands
//! - `/quit` or `/exit` ends the session
//! - `/memory <query>` searches episodic and graph memory
//! - `/context` prints the general memory context
//! - `/reset` clears every memory store
//! - `/dump` prints the graph summary, the archive and the recency buffer

use chronicle_core::{ContextAssembler, MemoryError};
use std::io::{self, BufRead, Write};
use tracing::error;

/// Episodes listed by `/dump`.
const DUMP_EPISODES: usize = 20;

/// A parsed line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Command(Command),
    Action(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Memory(String),
    Context,
    Reset,
    Dump,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Action(line.to_string());
    };

    let (name, rest) = match command.trim().split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command.trim(), ""),
    };
    let command = match name.to_lowercase().as_str() {
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "memory" => Command::Memory(rest.to_string()),
        "context" => Command::Context,
        "reset" => Command::Reset,
        "dump" => Command::Dump,
        other => Command::Unknown(other.to_string()),
    };
    Input::Command(command)
}

fn print_help() {
    println!("Commands:");
    println!("  /help            - Show this help");
    println!("  /exit or /quit   - End the session");
    println!("  /memory <query>  - Query episodic & graph memory");
    println!("  /context         - Print the current memory context");
    println!("  /reset           - Clear all memory and start a new story");
    println!("  /dump            - Print the graph summary, episodic store and working buffer");
}

/// Run the session until `/quit` or end of input.
pub async fn run(memory: &mut ContextAssembler) -> Result<(), MemoryError> {
    println!(
        "I am the Dungeon Master. Type your action or '/help' for commands. \
         You can type start to start the game!"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("\n> ");
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        }

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Command(Command::Quit) => {
                println!("Exiting.");
                break;
            }
            Input::Command(command) => handle_command(memory, command).await?,
            Input::Action(action) => match memory.play_turn(&action).await {
                Ok(narration) => {
                    println!("\n--- DM ---\n");
                    println!("{narration}");
                }
                Err(e) => {
                    error!(error = %e, "turn failed");
                    println!("Error during generation: {e}");
                }
            },
        }
    }
    Ok(())
}

async fn handle_command(
    memory: &mut ContextAssembler,
    command: Command,
) -> Result<(), MemoryError> {
    let preview_len = memory.config().preview_len;
    match command {
        Command::Help => print_help(),
        Command::Quit => {}
        Command::Memory(query) => match memory.query_memory(&query, None).await {
            Ok(report) => println!("{}", report.render(preview_len)),
            Err(e) => println!("[ERROR] Memory query failed: {e}"),
        },
        Command::Context => {
            let context = memory.general_context().await;
            println!("=== World Context ===");
            if context.is_empty() {
                println!("(no context)");
            } else {
                println!("{context}");
            }
        }
        Command::Reset => {
            memory.reset().await?;
            println!("--- All memory has been cleared. A new story can begin. ---");
        }
        Command::Dump => {
            match memory.dump(DUMP_EPISODES).await {
                Ok(report) => println!("{}", report.render(preview_len)),
                Err(e) => println!("[ERROR] Dump failed: {e}"),
            }
            println!("\n=== Working buffer ===");
            for turn in memory.recent_turns().iter() {
                let dm: String = turn.dm_text.chars().take(preview_len).collect();
                println!("- Player: {} | DM: {}", turn.player_text, dm);
            }
        }
        Command::Unknown(_) => println!("Unknown command. Type /help"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("  go north \n"), Input::Action("go north".to_string()));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_input("/help"), Input::Command(Command::Help));
        assert_eq!(parse_input("/QUIT"), Input::Command(Command::Quit));
        assert_eq!(parse_input("/exit"), Input::Command(Command::Quit));
        assert_eq!(parse_input("/context"), Input::Command(Command::Context));
        assert_eq!(parse_input("/reset"), Input::Command(Command::Reset));
        assert_eq!(parse_input("/dump"), Input::Command(Command::Dump));
        assert_eq!(
            parse_input("/fly away"),
            Input::Command(Command::Unknown("fly".to_string()))
        );
    }

    #[test]
    fn test_parse_memory_query() {
        assert_eq!(
            parse_input("/memory the Goblin King"),
            Input::Command(Command::Memory("the Goblin King".to_string()))
        );
        assert_eq!(parse_input("/memory"), Input::Command(Command::Memory(String::new())));
        assert_eq!(
            parse_input("/ memory  cave "),
            Input::Command(Command::Memory("cave".to_string()))
        );
    }
}
