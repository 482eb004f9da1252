// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive REPL for the loadstar module loader.
//!
//! Plain input is a whitespace-separated list of module ids to load; dot
//! commands inspect and reconfigure the loader.

use loadstar_loader::{ConfigOptions, LoaderError, ModuleLoader, Value};
use owo_colors::OwoColorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use std::borrow::Cow;
use std::path::PathBuf;
use tokio::runtime::Runtime;

const HISTORY_FILE: &str = ".loadstar_history";
const MAX_HISTORY_SIZE: usize = 1000;

/// REPL commands that can be executed with a dot prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    Clear,
    Version,
    Config,
    Url,
    Defined,
}

impl ReplCommand {
    /// Parse a REPL command from input string
    pub fn parse(input: &str) -> Option<(Self, Option<&str>)> {
        let input = input.trim();
        let rest = input.strip_prefix('.')?;

        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd = parts.next()?.to_lowercase();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        match cmd.as_str() {
            "help" | "h" | "?" => Some((ReplCommand::Help, arg)),
            "exit" | "quit" | "q" => Some((ReplCommand::Exit, arg)),
            "clear" | "cls" => Some((ReplCommand::Clear, arg)),
            "version" | "v" => Some((ReplCommand::Version, arg)),
            "config" | "c" => Some((ReplCommand::Config, arg)),
            "url" | "u" => Some((ReplCommand::Url, arg)),
            "defined" | "d" => Some((ReplCommand::Defined, arg)),
            _ => None,
        }
    }

    /// Get all available commands for help/completion
    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            (".help", "Show this help message"),
            (".exit", "Exit the REPL"),
            (".clear", "Clear the screen"),
            (".version", "Show version information"),
            (".config <json>", "Merge loader options, e.g. {\"baseUrl\": \"lib\"}"),
            (".url <id>", "Show the URL a module id resolves to"),
            (".defined", "List defined and pending modules"),
        ]
    }
}

/// Completion and hints over the dot commands
struct LoadstarHelper {
    commands: Vec<&'static str>,
}

impl LoadstarHelper {
    fn new() -> Self {
        let commands = ReplCommand::all_commands()
            .iter()
            .filter_map(|(usage, _)| usage.split_whitespace().next())
            .collect();
        Self { commands }
    }

    fn matches<'a>(&'a self, word: &'a str) -> impl Iterator<Item = &'static str> + 'a {
        self.commands
            .iter()
            .copied()
            .filter(move |cmd| cmd.starts_with(word) && cmd.len() > word.len())
    }
}

impl Completer for LoadstarHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let word = &line[..pos];
        if !word.starts_with('.') || word.contains(char::is_whitespace) {
            return Ok((pos, vec![]));
        }

        let matches = self
            .matches(word)
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd[word.len()..].to_string(),
            })
            .collect();
        Ok((pos, matches))
    }
}

impl Hinter for LoadstarHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        if pos < line.len() || line.len() < 2 || !line.starts_with('.') {
            return None;
        }
        self.matches(line)
            .next()
            .map(|cmd| (&cmd[line.len()..]).dimmed().to_string())
    }
}

impl Highlighter for LoadstarHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if !line.starts_with('.') {
            return Cow::Borrowed(line);
        }
        match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => Cow::Owned(format!("{} {}", cmd.magenta(), rest)),
            None => Cow::Owned(line.magenta().to_string()),
        }
    }

    fn highlight_char(&self, line: &str, _pos: usize, _forced: bool) -> bool {
        line.starts_with('.')
    }
}

impl Validator for LoadstarHelper {}

impl Helper for LoadstarHelper {}

/// The interactive REPL
pub struct Repl {
    loader: ModuleLoader,
    runtime: Runtime,
    editor: Editor<LoadstarHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Repl {
    /// Create a new REPL around `loader`, driving loads on `runtime`
    pub fn new(loader: ModuleLoader, runtime: Runtime) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(LoadstarHelper::new()));

        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loadstar")
            .join(HISTORY_FILE);

        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.load_history(&history_path);

        Ok(Self {
            loader,
            runtime,
            editor,
            history_path,
        })
    }

    /// Run the REPL main loop
    pub fn run(&mut self) -> rustyline::Result<()> {
        self.print_banner();

        loop {
            let prompt = format!("{} ", "loadstar>".bright_green().bold());

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    if trimmed.starts_with('.') {
                        match ReplCommand::parse(trimmed) {
                            Some((cmd, arg)) => match self.execute_command(cmd, arg) {
                                CommandResult::Continue => continue,
                                CommandResult::Exit => break,
                            },
                            None => {
                                eprintln!(
                                    "{}: unknown command {}",
                                    "Error".red().bold(),
                                    trimmed.cyan()
                                );
                                continue;
                            }
                        }
                    }

                    self.load_and_print(trimmed);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "^D".dimmed());
                    break;
                }
                Err(err) => {
                    eprintln!("{}: {:?}", "Error".red().bold(), err);
                    break;
                }
            }
        }

        let _ = self.editor.save_history(&self.history_path);
        println!();
        Ok(())
    }

    fn print_banner(&self) {
        println!();
        println!(
            "  {} {} {}",
            "loadstar".bright_cyan().bold(),
            "v".dimmed(),
            loadstar_loader::VERSION.bright_yellow()
        );
        println!("  {}", "AMD module loader".dimmed());
        let base = self.loader.base_url();
        if !base.is_empty() {
            println!("  {} {}", "baseUrl".dimmed(), base.cyan());
        }
        println!();
        println!(
            "  {} {} {}",
            "Type module ids to load them, or".dimmed(),
            ".help".cyan(),
            "for commands".dimmed()
        );
        println!();
    }

    fn execute_command(&mut self, cmd: ReplCommand, arg: Option<&str>) -> CommandResult {
        match cmd {
            ReplCommand::Help => self.print_help(),
            ReplCommand::Exit => return CommandResult::Exit,
            ReplCommand::Clear => print!("\x1B[2J\x1B[H"),
            ReplCommand::Version => {
                println!("{}: {}", "loadstar".bright_cyan().bold(), loadstar_loader::VERSION.yellow());
            }
            ReplCommand::Config => match arg {
                Some(json) => match ConfigOptions::from_json(json).and_then(|o| self.loader.config(o)) {
                    Ok(()) => println!("{}", "ok".green()),
                    Err(e) => print_error(&e),
                },
                None => missing_argument(".config", "a JSON object"),
            },
            ReplCommand::Url => match arg {
                Some(id) => match self.loader.to_url(id) {
                    Ok(url) => println!("{}", url.green()),
                    Err(e) => print_error(&e),
                },
                None => missing_argument(".url", "a module id"),
            },
            ReplCommand::Defined => {
                for id in self.loader.defined_modules() {
                    match self.loader.original_id(&id) {
                        Some(original) => {
                            println!("  {} {} {}", "defined".green(), id, format!("({})", original).dimmed())
                        }
                        None => println!("  {} {}", "defined".green(), id),
                    }
                }
                for id in self.loader.pending_modules() {
                    println!("  {} {}", "pending".yellow(), id);
                }
            }
        }
        CommandResult::Continue
    }

    fn print_help(&self) {
        println!();
        println!("{}", "REPL Commands:".white().bold());
        println!();
        for (cmd, desc) in ReplCommand::all_commands() {
            println!("  {:16} {}", cmd.cyan(), desc.dimmed());
        }
        println!();
        println!("{}", "Loading:".white().bold());
        println!();
        println!("  {:16} {}", "a b/c".yellow(), "Load modules a and b/c".dimmed());
        println!();
    }

    fn load_and_print(&mut self, input: &str) {
        let ids: Vec<&str> = input.split_whitespace().collect();
        match self.runtime.block_on(self.loader.load(&ids)) {
            Ok(values) => {
                for (id, value) in ids.iter().zip(&values) {
                    println!("{} {}", id.cyan(), format_value(value));
                }
            }
            Err(e) => print_error(&e),
        }
    }
}

/// Result of executing a REPL command
enum CommandResult {
    Continue,
    Exit,
}

/// Format an exported value for display
fn format_value(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".blue().dimmed().to_string(),
        Value::Null => "null".blue().to_string(),
        Value::Boolean(b) => b.yellow().to_string(),
        Value::Number(n) => n.yellow().to_string(),
        Value::String(s) => format!("'{}'", s).green().to_string(),
        Value::Function(f) => format!("[Function: {}]", f.name()).magenta().to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(&value.to_json()).unwrap_or_else(|_| value.to_string())
        }
    }
}

fn missing_argument(cmd: &str, what: &str) {
    eprintln!(
        "{}: {} {} {}",
        "Error".red().bold(),
        cmd.cyan(),
        "requires".dimmed(),
        what.dimmed()
    );
}

/// Print a loader error, highlighting its kind
fn print_error(error: &LoaderError) {
    let message = error.to_string();
    match message.split_once(':') {
        Some((kind, rest)) => eprintln!("{}:{}", kind.red().bold(), rest),
        None => eprintln!("{}", message.red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repl_command_parse() {
        assert!(matches!(
            ReplCommand::parse(".help"),
            Some((ReplCommand::Help, None))
        ));
        assert!(matches!(
            ReplCommand::parse(".exit"),
            Some((ReplCommand::Exit, None))
        ));
        assert!(matches!(
            ReplCommand::parse(".url  app/main "),
            Some((ReplCommand::Url, Some("app/main")))
        ));
        assert!(matches!(
            ReplCommand::parse(r#".config {"baseUrl": "lib"}"#),
            Some((ReplCommand::Config, Some(r#"{"baseUrl": "lib"}"#)))
        ));
        assert!(ReplCommand::parse(".bogus").is_none());
        assert!(ReplCommand::parse("app/main").is_none());
    }

    #[test]
    fn test_helper_completes_commands() {
        let helper = LoadstarHelper::new();
        let found: Vec<&str> = helper.matches(".d").collect();
        assert_eq!(found, vec![".defined"]);
        assert!(helper.commands.contains(&".config"));
        assert_eq!(helper.matches(".help").count(), 0);
    }

    #[test]
    fn test_format_value_renders_objects_as_json() {
        let object = loadstar_loader::ObjectRef::new();
        object.set("name", "widget");
        let rendered = format_value(&Value::Object(object));
        assert!(rendered.contains("\"name\": \"widget\""));
    }
}
