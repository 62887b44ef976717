use std::io::Write;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::app::{App, KeySource, Overrides};
use crate::error::{PromptError, Result};
use crate::store::Prompt;

pub const COMMANDS_HELP: &str = "COMMANDS:
    generate [--nsfw] [--same-location] [--count N] [--enhance] <prompt...>
                        Stream new variations of a prompt into the library
    vary <id>           Generate variations of a saved prompt
    list [--favorites]  List saved prompts
    show <id>           Show one prompt in full
    favorite <id>       Toggle the favorite mark
    remove <id>         Delete a prompt
    copy <id>           Print only the prompt text
    export <path>       Write prompts and favorites to a JSON backup
    import <path>       Replace prompts and favorites from a JSON backup
    set-key <key>       Store the API key (encrypted)
    settings [--nsfw on|off] [--same-location on|off] [--count N]
                        Show or change generation settings
    status              Show API key source and enhance quota
    shell               Interactive mode (default when no command is given)

    <id> may be any unique prefix of a prompt id, as shown by `list`.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Generate {
        prompt: String,
        overrides: Overrides,
        enhance: bool,
    },
    Vary { id: String },
    List { favorites: bool },
    Show { id: String },
    Favorite { id: String },
    Remove { id: String },
    Copy { id: String },
    Export { path: PathBuf },
    Import { path: PathBuf },
    SetKey { key: String },
    Settings(Overrides),
    Status,
    Help,
    Shell,
}

impl Command {
    /// Parse a command and its arguments (global flags already removed).
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Shell);
        };

        let command = match name.as_str() {
            "generate" | "gen" => {
                let mut overrides = Overrides::default();
                let mut enhance = false;
                let mut words = Vec::new();
                let mut iter = rest.iter();
                while let Some(arg) = iter.next() {
                    match arg.as_str() {
                        "--nsfw" => overrides.nsfw = Some(true),
                        "--same-location" => overrides.same_location = Some(true),
                        "--enhance" => enhance = true,
                        "--count" | "-n" => overrides.count = Some(parse_count(iter.next())?),
                        // everything after `--` is prompt text
                        "--" => words.extend(iter.by_ref().cloned()),
                        _ => words.push(arg.clone()),
                    }
                }
                let prompt = words.join(" ");
                if prompt.trim().is_empty() {
                    return Err(PromptError::InvalidInput("generate needs a prompt".into()));
                }
                Command::Generate {
                    prompt,
                    overrides,
                    enhance,
                }
            }
            "vary" => Command::Vary {
                id: single(name, rest)?,
            },
            "list" | "ls" => match rest {
                [] => Command::List { favorites: false },
                [flag] if flag == "--favorites" || flag == "-f" => Command::List { favorites: true },
                _ => return Err(unexpected(name, rest)),
            },
            "show" => Command::Show {
                id: single(name, rest)?,
            },
            "favorite" | "fav" => Command::Favorite {
                id: single(name, rest)?,
            },
            "remove" | "rm" => Command::Remove {
                id: single(name, rest)?,
            },
            "copy" => Command::Copy {
                id: single(name, rest)?,
            },
            "export" => Command::Export {
                path: PathBuf::from(single(name, rest)?),
            },
            "import" => Command::Import {
                path: PathBuf::from(single(name, rest)?),
            },
            "set-key" => Command::SetKey {
                key: single(name, rest)?,
            },
            "settings" => {
                let mut overrides = Overrides::default();
                let mut iter = rest.iter();
                while let Some(arg) = iter.next() {
                    match arg.as_str() {
                        "--nsfw" => overrides.nsfw = Some(parse_switch(arg, iter.next())?),
                        "--same-location" => {
                            overrides.same_location = Some(parse_switch(arg, iter.next())?)
                        }
                        "--count" | "-n" => overrides.count = Some(parse_count(iter.next())?),
                        _ => return Err(unexpected(name, rest)),
                    }
                }
                Command::Settings(overrides)
            }
            "status" => Command::Status,
            "help" | "--help" | "-h" => Command::Help,
            "shell" => Command::Shell,
            other => {
                return Err(PromptError::InvalidInput(format!(
                    "unknown command `{other}` (try `help`)"
                )));
            }
        };
        Ok(command)
    }
}

fn single(name: &str, rest: &[String]) -> Result<String> {
    match rest {
        [value] => Ok(value.clone()),
        [] => Err(PromptError::InvalidInput(format!("{name} needs an argument"))),
        _ => Err(unexpected(name, rest)),
    }
}

fn unexpected(name: &str, rest: &[String]) -> PromptError {
    PromptError::InvalidInput(format!("unexpected arguments for {name}: {}", rest.join(" ")))
}

fn parse_count(value: Option<&String>) -> Result<u8> {
    let value = value.ok_or_else(|| PromptError::InvalidInput("--count needs a number".into()))?;
    match value.parse::<u8>() {
        Ok(n) if (1..=10).contains(&n) => Ok(n),
        _ => Err(PromptError::InvalidInput(format!(
            "--count must be between 1 and 10, got {value}"
        ))),
    }
}

fn parse_switch(flag: &str, value: Option<&String>) -> Result<bool> {
    match value.map(String::as_str) {
        Some("on" | "true" | "yes") => Ok(true),
        Some("off" | "false" | "no") => Ok(false),
        _ => Err(PromptError::InvalidInput(format!("{flag} expects on or off"))),
    }
}

// -- execution -----------------------------------------------------------

pub async fn execute(app: &mut App, command: Command) -> Result<()> {
    debug!(?command, "executing");
    match command {
        Command::Generate {
            prompt,
            overrides,
            enhance,
        } => {
            let options = app.options(overrides, enhance);
            let report = app
                .generate(&prompt, options, None, |p| print_prompt(p, false))
                .await?;
            finish_generation(report.prompts.len(), report.error)
        }
        Command::Vary { id } => {
            let report = app.vary(&id, |p| print_prompt(p, false)).await?;
            finish_generation(report.prompts.len(), report.error)
        }
        Command::List { favorites } => {
            let library = app.library();
            let prompts: Vec<&Prompt> = if favorites {
                library.favorites()
            } else {
                library.prompts().iter().collect()
            };
            if prompts.is_empty() {
                println!("{}", if favorites { "no favorites yet" } else { "library is empty" });
            }
            for prompt in prompts {
                print_prompt(prompt, library.is_favorite(prompt.id));
            }
            Ok(())
        }
        Command::Show { id } => {
            let prompt = app.find(&id)?;
            print_prompt(prompt, app.library().is_favorite(prompt.id));
            println!("    id:      {}", prompt.id);
            println!("    created: {}", prompt.created_at.format("%Y-%m-%d %H:%M"));
            if let Some(parent) = prompt.parent_id {
                println!("    parent:  {parent}");
            }
            Ok(())
        }
        Command::Favorite { id } => {
            let (prompt, favorite) = app.toggle_favorite(&id)?;
            let verb = if favorite { "added to" } else { "removed from" };
            println!("{} {verb} favorites", short_id(&prompt));
            Ok(())
        }
        Command::Remove { id } => {
            let prompt = app.remove(&id)?;
            println!("removed {}", short_id(&prompt));
            Ok(())
        }
        Command::Copy { id } => {
            println!("{}", app.find(&id)?.content);
            Ok(())
        }
        Command::Export { path } => {
            let count = app.export(&path)?;
            println!("exported {count} prompts to {}", path.display());
            Ok(())
        }
        Command::Import { path } => {
            let count = app.import(&path)?;
            println!("imported {count} prompts from {}", path.display());
            Ok(())
        }
        Command::SetKey { key } => {
            app.set_api_key(&key)?;
            println!("API key saved");
            Ok(())
        }
        Command::Settings(overrides) => {
            let settings = if overrides == Overrides::default() {
                app.library().settings()
            } else {
                app.update_settings(overrides)?
            };
            println!("nsfw:          {}", on_off(settings.nsfw));
            println!("same-location: {}", on_off(settings.same_location));
            println!("count:         {}", settings.num_variations);
            Ok(())
        }
        Command::Status => {
            let key = match app.api_key()? {
                Some((_, KeySource::Env)) => "set (OPENAI_API_KEY)",
                Some((_, KeySource::Stored)) => "set (stored)",
                Some((_, KeySource::Config)) => "set (config file)",
                None => "not set",
            };
            let status = app.limiter_status();
            println!("model:    {}", app.config().model());
            println!("api key:  {key}");
            print!("enhance:  {}/{} used", status.used, status.limit);
            match status.resets_in {
                Some(wait) if status.used > 0 => println!(", window resets in {}s", wait.as_secs().max(1)),
                _ => println!(),
            }
            println!("prompts:  {}", app.library().prompts().len());
            Ok(())
        }
        Command::Help => {
            println!("{COMMANDS_HELP}");
            Ok(())
        }
        Command::Shell => shell(app).await,
    }
}

/// Report how a generation ended.  A stream that failed before producing
/// anything is an error; a partial result is kept and the failure noted.
fn finish_generation(count: usize, error: Option<PromptError>) -> Result<()> {
    match error {
        Some(e) if count == 0 => Err(e),
        Some(e) => {
            eprintln!("generation stopped early after {count} prompts: {e}");
            Ok(())
        }
        None => {
            println!("{count} prompts added");
            Ok(())
        }
    }
}

/// Read commands from stdin until EOF or `quit`.
pub async fn shell(app: &mut App) -> Result<()> {
    println!("nexus-prompt shell. Type `help` for commands, `quit` to leave.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("nexus> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        match args.first().map(String::as_str) {
            None => continue,
            Some("quit" | "exit") => return Ok(()),
            Some(_) => {}
        }

        match Command::parse(&args) {
            Ok(Command::Shell) => println!("already in the shell"),
            Ok(command) => {
                // boxed: execute and shell call each other
                if let Err(e) = Box::pin(execute(app, command)).await {
                    eprintln!("error: {e}");
                }
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
}

// -- output --------------------------------------------------------------

fn short_id(prompt: &Prompt) -> String {
    prompt.id.to_string()[..8].to_string()
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn print_prompt(prompt: &Prompt, favorite: bool) {
    let star = if favorite { "★ " } else { "" };
    println!("{} {star}{}", short_id(prompt), prompt.category);
    println!("    {}", prompt.content);
    if !prompt.description.is_empty() {
        println!("    {}", prompt.description);
    }
    if !prompt.tags.is_empty() {
        let tags: Vec<String> = prompt.tags.iter().map(|t| format!("#{t}")).collect();
        println!("    {}", tags.join(" "));
    }
}
