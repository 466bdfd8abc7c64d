use std::{
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use grit_grammar::{loader::read_file, CompileOptions, Grammar, GrammarLoader, SearchPaths};
use grit_runtime::{EngineOptions, EventLog, SyntaxEngine};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Grammar file, or the id of a grammar in the include directories
    #[arg(value_name = "GRAMMAR")]
    grammar: String,

    /// Text to process, stdin is read when missing
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Directory to look up grammars in, may be given more than once
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Print the tokens of every pass
    #[arg(long)]
    tokens: bool,

    /// Include skipped matches when printing tokens
    #[arg(long)]
    trivia: bool,

    /// Print the syntax tree of every pass
    #[arg(long)]
    tree: bool,

    /// Print the compiled rules
    #[arg(long)]
    rules: bool,

    /// Print lexer and parser notifications as they happen
    #[arg(long)]
    events: bool,

    /// Maximum of a range quantifier written without one, such as `{2,}`
    #[arg(long, value_name = "N")]
    range_cap: Option<usize>,

    /// Do not run nested passes over retokenized tokens
    #[arg(long)]
    no_retokenize: bool,

    /// Deepest nesting of retokenized blocks
    #[arg(long, value_name = "N", default_value_t = 32)]
    max_depth: usize,

    /// Log level, `RUST_LOG` is used when missing
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:?}");
        std::process::exit(1);
    }
}

struct StdoutSink;

impl std::fmt::Write for StdoutSink {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        use std::io::Write as _;
        std::io::stdout()
            .write_all(s.as_bytes())
            .map_err(|_| std::fmt::Error)
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let level = match level {
        Some(level) => level.to_owned(),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| "WARN".to_owned()),
    };
    let level = log::LevelFilter::from_str(&level)
        .map_err(|_| anyhow!("unknown log level `{level}`"))?;

    simplelog::TermLogger::init(
        level,
        simplelog::ConfigBuilder::new()
            .set_time_format_custom(&[])
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Never,
    )
    .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}

fn load_grammar(args: &Args) -> Result<Grammar> {
    let mut options = CompileOptions::default();
    if let Some(cap) = args.range_cap {
        options.open_range_cap = cap;
    }
    let mut paths = SearchPaths::new(args.include.iter().cloned());

    let path = Path::new(&args.grammar);
    if path.is_file() {
        // imports are looked up next to the file first
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut dirs = vec![dir.to_owned()];
        dirs.extend(paths.dirs().iter().cloned());
        paths = SearchPaths::new(dirs);

        let src = read_file(path)?;
        GrammarLoader::with_options(paths, options)
            .load_str(&src)
            .with_context(|| format!("failed to load grammar from `{}`", path.display()))
    } else {
        if paths.dirs().is_empty() {
            paths.push(".");
        }
        GrammarLoader::with_options(paths, options)
            .load(&args.grammar)
            .with_context(|| format!("failed to load grammar `{}`", args.grammar))
    }
}

fn read_input(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) => Ok(read_file(path)?),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref())?;

    let grammar = load_grammar(&args)?;
    log::info!(
        "loaded grammar {} with {} lexer and {} parser rules",
        grammar.name().unwrap_or("<unnamed>"),
        grammar.lexer_rules().len(),
        grammar.parser_rules().len()
    );
    if grammar.has_errors() {
        log::warn!("some rules could not be compiled and were left out of the grammar");
    }

    if args.rules {
        grammar.display_rules_into(&mut StdoutSink)?;
        println!();
    }

    let text = read_input(args.input.as_deref())?;

    let options = EngineOptions {
        retokenize: !args.no_retokenize,
        max_depth: args.max_depth,
    };
    let engine = SyntaxEngine::with_options(&grammar, options);
    let mut events = EventLog::new();
    let block = engine.process_with(&text, &mut events);

    if args.events {
        for event in events.iter() {
            println!("{event}");
        }
        println!();
    }

    if !args.tokens && !args.tree {
        block.display_into(&mut StdoutSink, &grammar, true)?;
        return Ok(());
    }

    for block in block.walk() {
        println!(
            "block {}..{} depth {}",
            block.offset,
            block.offset + block.text().len(),
            block.depth
        );

        if args.tokens {
            block.tokens.display_into(&mut StdoutSink, args.trivia)?;
        }
        if args.tree {
            block.tree.display_into(&mut StdoutSink, &grammar, 0)?;
        }
        println!();
    }

    Ok(())
}
