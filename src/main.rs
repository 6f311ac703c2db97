use clap::{Parser, Subcommand};
use log::debug;
use siris::parser::{BlockParser, Parser as _, tokenize, tokenize_expression};
use siris::{BlockId, BlockTree, Options, RenderError, Renderer, Variables, TemplateError};
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "siris")]
#[command(about = "Siris - file templates with blocks, prints and inheritance")]
struct Cli {
    /// Log more (-v for debug, -vv for trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template, or every template under a directory
    Render {
        /// Path to a template file or directory
        path: PathBuf,

        /// Bind a variable (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Load variables from a JSON object
        #[arg(long = "vars", value_name = "FILE.json")]
        vars_file: Option<PathBuf>,

        /// Print the output instead of writing it
        #[arg(long)]
        stdout: bool,

        /// File name part that marks a template
        #[arg(long, default_value = "srs")]
        extension: String,

        /// Maximum extends/include depth
        #[arg(long, default_value_t = 16)]
        max_depth: usize,
    },

    /// Show the block tree of a template
    Tree {
        path: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show lexer tokens of a file, or normalized tokens of an expression
    Tokens {
        #[arg(required_unless_present = "expr")]
        path: Option<PathBuf>,

        /// Normalize this expression instead of lexing a file
        #[arg(long, conflicts_with = "path")]
        expr: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_var(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got `{arg}`")),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Render {
            path,
            vars,
            vars_file,
            stdout,
            extension,
            max_depth,
        } => {
            let variables = load_variables(vars, vars_file.as_deref());
            let options = Options {
                extension,
                max_inheritance_depth: max_depth,
                ..Options::default()
            };
            render_path(&path, &variables, options, stdout);
        }
        Commands::Tree { path, json } => print_tree(&path, json),
        Commands::Tokens { path, expr, json } => print_tokens(path.as_deref(), expr.as_deref(), json),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn report(err: &RenderError) {
    if io::stderr().is_terminal() {
        eprint!("{}", err.render_color());
    } else {
        eprint!("{}", err.render());
    }
}

/// `--vars` file first, then `--var` flags on top
fn load_variables(pairs: Vec<(String, String)>, file: Option<&Path>) -> Variables {
    let mut variables = Variables::new();

    if let Some(file) = file {
        let text = fs::read_to_string(file).unwrap_or_else(|e| fail(format!("{}: {}", file.display(), e)));
        variables = serde_json::from_str(&text)
            .unwrap_or_else(|e| fail(format!("{}: expected a JSON object: {}", file.display(), e)));
    }

    for (name, value) in pairs {
        variables.insert(name, serde_json::Value::String(value));
    }
    debug!("{} variables bound", variables.len());
    variables
}

fn render_path(path: &Path, variables: &Variables, options: Options, stdout: bool) {
    if path.is_file() {
        let mut renderer = Renderer::new(options);
        let start = Instant::now();

        let result = if stdout {
            renderer.render_to_string(path, variables).map(|output| print!("{}", output))
        } else {
            renderer.render(path, variables).map(|target| print_rendered(&target))
        };

        match result {
            Ok(()) if !stdout => print_summary(1, start.elapsed()),
            Ok(()) => {}
            Err(err) => {
                report(&err);
                std::process::exit(1);
            }
        }
    } else if path.is_dir() {
        if stdout {
            fail("--stdout needs a single template, not a directory");
        }
        render_directory(path, variables, options);
    } else {
        fail(format!("{} does not exist", path.display()));
    }
}

fn is_template(path: &Path, extension: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.split('.').skip(1).any(|part| part == extension))
}

fn render_directory(dir: &Path, variables: &Variables, options: Options) {
    let start = Instant::now();
    let extension = options.extension.clone();
    let mut renderer = Renderer::new(options);
    let mut rendered = 0;
    let mut failed = 0;

    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_template(e.path(), &extension))
    {
        match renderer.render(entry.path(), variables) {
            Ok(target) => {
                rendered += 1;
                print_rendered(&target);
            }
            Err(err) => {
                failed += 1;
                report(&err);
            }
        }
    }

    if rendered + failed == 0 {
        fail(format!("no .{} templates found in {}", extension, dir.display()));
    }
    print_summary(rendered, start.elapsed());
    if failed > 0 {
        std::process::exit(1);
    }
}

fn print_tree(path: &Path, json: bool) {
    let (tree, _) = BlockParser::default().parse_file(path).unwrap_or_else(|err| {
        report(&err);
        std::process::exit(1);
    });

    if json {
        match serde_json::to_string_pretty(&tree) {
            Ok(text) => println!("{}", text),
            Err(e) => fail(e),
        }
        return;
    }

    for &root in tree.roots() {
        print_block(&tree, root, 0);
    }
}

fn print_block(tree: &BlockTree, id: BlockId, depth: usize) {
    let block = &tree[id];
    println!("{}{} {} [{}]", "  ".repeat(depth), block.node, block.id, block.loc);
    for &child in tree.children(id) {
        print_block(tree, child, depth + 1);
    }
}

fn print_tokens(path: Option<&Path>, expr: Option<&str>, json: bool) {
    if let Some(expr) = expr {
        let tokens = tokenize_expression(expr).unwrap_or_else(|err: TemplateError| {
            eprint!("{}", err.render(expr, "<expr>"));
            std::process::exit(1);
        });
        if json {
            print_json(&tokens);
        } else {
            for token in &tokens {
                println!("{:>5}  {:<6} {:?}", token.offset, token.kind, token.text);
            }
        }
        return;
    }

    let Some(path) = path else {
        fail("provide a file or --expr");
    };
    let source = fs::read_to_string(path).unwrap_or_else(|e| fail(format!("{}: {}", path.display(), e)));
    let tokens = tokenize(&source);
    if json {
        print_json(&tokens);
    } else {
        for token in &tokens {
            println!("{:>5}  {:<11} {:?}", token.offset, token.kind, token.text);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(text) => println!("{}", text),
        Err(e) => fail(e),
    }
}

fn print_rendered(path: &Path) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("  \x1b[32m✓\x1b[0m {}", path.display());
    } else {
        eprintln!("  ✓ {}", path.display());
    }
}

fn print_summary(count: usize, elapsed: std::time::Duration) {
    let is_tty = io::stderr().is_terminal();
    let time_str = format_duration(elapsed);
    let files_word = if count == 1 { "file" } else { "files" };

    if is_tty {
        eprintln!("\n\x1b[1m✨ Rendered {} {} in {}\x1b[0m", count, files_word, time_str);
    } else {
        eprintln!("\n✨ Rendered {} {} in {}", count, files_word, time_str);
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let micros = d.as_micros();
    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_var() {
        assert_eq!(parse_var("name=World").unwrap(), ("name".to_string(), "World".to_string()));
        assert_eq!(parse_var("eq=a=b").unwrap(), ("eq".to_string(), "a=b".to_string()));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_is_template() {
        assert!(is_template(Path::new("a/index.html.srs"), "srs"));
        assert!(is_template(Path::new("page.srs.txt"), "srs"));
        assert!(!is_template(Path::new("srs"), "srs"));
        assert!(!is_template(Path::new("index.html"), "srs"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(250)), "250μs");
        assert_eq!(format_duration(Duration::from_micros(2500)), "2.5ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
