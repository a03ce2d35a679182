use clap::{Parser, Subcommand, ValueEnum};
use kerntest::persistence::{DoNothingPersistence, Persistence, SqlitePersistence};
use kerntest::{Test, TestEnvironment, loader, schema};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable listing
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
}

#[derive(Parser)]
#[command(name = "kerntest")]
#[command(about = "Resolves declarative kernel test documents into executable commands")]
#[command(version)]
struct Cli {
    /// Fixtures root holding command templates under commands/
    #[arg(long, global = true, env = "KERNTEST_FIXTURES", default_value = "fixtures")]
    fixtures: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a test document and print its commands
    Resolve {
        /// Path to the test document
        path: PathBuf,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Seed for template randomness (random if omitted)
        #[arg(long)]
        seed: Option<u64>,
        /// Record resolved commands in an SQLite journal
        #[arg(long)]
        journal: Option<PathBuf>,
    },
    /// Parse test documents without resolving them
    Validate {
        /// Path to test documents (file or directory)
        path: PathBuf,
    },
    /// List the command templates in the fixtures root
    Templates,
    /// Scaffold a new test document
    Init {
        /// Output path for the new document
        #[arg(default_value = "tests/example.t")]
        path: PathBuf,
    },
    /// Output the front matter schema
    Schema,
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .init();

    match cli.command {
        Command::Resolve {
            path,
            output,
            seed,
            journal,
        } => {
            let persistence: Arc<dyn Persistence> = match journal {
                Some(ref p) => match SqlitePersistence::open(p) {
                    Ok(j) => Arc::new(j),
                    Err(e) => {
                        eprintln!("Error opening journal {}: {e}", p.display());
                        std::process::exit(1);
                    }
                },
                None => Arc::new(DoNothingPersistence),
            };
            let env = load_environment(&cli.fixtures, persistence);

            let mut test = match loader::load_test(&path) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            };

            let result = match seed {
                Some(seed) => test.instantiate_seeded(&env, seed),
                None => test.instantiate(&env),
            };
            if let Err(e) = result {
                eprintln!("Error resolving {}: {e}", path.display());
                std::process::exit(1);
            }

            match output {
                OutputFormat::Human => print_human(&test),
                OutputFormat::Json => match serde_json::to_string_pretty(&test) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Error serializing {}: {e}", path.display());
                        std::process::exit(1);
                    }
                },
            }
        }
        Command::Validate { path } => {
            let tests = match loader::find_tests(&path) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("Error finding tests: {e}");
                    std::process::exit(1);
                }
            };

            if tests.is_empty() {
                eprintln!("No test documents found at: {}", path.display());
                std::process::exit(1);
            }

            let mut errors = 0;
            for test_path in &tests {
                match loader::load_test(test_path) {
                    Ok(test) => {
                        println!(
                            "✓ {} ({} commands)",
                            test_path.display(),
                            test.commands.len()
                        );
                    }
                    Err(e) => {
                        eprintln!("✗ {e}");
                        errors += 1;
                    }
                }
            }

            if errors > 0 {
                eprintln!("\n{errors} document(s) failed validation");
                std::process::exit(1);
            }
            println!("\nAll {} document(s) valid", tests.len());
        }
        Command::Templates => {
            let env = load_environment(&cli.fixtures, Arc::new(DoNothingPersistence));
            let mut names: Vec<_> = env.commands.values().collect();
            names.sort_by(|a, b| a.name.cmp(&b.name));
            for template in names {
                println!(
                    "{} ({} input, {} output)",
                    template.name,
                    template.input.len(),
                    template.output.len()
                );
            }
        }
        Command::Init { path } => {
            let template = r#"---
name: example
description: An example test document.
# Default timeout in seconds for every command.
timeout: 10.0
# templates:
#   - name: /testbin/mytest
#     output:
#       - text: "{{ args.0 }}"
#         trusted: true
commandoverrides:
  - name: sem1
    timeout: 30.0
---
sem1
$ /testbin/add 70 200
"#;
            if path.exists() {
                eprintln!("Error: file already exists: {}", path.display());
                std::process::exit(1);
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
                && let Err(e) = fs::create_dir_all(parent)
            {
                eprintln!("Error creating directory: {e}");
                std::process::exit(1);
            }
            if let Err(e) = fs::write(&path, template) {
                eprintln!("Error writing file: {e}");
                std::process::exit(1);
            }
            println!("Created: {}", path.display());
        }
        Command::Schema => {
            let schema = schema::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing schema: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Load the fixtures environment, or an empty one if the root does not exist.
fn load_environment(root: &Path, persistence: Arc<dyn Persistence>) -> TestEnvironment {
    if !root.is_dir() {
        debug!(root = %root.display(), "no fixtures root, using an empty environment");
        return TestEnvironment {
            persistence,
            ..TestEnvironment::default()
        };
    }
    match TestEnvironment::new(root, persistence) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("Error loading fixtures: {e}");
            std::process::exit(1);
        }
    }
}

fn print_human(test: &Test) {
    if !test.name.is_empty() {
        println!("{}", test.name);
    }
    for command in &test.commands {
        println!("  {} ({:.1}s)", command.input.line, command.timeout);
        for line in &command.expected_output {
            let marker = if line.trusted { "✓" } else { " " };
            if line.key_name.is_empty() {
                println!("    {marker} {}", line.text);
            } else {
                println!("    {marker} {} [{}]", line.text, line.key_name);
            }
        }
    }
}
