//! sqlvein CLI - column-level SQL lineage extraction

mod args;
mod config;
mod output;

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use sqlvein_core::{EnhanceOptions, Enhancer, ProcedureRun, SqlDialect};

use crate::args::{Args, Command, OutputFormat};
use crate::config::Config;
use crate::output::OutputFormatter;

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(has_errors) => {
            if has_errors {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(2)
        }
    }
}

fn run(args: Args) -> Result<bool> {
    match args.command {
        Command::Query {
            files,
            platform,
            database,
            schema,
            config: config_path,
            no_expand,
            no_aliases,
            max_depth,
            format,
        } => {
            let config = load_config(config_path)?;
            let config = config.merge_with_args(&platform, &database, &schema, &files);

            let enhancer = build_enhancer(&config)?.with_options(EnhanceOptions {
                expand_definitions: !no_expand,
                resolve_aliases: !no_aliases,
                max_depth,
            });

            let query_files = collect_files(&config.files)?;
            if query_files.is_empty() {
                miette::bail!(
                    "No query files specified. Use positional arguments or configure in sqlvein.toml"
                );
            }

            let output_format = resolve_format(&config, format);
            let mut total_errors = 0;

            for query_file in &query_files {
                let content = fs::read_to_string(query_file).into_diagnostic()?;
                let formatter =
                    OutputFormatter::new(output_format, query_file.display().to_string());

                match enhancer.enhance(&content) {
                    Ok(lineage) => {
                        formatter.print_enhanced(&lineage).into_diagnostic()?;
                    }
                    Err(e) => {
                        eprintln!("{}: {}", query_file.display(), e);
                        total_errors += 1;
                    }
                }
            }

            if total_errors > 0 {
                eprintln!();
                eprintln!(
                    "Failed to extract lineage from {} of {} file(s)",
                    total_errors,
                    query_files.len()
                );
            }

            Ok(total_errors > 0)
        }

        Command::Procedure {
            file,
            name,
            platform,
            database,
            schema,
            config: config_path,
            format,
        } => {
            let config = load_config(config_path)?;
            let config = config.merge_with_args(&platform, &database, &schema, &[]);

            let enhancer = build_enhancer(&config)?;

            let procedure_name = name.unwrap_or_else(|| {
                file.file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "procedure".to_string())
            });

            let content = fs::read_to_string(&file).into_diagnostic()?;
            let result = ProcedureRun::new(&procedure_name, &enhancer).process(&content);

            let output_format = resolve_format(&config, format);
            let formatter = OutputFormatter::new(output_format, file.display().to_string());
            formatter.print_procedure(&result).into_diagnostic()?;

            // Procedure processing always returns a result set; node-level
            // failures surface on the records.
            Ok(result.nodes.iter().any(|n| n.error.is_some()))
        }

        Command::Parse { file, platform } => {
            // Parse and display AST (for debugging)
            let content = fs::read_to_string(&file).into_diagnostic()?;

            use sqlparser::parser::Parser;

            let dialect: SqlDialect = platform.parse().map_err(|e: String| miette::miette!(e))?;
            let parser_dialect = dialect.parser_dialect();
            match Parser::parse_sql(parser_dialect.as_ref(), &content) {
                Ok(statements) => {
                    for (i, stmt) in statements.iter().enumerate() {
                        println!("Statement {}:", i + 1);
                        println!("{:#?}", stmt);
                        println!();
                    }
                }
                Err(e) => {
                    eprintln!("Parse error: {}", e);
                    return Ok(true);
                }
            }

            Ok(false)
        }
    }
}

fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        // Load from specified path
        Config::from_file(&path)
    } else {
        // Try to find sqlvein.toml
        Ok(Config::find_and_load()?.unwrap_or_default())
    }
}

fn build_enhancer(config: &Config) -> Result<Enhancer> {
    let platform = config.platform.as_deref().unwrap_or("postgres");
    let dialect: SqlDialect = platform.parse().map_err(|e: String| miette::miette!(e))?;

    Ok(Enhancer::new(platform, dialect)
        .with_defaults(config.database.as_deref(), config.schema.as_deref()))
}

fn collect_files(patterns: &[String]) -> Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        if pattern.contains('*') {
            for path in glob::glob(pattern).into_diagnostic()?.flatten() {
                files.push(path);
            }
        } else {
            files.push(std::path::PathBuf::from(pattern));
        }
    }
    Ok(files)
}

fn resolve_format(config: &Config, cli_format: OutputFormat) -> OutputFormat {
    if cli_format != OutputFormat::Human {
        return cli_format;
    }
    match config.format.as_deref() {
        Some("json") => OutputFormat::Json,
        Some("json-lines") | Some("jsonl") => OutputFormat::JsonLines,
        _ => OutputFormat::Human,
    }
}
