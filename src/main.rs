//! xformshift - XForm schema migration tool
//!
//! Registers forms, stores their answers, and keeps both consistent while
//! the schema evolves: every update is diffed, decided, versioned, backed up
//! and replayed over the stored answers.

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use xformshift::cli::{
    answers, compare, history, init, print_answers_text, print_form_text, print_history_text,
    print_json, print_preview_text, print_restore_text, print_status_text, print_submitted_text,
    print_update_text, register, restore, status, submit, update, Cli, Commands, OutputFormat,
};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Get workspace path
    let root = Path::new(&cli.path);
    let json = cli.format == OutputFormat::Json;

    // Execute command
    match cli.command {
        Commands::Init(args) => {
            init(root, args.force)?;
        }

        Commands::Register(args) => {
            let form = register(root, &args.schema, &args.description)?;
            if json {
                print_json(&form)?;
            } else {
                print_form_text(&form);
            }
        }

        Commands::Submit(args) => {
            let docs = submit(root, &args.form, &args.answers)?;
            if json {
                print_json(&docs)?;
            } else {
                print_submitted_text(&docs);
            }
        }

        Commands::Compare(args) => {
            let preview = compare(root, &args.form, &args.schema, &args.decisions)?;
            if json {
                print_json(&preview)?;
            } else {
                print_preview_text(&preview);
            }
        }

        Commands::Update(args) => {
            let outcome = update(
                root,
                &args.form,
                &args.schema,
                &args.decisions,
                args.no_backup,
            )?;
            if json {
                print_json(&outcome)?;
            } else {
                print_update_text(&outcome);
            }
        }

        Commands::Restore(args) => {
            let report = restore(root, &args.form, args.version, args.last)?;
            if json {
                print_json(&report)?;
            } else {
                print_restore_text(&report);
            }
        }

        Commands::History(args) => {
            let entries = history(root, &args.form)?;
            if json {
                print_json(&entries)?;
            } else {
                print_history_text(&entries);
            }
        }

        Commands::Answers(args) => {
            let docs = answers(root, &args.form)?;
            if json {
                print_json(&docs)?;
            } else {
                print_answers_text(&docs);
            }
        }

        Commands::Status => {
            let report = status(root)?;
            if json {
                print_json(&report)?;
            } else {
                print_status_text(&report);
            }
        }
    }

    Ok(())
}
