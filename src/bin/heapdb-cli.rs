//! heapdb-cli - demo driver for the heap file engine.
//!
//! Inserts one fixed demo record, reads it back, and commits, mirroring
//! the shape of the engine's own `__main__` smoke test.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use heapdb::codec::{Field, FieldType};
use heapdb::Controller;

/// Demo driver for the slotted-page heap file engine
#[derive(Parser, Debug)]
#[command(name = "heapdb-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the backing heap file
    #[arg(short, long, default_value = "heap.bin")]
    file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn demo_schema() -> Vec<FieldType> {
    vec![
        FieldType::Int,
        FieldType::VarStr,
        FieldType::Int,
        FieldType::Int,
        FieldType::Int,
        FieldType::Byte,
        FieldType::VarStr,
        FieldType::VarStr,
        FieldType::VarStr,
        FieldType::VarStr,
    ]
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level: Level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let schema = demo_schema();
    let record = vec![
        Field::Int(500),
        Field::VarStr("Alice".into()),
        Field::Int(23),
        Field::Int(12345),
        Field::Int(987654),
        Field::Byte(4),
        Field::VarStr("alice@email.com".into()),
        Field::VarStr("1234567890".into()),
        Field::VarStr("ACME".into()),
        Field::VarStr("Elm St".into()),
    ];

    info!(file = %args.file.display(), "opening heap file");
    let mut controller = Controller::open(&args.file)?;
    controller.insert(&record, &schema)?;

    let read_back = controller.read(500, &schema)?;
    info!(?read_back, "read back record");

    controller.commit()?;
    Ok(())
}
