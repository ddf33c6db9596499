//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open a configured record store and list books in shelf order.
//! - Seed a small sample shelf when the store is empty.
//!
//! Usage: `bookworm_cli [config.json]`

use bookworm_core::{
    core_version, AttributeValue, Context, Schema, SortKey, SqliteRecordStore, StoreConfig,
    ViewDefinition, BOOK,
};
use log::info;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

const SAMPLE_SHELF: &[(&str, &str, &str, i64)] = &[
    ("Forever", "Pete Hamill", "Fantasy", 4),
    ("Forever", "Judy Blume", "Kids", 3),
    ("The Left Hand of Darkness", "Ursula K. Le Guin", "Fantasy", 5),
];

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    config.init_logging()?;
    println!("bookworm_core version={}", core_version());

    let store = Arc::new(config.open_store()?);
    let mut context = Context::open(store, Schema::bookworm())?;
    let shelf = context.define_view(
        &ViewDefinition::new(&BOOK)
            .sort_by(SortKey::ascending("title"))
            .sort_by(SortKey::ascending("author")),
    )?;

    if shelf.is_empty() {
        seed(&mut context)?;
    }

    for book in context.view_records(&shelf) {
        println!(
            "{} | {} | {} | {}",
            book.display("title"),
            book.display("author"),
            book.display("genre"),
            book.display("rating")
        );
    }
    info!(
        "event=cli_list module=cli status=ok books={}",
        shelf.len()
    );
    Ok(())
}

fn seed(context: &mut Context<SqliteRecordStore>) -> Result<(), Box<dyn Error>> {
    for (title, author, genre, rating) in SAMPLE_SHELF {
        let id = context.create(&BOOK)?;
        context.mutate(id, "title", AttributeValue::text(*title))?;
        context.mutate(id, "author", AttributeValue::text(*author))?;
        context.mutate(id, "genre", AttributeValue::text(*genre))?;
        context.mutate(id, "rating", AttributeValue::Integer(*rating))?;
    }
    let summary = context.save()?;
    info!(
        "event=cli_seed module=cli status=ok inserted={}",
        summary.inserted.len()
    );
    Ok(())
}
