/// QueryProxy demo
///
/// Loads a JSON array of movies into an in-memory store and prints one window
/// of the sorted, filtered proxy as JSON.

use clap::Parser;
use log::info;
use queryproxy::{
    ColumnType, EntityDescriptor, ExprFilter, FilterValue, MemoryStore, ModelProxy, OrderTerm,
    ProxyOptions, Query, QueryModelProxy, Schema, SearchFilter,
};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "queryproxy-demo")]
#[command(about = "Browse JSON fixtures through a query model proxy")]
struct Cli {
    /// JSON array of movie objects
    #[arg(long, default_value = "demos/movies.json")]
    fixtures: PathBuf,
    /// Attribute to sort on
    #[arg(long)]
    sort: Option<String>,
    /// Sort descending
    #[arg(long)]
    desc: bool,
    /// Filter expression, e.g. "rating >= 4 AND genre == 'action'"
    #[arg(long)]
    filter: Option<String>,
    /// Case-insensitive search over the text columns
    #[arg(long)]
    search: Option<String>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    /// Proxy options as JSON, e.g. '{"window": 20}'
    #[arg(long)]
    options: Option<String>,
}

fn movie_descriptor() -> EntityDescriptor {
    let schema = Schema::new(vec![
        ("id".to_string(), ColumnType::Int64, false),
        ("title".to_string(), ColumnType::String, false),
        ("short_description".to_string(), ColumnType::String, true),
        ("release_year".to_string(), ColumnType::Int32, true),
        ("director".to_string(), ColumnType::String, true),
        ("genre".to_string(), ColumnType::String, true),
        ("rating".to_string(), ColumnType::Int32, true),
    ]);
    EntityDescriptor::new("movie", schema, vec!["id".to_string()])
        .with_default_order(vec![OrderTerm::ascending("title")])
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let options = match &cli.options {
        Some(json) => ProxyOptions::from_json(json)?,
        None => ProxyOptions::default(),
    };

    let store = Arc::new(MemoryStore::new());
    let descriptor = store.register(movie_descriptor());
    let loaded = store.load_json("movie", &fs::read_to_string(&cli.fixtures)?)?;
    info!("loaded {} movies from {}", loaded.len(), cli.fixtures.display());

    let mut proxy = QueryModelProxy::new(store.clone(), Query::new("movie"))?.with_options(options);
    if let Some(expression) = &cli.filter {
        proxy.set_filter(Arc::new(ExprFilter::new("filter")), FilterValue::Text(expression.clone()));
    }
    if let Some(text) = &cli.search {
        let columns = descriptor
            .schema()
            .text_columns()
            .into_iter()
            .map(str::to_string)
            .collect();
        proxy.set_filter(Arc::new(SearchFilter::new("search", columns)), FilterValue::Text(text.clone()));
    }
    proxy.sort(cli.sort.as_deref(), cli.desc)?;

    let total = proxy.len()?;
    let rows: Vec<serde_json::Value> = proxy
        .rows(cli.offset, cli.limit)?
        .iter()
        .enumerate()
        .map(|(i, movie)| {
            let mut fields: serde_json::Map<String, serde_json::Value> = movie
                .snapshot()
                .into_iter()
                .map(|(column, value)| (column, value.to_json()))
                .collect();
            fields.insert("row".to_string(), serde_json::json!(cli.offset + i));
            serde_json::Value::Object(fields)
        })
        .collect();

    let output = serde_json::json!({
        "total": total,
        "offset": cli.offset,
        "generation": proxy.generation(),
        "stats": {
            "fetches": store.stats().fetches,
            "counts": store.stats().counts,
        },
        "rows": rows,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
