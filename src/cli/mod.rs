//! CLI command implementations.
//!
//! Every command runs against the chain built from configuration and prints
//! one JSON line per emission: the next level's answer first, then each
//! level closer to level 0.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `get` | Read one document by id |
//! | `list` | Read every document matching `--where` clauses |
//! | `put` | Insert or replace documents |
//! | `insert` | Insert new documents |
//! | `update` | Replace documents that must already exist |
//! | `delete` | Delete documents by id |
//! | `clear` | Delete every document |
//! | `levels` | Show the configured chain |
//!
//! # Example Usage
//!
//! ```bash
//! storechain put '{"id": 99, "available": true}'
//! storechain list --where available=true --sort id:desc
//! storechain get 99
//! ```

use crate::config::StoreChainConfig;
use crate::models::{Document, Filter, FilterType, RecordId, SortType, SortingMode};
use crate::store::{Emissions, Store};
use crate::{Error, Result};
use clap::Subcommand;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::io::Write;

/// Available commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Read one document by id.
    Get {
        /// Document id.
        id: RecordId,
    },

    /// List documents.
    List {
        /// Filter clause `field<op>value`, op one of = != > < >= <= (repeatable).
        #[arg(short = 'w', long = "where", value_name = "CLAUSE")]
        clauses: Vec<String>,

        /// Sort rule `field[:asc|:desc]` (repeatable, default `id`).
        #[arg(short, long, value_name = "RULE")]
        sort: Vec<String>,
    },

    /// Insert or replace documents (JSON object or array).
    Put {
        /// Document JSON.
        json: String,
    },

    /// Insert new documents (JSON object or array).
    Insert {
        /// Document JSON.
        json: String,
    },

    /// Replace existing documents (JSON object or array).
    Update {
        /// Document JSON.
        json: String,
    },

    /// Delete documents by id.
    Delete {
        /// Document ids.
        #[arg(required = true)]
        ids: Vec<RecordId>,
    },

    /// Delete every document at every level.
    Clear,

    /// Show the configured levels, level 0 first.
    Levels,
}

/// Runs `command` and writes its output to `out`.
///
/// # Errors
///
/// Returns an error if arguments cannot be parsed, the chain cannot be
/// built, an operation fails, or output cannot be written.
pub async fn run(command: Command, config: &StoreChainConfig, out: &mut impl Write) -> Result<()> {
    if matches!(command, Command::Levels) {
        return print_levels(config, out);
    }

    let chain = config.build_chain()?;
    execute(command, &chain, out).await
}

/// Runs a data command against an already built chain.
///
/// # Errors
///
/// Returns an error if arguments cannot be parsed, an operation fails, or
/// output cannot be written.
pub async fn execute(command: Command, chain: &Store<Document>, out: &mut impl Write) -> Result<()> {
    tracing::debug!(command = ?command, levels = chain.depth(), "running command");

    match command {
        Command::Get { id } => {
            emit(chain.read_by_id(id), out, |found| {
                found.get().map_or(Value::Null, |doc| json!(doc))
            })
            .await
        },
        Command::List { clauses, sort } => {
            let filter = parse_filter(&clauses)?;
            let sort = parse_sort(&sort)?;
            emit(chain.read_all(&filter, &sort), out, |docs| json!(docs)).await
        },
        Command::Put { json } => {
            let docs = parse_documents(&json)?;
            emit(chain.insert_or_update(docs), out, |docs| json!(docs)).await
        },
        Command::Insert { json } => {
            let docs = parse_documents(&json)?;
            emit(chain.insert(docs), out, |docs| json!(docs)).await
        },
        Command::Update { json } => {
            let docs = parse_documents(&json)?;
            warm_next_levels(chain, &docs).await?;
            emit(chain.update(docs), out, |docs| json!(docs)).await
        },
        Command::Delete { ids } => {
            let docs = ids.into_iter().map(Document::new).collect();
            emit(chain.delete(docs), out, |removed| json!({ "removed": removed })).await
        },
        Command::Clear => {
            emit(chain.delete_all(), out, |removed| json!({ "removed": removed })).await
        },
        Command::Levels => Err(Error::InvalidInput(
            "levels does not run against a chain".to_string(),
        )),
    }
}

/// Writes one JSON line per emission, stopping at the first error.
async fn emit<T, F>(mut emissions: Emissions<T>, out: &mut impl Write, render: F) -> Result<()>
where
    T: Send + 'static,
    F: Fn(&T) -> Value,
{
    let mut count = 0usize;
    while let Some(item) = emissions.next().await {
        writeln!(out, "{}", render(&item?)).map_err(|e| Error::operation_failed("write_output", e))?;
        count += 1;
    }
    if count == 0 {
        return Err(Error::EmptyResult {
            operation: emissions.label().to_string(),
        });
    }
    Ok(())
}

/// Reads each document through the chain so the next levels hold whatever
/// level 0 has for it.
///
/// Each run starts with a cold in-memory cache, and a strict update checks
/// existence against the next level only. Ids level 0 does not know stay
/// missing, so the update still fails validation for them.
async fn warm_next_levels(chain: &Store<Document>, docs: &[Document]) -> Result<()> {
    if !chain.has_next() {
        return Ok(());
    }
    for doc in docs {
        chain.read_by_id(doc.id).settle().await?;
    }
    tracing::debug!(records = docs.len(), "warmed next levels before update");
    Ok(())
}

fn print_levels(config: &StoreChainConfig, out: &mut impl Write) -> Result<()> {
    config.validate()?;
    for (index, level) in config.levels.iter().enumerate() {
        let mut line = json!({
            "level": index,
            "name": level.name,
            "backend": level.backend.as_str(),
        });
        if level.backend == crate::config::BackendKind::Sqlite {
            line["path"] = json!(config.database_path(level));
            line["table"] = json!(level.table);
        }
        writeln!(out, "{line}").map_err(|e| Error::operation_failed("write_output", e))?;
    }
    Ok(())
}

/// Parses documents from a JSON object or array of objects.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the text is not a document or a list
/// of documents.
pub fn parse_documents(json: &str) -> Result<Vec<Document>> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::InvalidInput(format!("invalid JSON: {e}")))?;
    let docs = match value {
        Value::Array(_) => serde_json::from_value(value),
        other => serde_json::from_value(other).map(|doc| vec![doc]),
    };
    docs.map_err(|e| Error::InvalidInput(format!("invalid document: {e}")))
}

/// Operators recognized in `--where` clauses, longest first.
const OPERATORS: [(&str, FilterType); 6] = [
    ("!=", FilterType::NotEqual),
    (">=", FilterType::GreaterThanOrEqual),
    ("<=", FilterType::LessThanOrEqual),
    ("=", FilterType::Equal),
    (">", FilterType::GreaterThan),
    ("<", FilterType::LessThan),
];

/// Parses a `field<op>value` clause.
///
/// The value is read as JSON when possible (`30`, `true`, `"x"`), otherwise
/// as a plain string.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if no operator or no field name is found.
pub fn parse_clause(clause: &str) -> Result<(String, FilterType, Value)> {
    let (position, op, filter_type) = OPERATORS
        .iter()
        .filter_map(|(op, filter_type)| clause.find(op).map(|pos| (pos, *op, *filter_type)))
        .min_by_key(|(pos, op, _)| (*pos, std::cmp::Reverse(op.len())))
        .ok_or_else(|| Error::InvalidInput(format!("no operator in clause: {clause}")))?;

    let field = clause[..position].trim();
    if field.is_empty() {
        return Err(Error::InvalidInput(format!("no field in clause: {clause}")));
    }
    let raw = clause[position + op.len()..].trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.to_string(), filter_type, value))
}

/// Combines `--where` clauses into a filter.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a malformed clause.
pub fn parse_filter(clauses: &[String]) -> Result<Filter> {
    clauses.iter().try_fold(Filter::new(), |filter, clause| {
        let (field, filter_type, value) = parse_clause(clause)?;
        Ok(filter.and(field, filter_type, value))
    })
}

/// Parses `field[:asc|:desc]` rules; no rules means the default id order.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an unknown direction.
pub fn parse_sort(rules: &[String]) -> Result<SortingMode> {
    if rules.is_empty() {
        return Ok(SortingMode::default());
    }

    let mut keys = Vec::with_capacity(rules.len());
    let mut directions = Vec::with_capacity(rules.len());
    for rule in rules {
        let (key, direction) = rule.split_once(':').unwrap_or((rule.as_str(), "asc"));
        let direction = match direction.to_ascii_lowercase().as_str() {
            "asc" => SortType::Ascending,
            "desc" => SortType::Descending,
            other => {
                return Err(Error::InvalidInput(format!("unknown sort direction: {other}")));
            },
        };
        keys.push(key.trim());
        directions.push(direction);
    }
    SortingMode::zip(&keys, &directions)
}
