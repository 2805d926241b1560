//! Seed importer
//!
//! Reads discovered URLs from JSON metadata files and upserts them into the repository.
//! Importing is idempotent: re-seeding refreshes a record's metadata but never touches its
//! fetch history or lease.

use crate::storage::{self, NewSeed, Repository, StorageResult};
use crate::url::normalize_url;
use crate::CrawlError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::{Component, Path};

/// Path components recognised as a source name when a record carries no `lang`
const SOURCE_DIRECTORIES: [&str; 4] = ["enwiki", "ruwiki", "en", "ru"];

/// One discovered URL with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct SeedRecord {
    pub url: String,
    pub source: String,
    pub meta: Map<String, Value>,
}

/// Parses the contents of a seed file
///
/// Accepts a JSON array of records or an object with an `items` array. Entries that are not
/// objects, or lack a non-blank string `url`, are skipped.
pub fn parse_seed_records(content: &str, path: &Path) -> Result<Vec<SeedRecord>, CrawlError> {
    let data: Value = serde_json::from_str(content).map_err(|e| seed_error(path, e))?;

    let entries = match data {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("items") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(seed_error(
                    path,
                    "expected an array of records or an object with an `items` array",
                ))
            }
        },
        _ => {
            return Err(seed_error(
                path,
                "expected an array of records or an object with an `items` array",
            ))
        }
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Object(mut fields) = entry else {
            continue;
        };
        let url = match fields.remove("url") {
            Some(Value::String(url)) if !url.trim().is_empty() => url,
            _ => continue,
        };
        let source = guess_source(path, &fields);
        records.push(SeedRecord {
            url,
            source,
            meta: fields,
        });
    }

    Ok(records)
}

/// Reads and parses one seed file
pub fn read_seed_file(path: &Path) -> Result<Vec<SeedRecord>, CrawlError> {
    let content = std::fs::read_to_string(path).map_err(|e| seed_error(path, e))?;
    parse_seed_records(&content, path)
}

/// Determines the source label of a record
///
/// The record's `lang` wins; otherwise the nearest recognised directory in the seed file's
/// path; otherwise `unknown`.
pub fn guess_source(path: &Path, fields: &Map<String, Value>) -> String {
    if let Some(lang) = fields
        .get("lang")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
    {
        return lang.to_lowercase();
    }

    path.components()
        .rev()
        .filter_map(|component| match component {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .map(str::to_lowercase)
        .find(|name| SOURCE_DIRECTORIES.contains(&name.as_str()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Upserts seeds, returning the number of newly created records
///
/// URLs that do not normalize are skipped.
pub fn import_seeds<R, I>(repo: &mut R, seeds: I) -> StorageResult<usize>
where
    R: Repository + ?Sized,
    I: IntoIterator<Item = SeedRecord>,
{
    import_seeds_at(repo, seeds, storage::now())
}

pub fn import_seeds_at<R, I>(repo: &mut R, seeds: I, now: DateTime<Utc>) -> StorageResult<usize>
where
    R: Repository + ?Sized,
    I: IntoIterator<Item = SeedRecord>,
{
    let mut inserted = 0;

    for seed in seeds {
        let norm_url = normalize_url(&seed.url);
        if norm_url.is_empty() {
            tracing::debug!("Skipping seed with unusable URL: {}", seed.url);
            continue;
        }

        let created = repo.upsert_seed(&NewSeed {
            url: norm_url.clone(),
            norm_url,
            source: seed.source,
            meta: seed.meta,
            seen_at: now,
        })?;
        if created {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Imports every configured seed file, returning the number of newly created records
pub fn import_seed_files<R: Repository + ?Sized>(
    repo: &mut R,
    paths: &[String],
) -> Result<usize, CrawlError> {
    let mut inserted = 0;

    for path in paths {
        let records = read_seed_file(Path::new(path))?;
        let total = records.len();
        let created = import_seeds(repo, records)?;
        tracing::info!(
            "Imported {}: {} records, {} new documents",
            path,
            total,
            created
        );
        inserted += created;
    }

    Ok(inserted)
}

fn seed_error(path: &Path, message: impl ToString) -> CrawlError {
    CrawlError::Seed {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}
