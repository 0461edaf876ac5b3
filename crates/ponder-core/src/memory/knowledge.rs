//! Static knowledge files.
//!
//! Accepted shapes:
//!
//! ```json
//! {"source_file": "manual.pdf", "embed_model": "nomic", "chunks": [{"text": "...", "embedding": [..], "metadata": {}}]}
//! [{"content": "...", "embedding": [..]}]
//! ```
//!
//! Chunks without text or without a non-empty embedding are skipped.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PonderError, PonderResult};
use crate::types::{MemoryRecord, Tier};

#[derive(Debug, Deserialize)]
struct RawChunk {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Parse a knowledge document into Static records.
pub fn parse_knowledge(json: &str, loaded_at: DateTime<Utc>) -> PonderResult<Vec<MemoryRecord>> {
    let doc: Value = serde_json::from_str(json)?;

    let (chunks, file_meta) = match doc {
        Value::Array(chunks) => (chunks, HashMap::new()),
        Value::Object(mut map) => {
            let chunks = match map.remove("chunks") {
                Some(Value::Array(chunks)) => chunks,
                _ => {
                    return Err(PonderError::Configuration(
                        "knowledge file object must contain a \"chunks\" array".to_string(),
                    ))
                }
            };
            let file_meta: HashMap<String, Value> = ["source_file", "embed_model"]
                .into_iter()
                .filter_map(|k| map.remove(k).map(|v| (k.to_string(), v)))
                .collect();
            (chunks, file_meta)
        }
        _ => {
            return Err(PonderError::Configuration(
                "knowledge file must be a list of chunks or an object with \"chunks\"".to_string(),
            ))
        }
    };

    let mut records = Vec::with_capacity(chunks.len());
    let mut skipped = 0usize;
    for (index, value) in chunks.into_iter().enumerate() {
        let chunk: RawChunk = match serde_json::from_value(value) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(index, error = %e, "Skipping malformed knowledge chunk");
                skipped += 1;
                continue;
            }
        };
        let text = match chunk.text.or(chunk.content) {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                skipped += 1;
                continue;
            }
        };
        if chunk.embedding.is_empty() {
            skipped += 1;
            continue;
        }

        let mut metadata = file_meta.clone();
        metadata.extend(chunk.metadata);
        metadata.insert("chunk_index".to_string(), Value::from(index));

        records.push(MemoryRecord {
            id: Uuid::new_v4(),
            text,
            timestamp: chunk.timestamp.unwrap_or(loaded_at),
            tier: Tier::Static,
            embedding: Some(chunk.embedding),
            metadata,
        });
    }

    if skipped > 0 {
        warn!(skipped, loaded = records.len(), "Some knowledge chunks were skipped");
    }
    Ok(records)
}

/// Read and parse one knowledge file.
pub fn load_knowledge_file(path: impl AsRef<Path>) -> PonderResult<Vec<MemoryRecord>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse_knowledge(&content, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_format() {
        let json = r#"{
            "source_file": "manual.pdf",
            "chunks": [
                {"text": "Rust has ownership", "embedding": [0.1, 0.2], "metadata": {"page": 3}},
                {"text": "no embedding here"},
                {"content": "content key works", "embedding": [0.3, 0.4]},
                {"text": "bad vector", "embedding": "oops"}
            ]
        }"#;
        let records = parse_knowledge(json, Utc::now()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tier, Tier::Static);
        assert_eq!(records[0].metadata["source_file"], "manual.pdf");
        assert_eq!(records[0].metadata["page"], 3);
        assert_eq!(records[1].text, "content key works");
    }

    #[test]
    fn test_bare_list_format() {
        let json = r#"[{"text": "a", "embedding": [1.0]}, {"text": "", "embedding": [1.0]}]"#;
        let records = parse_knowledge(json, Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_rejects_other_shapes() {
        assert!(parse_knowledge("42", Utc::now()).is_err());
        assert!(parse_knowledge(r#"{"items": []}"#, Utc::now()).is_err());
        assert!(parse_knowledge("not json", Utc::now()).is_err());
    }
}
