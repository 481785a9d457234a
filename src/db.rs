use anyhow::{Context, Result};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{
    Client, Collection, Database as MongoDatabase,
    bson::{doc, oid::ObjectId},
};
use serde::{Deserialize, Serialize};

use crate::data_models::{DocumentChunk, IndexSnapshot};

/// Collection names as constants for consistency
pub mod collections {
    pub const CHUNKS: &str = "chunks";
}

/// Database wrapper providing connection management and collection access
#[derive(Debug, Clone)]
pub struct Database {
    client: Client,
    db: MongoDatabase,
}

impl Database {
    /// Connects and pings the server so a bad URI fails at startup.
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        let client_options = ClientOptions::parse(uri)
            .await
            .context("Failed to parse MongoDB connection string")?;

        let client =
            Client::with_options(client_options).context("Failed to create MongoDB client")?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .context("Failed to connect to MongoDB")?;

        log::info!("Connected to MongoDB database: {}", db_name);

        let db = client.database(db_name);

        Ok(Self { client, db })
    }

    pub fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Send + Sync,
    {
        self.db.collection(name)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database(&self) -> &MongoDatabase {
        &self.db
    }

    pub fn chunks(&self) -> Collection<ChunkRecord> {
        self.collection(collections::CHUNKS)
    }
}

/// One chunk and its embedding stored together, so the two can never drift
/// out of alignment. `position` is the chunk's slot in the index.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChunkRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub position: i64,
    pub chunk: DocumentChunk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Persists index snapshots as per-chunk records.
pub struct SnapshotRepo {
    db: Database,
    collection: Collection<ChunkRecord>,
}

impl SnapshotRepo {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            collection: db.chunks(),
        }
    }

    /// Replaces whatever was stored with `snapshot`. Records are written to a
    /// staging collection that is then renamed over the live one, so readers
    /// see either the old snapshot or the new one in full.
    pub async fn save(&self, snapshot: &IndexSnapshot) -> Result<usize> {
        let records = to_records(snapshot)?;
        if records.is_empty() {
            self.collection
                .drop()
                .await
                .context("Failed to drop stored chunks")?;
            return Ok(0);
        }

        let staging_name = format!(
            "{}_staging_{}",
            collections::CHUNKS,
            nanoid::nanoid!(6, &nanoid::alphabet::SAFE)
        );
        let staging: Collection<ChunkRecord> = self.db.collection(&staging_name);
        let inserted = match staging.insert_many(&records).await {
            Ok(result) => result.inserted_ids.len(),
            Err(e) => {
                let _ = staging.drop().await;
                return Err(e).context("Failed to insert chunk records");
            }
        };

        let db_name = self.db.database().name();
        let renamed = self
            .db
            .client()
            .database("admin")
            .run_command(doc! {
                "renameCollection": format!("{}.{}", db_name, staging_name),
                "to": format!("{}.{}", db_name, collections::CHUNKS),
                "dropTarget": true,
            })
            .await;
        if let Err(e) = renamed {
            let _ = staging.drop().await;
            return Err(e).context("Failed to swap in staged chunk records");
        }
        log::info!("stored {} chunk records", inserted);
        Ok(inserted)
    }

    /// Names of leftover staging collections from saves that never finished.
    pub async fn staging_collections(&self) -> Result<Vec<String>> {
        let prefix = format!("{}_staging_", collections::CHUNKS);
        let names = self
            .db
            .database()
            .list_collection_names()
            .await
            .context("Failed to list collections")?;
        Ok(names.into_iter().filter(|n| n.starts_with(&prefix)).collect())
    }

    pub async fn load(&self) -> Result<IndexSnapshot> {
        let options = FindOptions::builder().sort(doc! { "position": 1 }).build();
        let records: Vec<ChunkRecord> = self
            .collection
            .find(doc! {})
            .with_options(options)
            .await
            .context("Failed to query chunk records")?
            .try_collect()
            .await
            .context("Failed to collect chunk records")?;
        from_records(records)
    }

    pub async fn count(&self) -> Result<u64> {
        self.collection
            .count_documents(doc! {})
            .await
            .context("Failed to count chunk records")
    }
}

pub fn to_records(snapshot: &IndexSnapshot) -> Result<Vec<ChunkRecord>> {
    if let Some(embeddings) = &snapshot.embeddings {
        anyhow::ensure!(
            embeddings.len() == snapshot.chunks.len(),
            "snapshot has {} chunks but {} embeddings",
            snapshot.chunks.len(),
            embeddings.len()
        );
    }
    Ok(snapshot
        .chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| ChunkRecord {
            id: None,
            position: position as i64,
            chunk: chunk.clone(),
            embedding: snapshot
                .embeddings
                .as_ref()
                .map(|embeddings| embeddings[position].clone()),
        })
        .collect())
}

/// Records must come sorted by position. Embeddings are kept only when every
/// record has one.
pub fn from_records(records: Vec<ChunkRecord>) -> Result<IndexSnapshot> {
    let with_embedding = records.iter().filter(|r| r.embedding.is_some()).count();
    anyhow::ensure!(
        with_embedding == 0 || with_embedding == records.len(),
        "{} of {} stored chunks carry an embedding",
        with_embedding,
        records.len()
    );
    let mut chunks = Vec::with_capacity(records.len());
    let mut embeddings = Vec::with_capacity(with_embedding);
    for record in records {
        chunks.push(record.chunk);
        if let Some(embedding) = record.embedding {
            embeddings.push(embedding);
        }
    }
    Ok(IndexSnapshot {
        embeddings: (with_embedding > 0).then_some(embeddings),
        chunks,
    })
}

// =============================================================================
// Test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TEST_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

    pub fn unique_test_db_name() -> String {
        let count = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        format!("glean_test_{}_{}", nanoid::nanoid!(8, &nanoid::alphabet::SAFE), count)
            .replace('-', "_")
    }

    /// `None` when `MONGO_URI` is not configured, so the caller can skip.
    pub async fn create_test_db() -> Result<Option<(Database, String)>> {
        dotenvy::dotenv().ok();
        let Ok(uri) = std::env::var("MONGO_URI") else {
            return Ok(None);
        };
        let db_name = unique_test_db_name();
        let db = Database::new(&uri, &db_name).await?;
        Ok(Some((db, db_name)))
    }

    pub async fn cleanup_test_db(db: &Database, db_name: &str) -> Result<()> {
        db.client()
            .database(db_name)
            .drop()
            .await
            .context("Failed to drop test database")?;
        Ok(())
    }
}
