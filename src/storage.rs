use anyhow::{Context, Result};
use facepick_match::FaceEmbedding;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::STORE_PREFIX;

/// One enrolled reference face for a customer.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: String,
    /// Source image the face came from, for operator messages.
    pub image_name: String,
    pub embedding: FaceEmbedding,
}

/// Per-customer reference store, postcard-serialized on disk.
pub struct ReferenceStore {
    base: PathBuf,
}

impl Default for ReferenceStore {
    fn default() -> Self {
        Self {
            base: STORE_PREFIX.clone(),
        }
    }
}

impl ReferenceStore {
    pub fn at(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn customer_file(&self, customer: &str) -> PathBuf {
        self.base.join(customer).join("references.bin")
    }

    pub fn load_records(&self, customer: &str) -> Result<Vec<ReferenceRecord>> {
        let file = self.customer_file(customer);
        if !file.exists() {
            return Ok(vec![]);
        }
        let data =
            std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
        Ok(postcard::from_bytes(&data)?)
    }

    pub fn save_records(&self, customer: &str, records: &[ReferenceRecord]) -> Result<()> {
        let file = self.customer_file(customer);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = postcard::to_allocvec(records)?;
        std::fs::write(&file, data)?;
        Ok(())
    }

    pub fn append_records(&self, customer: &str, new: Vec<ReferenceRecord>) -> Result<()> {
        let mut records = self.load_records(customer)?;
        records.extend(new);
        self.save_records(customer, &records)
    }

    pub fn purge(&self, customer: &str) -> Result<()> {
        let dir = self.base.join(customer);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("removing {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facepick_match::FaceRegion;

    fn scratch_store() -> ReferenceStore {
        let dir = std::env::temp_dir().join(format!("facepick-store-{}", uuid::Uuid::new_v4()));
        ReferenceStore::at(dir)
    }

    fn record(name: &str) -> ReferenceRecord {
        ReferenceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            image_name: name.to_string(),
            embedding: FaceEmbedding::new(
                (0..16).map(|i| i as f32 / 16.0 - 0.5).collect(),
                FaceRegion::new(0.0, 0.0, 50.0, 50.0),
            ),
        }
    }

    #[test]
    fn round_trip_and_purge() -> Result<()> {
        let store = scratch_store();
        assert!(store.load_records("anna")?.is_empty());

        store.append_records("anna", vec![record("a.jpg")])?;
        store.append_records("anna", vec![record("b.jpg")])?;
        let records = store.load_records("anna")?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].image_name, "a.jpg");

        // Customers are isolated.
        assert!(store.load_records("bob")?.is_empty());

        store.purge("anna")?;
        assert!(store.load_records("anna")?.is_empty());
        Ok(())
    }
}
