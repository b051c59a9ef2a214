//! Runtime configuration.
//!
//! Everything comes from the environment (with `.env` support via dotenvy):
//! `BRAID_DB` for the database path, `BRAID_BASE_URL` / `BRAID_API_KEY` /
//! `BRAID_MODEL` for the generation provider, and the summarizer tunables
//! read by [`SummarizeConfig::from_env`]. A missing provider is a valid
//! configuration; summarization then degrades to a no-op.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::generate::{OpenAiGenerator, StructuredGenerator};
use crate::store::DbHandle;
use crate::summarize::{SummarizationService, SummarizeConfig};

const DEFAULT_DB_PATH: &str = "braid.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub summarize: SummarizeConfig,
}

impl Config {
    /// Load configuration from the environment, reading `.env` first if
    /// present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let db_path = std::env::var("BRAID_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
        Self {
            db_path,
            summarize: SummarizeConfig::from_env(),
        }
    }

    /// Open the database this configuration points at.
    pub fn open_db(&self) -> Result<DbHandle> {
        DbHandle::open(&self.db_path)
    }

    /// The generation capability, if the environment configures one.
    pub fn generator(&self) -> Option<Arc<dyn StructuredGenerator>> {
        OpenAiGenerator::from_env().map(|g| Arc::new(g) as Arc<dyn StructuredGenerator>)
    }

    /// Wire up a summarization service against the given database.
    pub fn summarization_service(&self, db: DbHandle) -> SummarizationService {
        SummarizationService::new(db, self.generator(), self.summarize.clone())
    }
}
