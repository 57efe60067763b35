//! Wiring: builds a [`RagService`] from [`Config`].
//!
//! The memory backend is loaded from `index.snapshot_path` on start-up and
//! written back by [`App::persist`] after mutating commands. The Chroma
//! backend persists on the server and `persist` is a no-op.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use policy_rag_core::index::{InMemoryIndex, VectorIndex};
use policy_rag_core::RagService;
use tracing::debug;

use crate::chroma::ChromaIndex;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::OpenAiGenerator;

pub struct App {
    pub service: RagService,
    snapshot: Option<Snapshot>,
}

struct Snapshot {
    index: Arc<InMemoryIndex>,
    path: PathBuf,
}

impl App {
    pub fn build(config: &Config) -> Result<Self> {
        let (index, snapshot): (Arc<dyn VectorIndex>, Option<Snapshot>) =
            match config.index.backend.as_str() {
                "chroma" => {
                    debug!(url = %config.index.chroma.url, "using chroma index");
                    (Arc::new(ChromaIndex::new(&config.index.chroma)?), None)
                }
                _ => {
                    let path = config.index.snapshot_path.clone();
                    let memory = Arc::new(InMemoryIndex::load_from(&path).with_context(|| {
                        format!("Failed to load index snapshot {}", path.display())
                    })?);
                    debug!(path = %path.display(), "using in-memory index");
                    (
                        memory.clone(),
                        Some(Snapshot {
                            index: memory,
                            path,
                        }),
                    )
                }
            };

        let embedder = create_embedder(&config.embedding)?;
        let generator = Arc::new(OpenAiGenerator::new(&config.generation)?);
        let service = RagService::new(index, embedder, generator, config.service_config())
            .context("Invalid service configuration")?;

        Ok(Self { service, snapshot })
    }

    /// Write the in-memory index back to its snapshot file.
    pub fn persist(&self) -> Result<()> {
        if let Some(snapshot) = &self.snapshot {
            snapshot.index.save_to(&snapshot.path).with_context(|| {
                format!("Failed to write index snapshot {}", snapshot.path.display())
            })?;
        }
        Ok(())
    }
}
