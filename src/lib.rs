//! Archive scanning and delivery around the `facepick-match` core: engine
//! providers, reference storage, the concurrent workflow and its local
//! filesystem adapters.

pub mod config;
pub mod health;
pub mod local;
pub mod provider;
pub mod storage;
pub mod workflow;

pub use config::Config;
pub use health::EngineHealth;
pub use provider::{
    ArchiveImage, EmbeddingProvider, ImageLocation, ImageSource, MockProvider, OutputSink,
    ProviderError, SubprocessProvider,
};
pub use storage::{ReferenceRecord, ReferenceStore};
pub use workflow::{
    build_reference_set, rank_pool_images, run_archive, ReferenceFace, ReferenceRejection,
    RunOptions, RunReport,
};
