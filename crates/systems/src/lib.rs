pub mod decay;
pub mod health;
pub mod ingest;
pub mod onboarding;
pub mod registry;
pub mod retrieve;
pub mod summarizer;
pub mod sync;
pub mod validator;

pub use decay::{DecayCandidate, DecayEngine, DecayPreview, DecayState, PIN_TEMPERATURE};
pub use health::{HealthCheck, HealthIssue, HealthReport, Severity};
pub use ingest::{IngestState, MemoryIngest};
pub use onboarding::{Onboarding, OnboardingStatus, upsert_sentinel_section};
pub use registry::{System, SystemOutcome, SystemRegistry};
pub use retrieve::{RetrieveDigest, RetrieveOutcome};
pub use summarizer::{Summarizer, SummarizerState, safe_watermark};
pub use sync::{SyncReport, SyncState, WorkspaceSync, sha256_hex};
pub use validator::{
    Risk, RiskKind, RiskSeverity, ValidationInput, ValidationKind, ValidationReport,
    WriteValidator,
};
