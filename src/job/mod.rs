pub mod events;
pub mod models;
pub mod queue;
pub mod results;
pub mod store;

pub use events::{BroadcastProgressSink, ProgressEvent, ProgressSink};
pub use models::{
    lease_cutoff, AnalysisJob, JobError, JobErrorKind, JobStatus, JobStatusView, JobTransition,
    TransitionError,
};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError};
pub use results::{InMemoryResultStore, NewResult, ResultStore, ResultStoreError, StoredResult};
pub use store::{InMemoryJobStore, JobStore, StoreError};
