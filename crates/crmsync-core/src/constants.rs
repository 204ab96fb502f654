//! Shared constants for the sync pipeline and the assignment event stream.

/// Path prefix of every wrapper API resource.
pub const WRAPPER_API_PREFIX: &str = "/api/wrapper/tenants";

/// Page size used when `WRAPPER_PAGE_SIZE` is not set.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound accepted for the wrapper page size.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Hard stop for pagination loops when the upstream keeps reporting more pages.
pub const MAX_PAGES: u32 = 1_000;

/// Error message returned to callers that lose the sync lease race.
pub const SYNC_IN_PROGRESS_MESSAGE: &str = "Sync already in progress";

/// Stream carrying organization-assignment lifecycle events.
pub const ASSIGNMENT_STREAM_KEY: &str = "crm:organization-assignments";

/// Consumer group reading [`ASSIGNMENT_STREAM_KEY`].
pub const ASSIGNMENT_CONSUMER_GROUP: &str = "org-assignment-consumers";

/// Block timeout for a single group read.
pub const ASSIGNMENT_BLOCK_MS: u64 = 5_000;

/// Number of messages requested per group read.
pub const ASSIGNMENT_BATCH_SIZE: usize = 10;

/// Event type prefix used by the upstream publisher.
pub const ASSIGNMENT_EVENT_PREFIX: &str = "organization.assignment.";
