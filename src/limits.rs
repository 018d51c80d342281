// ── Form limits ───────────────────────────────────────────────

/// Shortest first name the reservation form accepts.
pub const MIN_FIRST_NAME_LEN: usize = 3;

/// Longest value accepted for any single text field.
pub const MAX_FIELD_LEN: usize = 255;

/// Longest stay a guest can search for.
pub const MAX_STAY_NIGHTS: i64 = 365;

// ── Admin calendar ────────────────────────────────────────────

/// Widest range the admin calendar renders in one request.
pub const MAX_CALENDAR_DAYS: i64 = 366;

// ── Storage ───────────────────────────────────────────────────

/// Deadline for a single repository call unless configured otherwise.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 3_000;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// ── Mail ──────────────────────────────────────────────────────

/// Messages buffered before the oldest unsent ones are dropped.
pub const DEFAULT_MAIL_QUEUE_CAPACITY: usize = 256;

pub const DEFAULT_MAIL_SEND_TIMEOUT_MS: u64 = 10_000;
