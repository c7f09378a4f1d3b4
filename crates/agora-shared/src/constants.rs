/// Application name
pub const APP_NAME: &str = "Agora";

/// Maximum number of notification deliveries in flight at once
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 5;

/// Minimum gap between two deliveries to the same destination, in milliseconds
pub const DEFAULT_CHANNEL_COOLDOWN_MS: u64 = 1_000;

/// Number of similar past messages attached to a fan-out notification
pub const MAX_SIMILAR_MESSAGES: usize = 3;

/// Notification body is cut to this many characters
pub const NOTIFICATION_BODY_LIMIT: usize = 500;

/// Similar-message excerpts are cut to this many characters
pub const SIMILAR_EXCERPT_LIMIT: usize = 100;

/// Reminder scheduler poll interval in seconds (5 minutes)
pub const DEFAULT_REMINDER_CHECK_INTERVAL_SECS: u64 = 300;

/// How far ahead of its due time a reminder is announced, in hours
pub const DEFAULT_REMINDER_LOOKAHEAD_HOURS: i64 = 24;

/// Maximum attachment size accepted for download (25 MiB)
pub const DEFAULT_MAX_ATTACHMENT_SIZE: usize = 25 * 1024 * 1024;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
