/// Application name
pub const APP_NAME: &str = "Parley";

/// Maximum message text length in characters, measured after trimming
pub const MAX_TEXT_LEN: usize = 2000;

/// Default history page size
pub const DEFAULT_PAGE_SIZE: u32 = 30;

/// Upper bound a client may request for a single history page
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default user directory page size
pub const DEFAULT_DIRECTORY_LIMIT: u32 = 50;

/// Idle period after which the client sends typing-stop, in milliseconds
pub const TYPING_IDLE_MS: u64 = 3_000;

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Path prefix under which accepted uploads are retrievable
pub const UPLOAD_URL_PREFIX: &str = "/uploads/";

/// Longest conversation preview, in characters
pub const PREVIEW_LEN: usize = 80;

/// Avatar colours handed out on first sight of a user
pub const AVATAR_PALETTE: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#FFD93D", "#A78BFA", "#FB923C", "#34D399", "#60A5FA", "#F472B6",
];
