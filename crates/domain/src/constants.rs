//! Fixed limits and the provider/model catalog exposed to clients.

/// Chat history is truncated to this many messages after each turn.
pub const MAX_HISTORY_MESSAGES: usize = 30;

/// Maximum accepted length of a single user message.
pub const MAX_USER_CHARS: usize = 15_000;

/// Maximum attachments held per session.
pub const MAX_ATTACHMENTS: usize = 8;

/// SSE client reconnect delay advertised on the stream.
pub const SSE_RETRY_MS: u64 = 1500;

pub const SUPPORTED_PROVIDERS: [&str; 3] = ["openai", "anthropic", "gemini"];

pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Models offered in the client dropdown, per provider.
pub fn provider_models(provider: &str) -> &'static [&'static str] {
    match provider {
        "openai" => &["gpt-4o-mini", "gpt-4.1-mini", "gpt-4o"],
        "anthropic" => &[
            "claude-opus-4-6",
            "claude-sonnet-4-6",
            "claude-haiku-4-5",
        ],
        "gemini" => &[
            "gemini-1.5-flash-002",
            "gemini-1.5-pro-002",
            "gemini-2.0-flash",
        ],
        _ => &[],
    }
}

/// Ordered fallback models tried when a selected model id is unknown.
pub fn provider_fallback_models(provider: &str) -> &'static [&'static str] {
    // The catalog above doubles as the fallback chain; unknown providers
    // get no fallbacks and fail on the selected id.
    provider_models(provider)
}
