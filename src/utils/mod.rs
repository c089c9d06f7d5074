pub mod log_throttle;
pub mod logger;

/// Short, log-safe prefix of a secret token.
pub fn fingerprint(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}…", prefix)
}
