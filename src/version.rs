/// Build version, taken from `APP_VERSION` at compile time when set (release builds),
/// otherwise the crate version.
pub const VERSION: &str = match option_env!("APP_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// `User-Agent` sent with every probe unless overridden in config.
pub fn default_user_agent() -> String {
    format!("url-monitor/{VERSION}")
}
