pub(crate) fn default_server_url() -> String {
    String::new()
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_cache_dir() -> String {
    ".cache".to_string()
}

pub(crate) fn default_chapter_label() -> String {
    "Chapter {n}".to_string()
}

pub(crate) fn default_chapter_separator() -> String {
    "\n\n".to_string()
}

pub(crate) fn default_log_level() -> crate::config::LogLevel {
    crate::config::LogLevel::Debug
}
