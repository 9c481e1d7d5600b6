use chrono::Utc;
use rand::Rng;

const SUFFIX_LEN: usize = 9;

pub fn chat_id() -> String {
    prefixed_id("chat")
}

pub fn file_id() -> String {
    prefixed_id("file")
}

/// `{prefix}_{unix_millis}_{9 random base36 chars}`
fn prefixed_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .filter_map(|_| std::char::from_digit(rng.gen_range(0..36), 36))
        .collect();

    format!("{prefix}_{}_{suffix}", Utc::now().timestamp_millis())
}
