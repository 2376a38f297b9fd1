// Lua scripts executed atomically by Redis
//
// Each instrumentation call runs exactly one script so the value update,
// the metadata record and the index membership land together.

use redis::Script;

/// Error reply raised when a histogram is written with foreign buckets
pub const BUCKET_MISMATCH: &str = "MASU_BUCKET_MISMATCH";

/// KEYS: hash, index set. ARGV: field, value, meta json, "set" | "add".
const UPDATE_SERIES: &str = r#"
if ARGV[4] == 'set' then
    redis.call('hset', KEYS[1], ARGV[1], ARGV[2])
else
    redis.call('hincrbyfloat', KEYS[1], ARGV[1], ARGV[2])
end
redis.call('hsetnx', KEYS[1], '__meta', ARGV[3])
redis.call('sadd', KEYS[2], KEYS[1])
return 1
"#;

/// KEYS: hash, index set. ARGV: sum field, bucket field, value, meta json,
/// canonical bucket json.
const UPDATE_HISTOGRAM: &str = r#"
local stored = redis.call('hget', KEYS[1], '__buckets')
if stored and stored ~= ARGV[5] then
    return redis.error_reply('MASU_BUCKET_MISMATCH')
end
redis.call('hincrbyfloat', KEYS[1], ARGV[1], ARGV[3])
redis.call('hincrby', KEYS[1], ARGV[2], 1)
redis.call('hsetnx', KEYS[1], '__meta', ARGV[4])
redis.call('hsetnx', KEYS[1], '__buckets', ARGV[5])
redis.call('sadd', KEYS[2], KEYS[1])
return 1
"#;

/// Scripts are hashed once and sent by SHA, falling back to EVAL on NOSCRIPT
pub struct Scripts {
    pub update_series: Script,
    pub update_histogram: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            update_series: Script::new(UPDATE_SERIES),
            update_histogram: Script::new(UPDATE_HISTOGRAM),
        }
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_have_distinct_hashes() {
        let scripts = Scripts::new();
        assert_ne!(
            scripts.update_series.get_hash(),
            scripts.update_histogram.get_hash()
        );
    }

    #[test]
    fn test_histogram_script_raises_mismatch_marker() {
        assert!(UPDATE_HISTOGRAM.contains(BUCKET_MISMATCH));
    }
}
