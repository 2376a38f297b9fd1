// Redis store module
//
// Provides cross-host metric storage in Redis. Every write is a single Lua
// script so metadata, index membership and the value update are applied
// together.

pub mod config;
pub mod key;
pub mod scripts;
pub mod store;

pub use config::RedisConfig;
pub use store::RedisStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_import_redis_client() {
        let _phantom: Option<::redis::Client> = None;
    }

    #[test]
    fn test_store_usable_as_trait_object() {
        fn _as_store(store: RedisStore) -> Box<dyn crate::storage::Store> {
            Box::new(store)
        }
    }
}
