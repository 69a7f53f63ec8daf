pub mod buffer_pool;
mod usage_replacer;
