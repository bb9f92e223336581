pub mod in_memory;
pub mod moltin;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod telegram;
pub mod yandex;
