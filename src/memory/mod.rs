//! Persistent storage for the learning loop

pub mod sqlite;

pub use sqlite::{
    pattern_table_name, LearningStore, StoreError, StoreStats, StoredExecution, TableVersion,
    WEIGHTS_TABLE,
};
