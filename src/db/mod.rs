//! Database layer (Firestore).

pub mod firestore;

pub use firestore::FirestoreDb;

/// Collection names as constants.
pub mod collections {
    /// Per-user settings records (keyed by user id)
    pub const USER_SETTINGS: &str = "user_settings";
}
