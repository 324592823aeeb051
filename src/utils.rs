//! Utility functions for the matchmaking server

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Length of generated room and connection ids
pub const ID_LENGTH: usize = 8;

/// Length of generated connection secrets
pub const SECRET_LENGTH: usize = 16;

/// Generate a random lowercase hex string of the given length
///
/// Lengths above 32 are clamped to 32 (one UUID worth of entropy), which is
/// far beyond what ids and secrets need.
pub fn random_hex(length: usize) -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(length.min(32));
    hex
}

/// Generate a candidate room id; uniqueness is the store's responsibility
pub fn generate_room_id() -> String {
    random_hex(ID_LENGTH)
}

/// Generate a candidate connection id; uniqueness is the identity provider's
/// responsibility
pub fn generate_connection_id() -> String {
    random_hex(ID_LENGTH)
}

/// Generate a connection secret
pub fn generate_secret() -> String {
    random_hex(SECRET_LENGTH)
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_hex_length_and_alphabet() {
        let id = random_hex(8);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let long = random_hex(64);
        assert_eq!(long.len(), 32);
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(generate_room_id(), generate_room_id());
        assert_ne!(generate_connection_id(), generate_connection_id());
        assert_ne!(generate_secret(), generate_secret());
    }

    #[test]
    fn test_secret_is_longer_than_id() {
        assert!(generate_secret().len() > generate_connection_id().len());
    }
}
