//! Broadcast topic names

use crate::Identity;

/// Shared topic every replica subscribes to
pub const CENTRAL_TOPIC: &str = "/zebu";

/// Per-identity topic, for subscribers that only care about one owner
pub fn identity_topic(owner: &Identity) -> String {
    format!("{}/{}", CENTRAL_TOPIC, owner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_topic_layout() {
        let owner = Identity::parse("0xcbd6073f486714e6641bf87c22a9cec25acf5804").unwrap();
        assert_eq!(
            identity_topic(&owner),
            "/zebu/0xCbd6073f486714E6641bf87c22A9CEc25aCf5804"
        );
    }
}
