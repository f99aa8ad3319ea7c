//! Profiles and posts stored as blobs in the content store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{ContentId, Identity, ZebuError, ZebuResult};

/// Older writers encode empty lists as `null`
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A user's profile, addressed by the content id inside their name record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    /// Head of the post chain, empty when the user never posted
    #[serde(rename = "LastPost")]
    pub last_post: ContentId,

    /// Followed identities or names, kept free of duplicates
    #[serde(rename = "Follows", deserialize_with = "null_as_empty")]
    pub follows: Vec<String>,

    /// Head of the liked-posts chunk chain, empty when nothing was liked
    #[serde(rename = "Likes", skip_serializing_if = "ContentId::is_empty")]
    pub likes: ContentId,

    #[serde(rename = "DisplayName")]
    pub display_name: String,

    /// Owner address as written by the profile's author
    #[serde(rename = "PublicName", skip_serializing_if = "String::is_empty")]
    pub public_name: String,

    /// Feed url this profile was imported from
    #[serde(rename = "ImportSource", skip_serializing_if = "String::is_empty")]
    pub import_source: String,
}

impl UserProfile {
    pub fn new() -> Self {
        UserProfile::default()
    }

    /// Follow someone. Returns false if they were already followed.
    pub fn follow(&mut self, who: impl Into<String>) -> bool {
        let who = who.into();
        if self.follows.iter().any(|f| *f == who) {
            return false;
        }
        self.follows.push(who);
        true
    }

    /// Stop following someone. Returns false if they were not followed.
    pub fn unfollow(&mut self, who: &str) -> bool {
        let before = self.follows.len();
        self.follows.retain(|f| f != who);
        self.follows.len() != before
    }

    pub fn is_following(&self, who: &str) -> bool {
        self.follows.iter().any(|f| f == who)
    }

    /// Display name, falling back to the owner's address
    pub fn name(&self, owner: &Identity) -> String {
        if self.display_name.is_empty() {
            owner.to_string()
        } else {
            self.display_name.clone()
        }
    }

    pub fn encode(&self) -> ZebuResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ZebuError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> ZebuResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One immutable entry in a backward-linked post chain
///
/// `created_at` is chosen by the author and cannot be trusted for ordering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Older neighbour in the chain, empty at the tail
    #[serde(rename = "Previous", default)]
    pub previous_id: ContentId,

    /// The post body blob
    #[serde(rename = "Content")]
    pub content_id: ContentId,

    #[serde(rename = "Images", default, deserialize_with = "null_as_empty")]
    pub image_ids: Vec<ContentId>,

    #[serde(rename = "Created")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "Author", default)]
    pub author: String,
}

impl Post {
    pub fn new(content_id: ContentId, author: &Identity, created_at: DateTime<Utc>) -> Self {
        Post {
            previous_id: ContentId::empty(),
            content_id,
            image_ids: Vec::new(),
            created_at,
            author: author.to_string(),
        }
    }

    /// Link this post in front of `previous`
    pub fn with_previous(mut self, previous: ContentId) -> Self {
        self.previous_id = previous;
        self
    }

    pub fn with_images(mut self, images: Vec<ContentId>) -> Self {
        self.image_ids = images;
        self
    }

    /// Author parsed as an identity, if it is one
    pub fn author_identity(&self) -> Option<Identity> {
        Identity::parse(&self.author).ok()
    }

    pub fn encode(&self) -> ZebuResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ZebuError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> ZebuResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
