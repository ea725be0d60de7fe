use serde::{Deserialize, Serialize};

use crate::backend::ResourceRequest;
use crate::error::FetchError;
use crate::fetcher::{Fetcher, Resource};

/// The public profile of an artist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub followers: u64,
}

/// Changes to an [`ArtistProfile`]. Fields that are `None` are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.bio.is_none()
            && self.genres.is_none()
            && self.avatar_url.is_none()
    }
}

/// Artist profiles, keyed by artist id.
///
/// Profiles have no static default. When the backend is unavailable, the last profile that was
/// fetched successfully is served instead, however old it is.
#[derive(Debug, Default)]
pub struct ArtistProfiles;

impl Resource for ArtistProfiles {
    type Params = String;
    type Item = ArtistProfile;

    const NAME: &'static str = "artist_profile";

    fn cache_key(&self, id: &String) -> String {
        format!("artist:{id}")
    }

    fn request(&self, id: &String) -> ResourceRequest {
        ResourceRequest::new("artists").segment(id.as_str())
    }
}

impl Fetcher<ArtistProfiles> {
    /// Saves changes to an artist's profile.
    ///
    /// Failures are returned to the caller, the update is not retried. On success, the cached
    /// profile is replaced by the one the backend returned.
    pub async fn update_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> Result<ArtistProfile, FetchError> {
        if update.is_empty() {
            return Err(FetchError::Invalid("profile update has no changes".into()));
        }
        let body = serde_json::to_value(update).map_err(FetchError::from_std_error)?;
        self.mutate(&id.to_owned(), body).await
    }
}
