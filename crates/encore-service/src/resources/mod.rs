//! The resources the backend serves, and how each of them is fetched and cached.

mod artists;
mod popular;

pub use artists::{ArtistProfile, ArtistProfiles, ProfileUpdate};
pub use popular::{ArtistSummary, DEFAULT_LIMIT, PopularArtists};
