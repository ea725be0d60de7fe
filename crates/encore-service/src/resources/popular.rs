use serde::{Deserialize, Serialize};

use crate::backend::ResourceRequest;
use crate::fetcher::Resource;

/// How many artists are requested when no limit is given.
pub const DEFAULT_LIMIT: usize = 10;

/// An entry of the popular artists chart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// The popular artists chart, keyed by the number of entries requested.
///
/// If the chart cannot be fetched, a curated list is shown rather than an empty one.
#[derive(Debug, Default)]
pub struct PopularArtists;

impl Resource for PopularArtists {
    type Params = usize;
    type Item = Vec<ArtistSummary>;

    const NAME: &'static str = "popular_artists";

    fn cache_key(&self, limit: &usize) -> String {
        format!("popular:{limit}")
    }

    fn request(&self, limit: &usize) -> ResourceRequest {
        ResourceRequest::new("charts/popular").with_query("limit", limit)
    }

    fn fallback(&self, limit: &usize) -> Option<Self::Item> {
        Some(curated().take(*limit).collect())
    }
}

fn curated() -> impl Iterator<Item = ArtistSummary> {
    [
        ("curated-1", "Mira Solano", "jazz"),
        ("curated-2", "The Lanterns", "indie rock"),
        ("curated-3", "Kofi Mensah", "afrobeat"),
        ("curated-4", "Hana Ito", "city pop"),
        ("curated-5", "Oskar Vale", "electronic"),
        ("curated-6", "Lucía Fernández", "flamenco"),
    ]
    .into_iter()
    .map(|(id, name, genre)| ArtistSummary {
        id: id.into(),
        name: name.into(),
        genre: Some(genre.into()),
        image_url: None,
    })
}
