use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A (city, category) pair: the unit of crawling and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryKey {
    pub city: String,
    pub category: String,
}

impl CategoryKey {
    pub fn new(city: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            category: category.into(),
        }
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.city, self.category)
    }
}

/// Two-level location breadcrumb of a posting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub area: Option<String>,
    pub subarea: Option<String>,
}

/// Free-form attribute list of a posting.
///
/// Labeled entries become keys; unlabeled values are collected under
/// `other`, which serializes next to the labeled keys. Go through
/// [`Attributes::insert`] so a label never shadows the `other` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other: Vec<String>,
    #[serde(flatten)]
    pub labeled: BTreeMap<String, String>,
}

impl Attributes {
    /// Key under which unlabeled values are serialized.
    pub const OTHER: &'static str = "other";

    /// Record a labeled value. A value labeled `other` joins the unlabeled
    /// list, since that key is taken in the serialized document.
    pub fn insert(&mut self, label: impl Into<String>, value: impl Into<String>) {
        let label = label.into();
        if label == Self::OTHER {
            self.other.push(value.into());
        } else {
            self.labeled.insert(label, value.into());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.other.is_empty() && self.labeled.is_empty()
    }
}

/// A single classifieds posting as stored in a category document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub url: String,
    pub title: String,
    pub price: Option<f64>,
    #[serde(rename = "title-location")]
    pub title_location: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Location,
    pub posted: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(rename = "last-seen")]
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub sold: bool,
}

/// Persisted active/sold partition for one (city, category).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryState {
    #[serde(default)]
    pub active: BTreeMap<String, Listing>,
    #[serde(default)]
    pub sold: BTreeMap<String, Listing>,
}

impl CategoryState {
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.sold.is_empty()
    }

    /// All listing ids across both partitions.
    pub fn ids(&self) -> HashSet<String> {
        self.active.keys().chain(self.sold.keys()).cloned().collect()
    }

    /// Apply a fresh scan to the active partition.
    ///
    /// Active listings whose url is absent from `scanned` are moved to
    /// `sold` with the flag set; the rest get `last_seen = now`. Returns
    /// the scanned urls that matched no active listing, in scan order.
    pub fn reconcile(&mut self, scanned: &[String], now: DateTime<Utc>) -> Vec<String> {
        let mut fresh: Vec<String> = Vec::with_capacity(scanned.len());
        let mut seen = HashSet::with_capacity(scanned.len());
        for url in scanned {
            if seen.insert(url.as_str()) {
                fresh.push(url.clone());
            }
        }

        let active = std::mem::take(&mut self.active);
        for (id, mut listing) in active {
            if seen.contains(listing.url.as_str()) {
                listing.last_seen = now;
                fresh.retain(|url| url != &listing.url);
                self.active.insert(id, listing);
            } else {
                listing.sold = true;
                self.sold.insert(id, listing);
            }
        }

        fresh
    }

    /// Insert a newly fetched listing into `active`.
    ///
    /// An id previously recorded as sold is taken out of `sold` so that it
    /// lives in exactly one partition.
    pub fn activate(&mut self, mut listing: Listing) {
        if self.sold.remove(&listing.id).is_some() {
            tracing::debug!(id = %listing.id, "Sold listing reappeared, reactivating");
        }
        listing.sold = false;
        self.active.insert(listing.id.clone(), listing);
    }
}
