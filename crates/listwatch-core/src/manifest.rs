use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::CategoryKey;

/// City → category → category listing page URL.
///
/// Supplied externally and never written by listwatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    cities: BTreeMap<String, BTreeMap<String, String>>,
}

impl Manifest {
    pub fn new(cities: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { cities }
    }

    /// Read and validate a manifest file.
    ///
    /// A missing file, invalid JSON, or a manifest without any city is a
    /// [`AppError::ManifestError`].
    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::ManifestError(format!(
                    "the categories file '{}' does not exist",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(AppError::ManifestError(format!(
                    "the categories file '{}' could not be read: {e}",
                    path.display()
                )));
            }
        };
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, AppError> {
        let manifest: Manifest = serde_json::from_str(raw).map_err(|e| {
            AppError::ManifestError(format!(
                "the categories file '{}' is not a valid manifest: {e}",
                path.display()
            ))
        })?;
        if manifest.cities.is_empty() {
            return Err(AppError::ManifestError(format!(
                "the categories file '{}' does not contain any data",
                path.display()
            )));
        }
        Ok(manifest)
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn cities(&self) -> impl Iterator<Item = &str> {
        self.cities.keys().map(String::as_str)
    }

    /// Source URL for one category of one city.
    pub fn resolve(&self, city: &str, category: &str) -> Result<&str, AppError> {
        let categories = self
            .cities
            .get(city)
            .ok_or_else(|| AppError::UnknownCity(city.to_string()))?;
        categories
            .get(category)
            .map(String::as_str)
            .ok_or_else(|| AppError::UnknownCategory {
                city: city.to_string(),
                category: category.to_string(),
            })
    }

    /// Every (city, category) pair with its URL, restricted to one city when
    /// given. Pairs come out sorted by city, then category.
    pub fn categories(&self, city: Option<&str>) -> Result<Vec<(CategoryKey, String)>, AppError> {
        let selected: Vec<(&String, &BTreeMap<String, String>)> = match city {
            Some(city) => {
                let (name, categories) = self
                    .cities
                    .get_key_value(city)
                    .ok_or_else(|| AppError::UnknownCity(city.to_string()))?;
                vec![(name, categories)]
            }
            None => self.cities.iter().collect(),
        };

        Ok(selected
            .into_iter()
            .flat_map(|(city, categories)| {
                categories
                    .iter()
                    .map(move |(category, url)| (CategoryKey::new(city, category), url.clone()))
            })
            .collect())
    }

    /// The cities that list `category`, with its URL in each.
    pub fn cities_with(&self, category: &str) -> Vec<(CategoryKey, String)> {
        self.cities
            .iter()
            .filter_map(|(city, categories)| {
                categories
                    .get(category)
                    .map(|url| (CategoryKey::new(city, category), url.clone()))
            })
            .collect()
    }
}
