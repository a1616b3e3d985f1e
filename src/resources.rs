//! Backend resources: paths, invalidation tags and payload shapes.
//!
//! | Resource | Tag |
//! |---|---|
//! | `GET /finds` | [`ALL_FINDS`] |
//! | `GET /finds/me` | [`MY_FINDS`] |
//! | `GET /finds/{id}` | `find-{id}` ([`find_tag`]) |
//! | `GET /users?search={term}` | [`USER_SEARCH`] |
//! | `GET /users/{username}/finds` | [`USER_FINDS`] |
//! | `GET /mushrooms/facts?q={name}` | none |
//!
//! Writes to finds invalidate [`MY_FINDS`], [`ALL_FINDS`] and the find's own
//! tag where one applies.

use chrono::NaiveDate;
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::client::ApiClient;
use crate::error::Result;
use crate::mutation::Mutation;
use crate::query::Query;
use crate::transport::Form;

pub const ALL_FINDS: &str = "all-finds";
pub const MY_FINDS: &str = "my-finds";
pub const USER_SEARCH: &str = "user-search";
pub const USER_FINDS: &str = "user-finds";

pub const FINDS_PATH: &str = "/finds";
pub const MY_FINDS_PATH: &str = "/finds/me";

#[must_use]
pub fn find_path(id: u64) -> String {
    format!("{FINDS_PATH}/{id}")
}

#[must_use]
pub fn find_tag(id: u64) -> String {
    format!("find-{id}")
}

/// `/users?search=<term>`; a blank term searches for everyone.
#[must_use]
pub fn user_search_path(term: &str) -> String {
    format!("/users?search={}", encode_component(term.trim()))
}

#[must_use]
pub fn user_finds_path(username: &str) -> String {
    format!("/users/{}/finds", encode_component(username))
}

#[must_use]
pub fn species_facts_path(name: &str) -> String {
    format!("/mushrooms/facts?q={}", encode_component(name.trim()))
}

/// Percent-encodes one path segment or query value.
fn encode_component(raw: &str) -> String {
    // form_urlencoded turns spaces into '+' and escapes literal '+'.
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// A logged mushroom find.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Find {
    pub id: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub species: String,
    #[serde(default, deserialize_with = "lenient_date")]
    pub date_found: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub hide_location: bool,
}

impl Find {
    /// `(longitude, latitude)` when both are known.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.longitude.zip(self.latitude)
    }

    /// Absolute photo URL; relative paths are served by the backend.
    #[must_use]
    pub fn image_src(&self, base_url: &str) -> Option<String> {
        let path = self.image_url.as_deref().filter(|p| !p.is_empty())?;
        if path.starts_with("http") {
            Some(path.to_string())
        } else {
            Some(format!("{}{path}", base_url.trim_end_matches('/')))
        }
    }
}

/// Accepts `YYYY-MM-DD` or any timestamp starting with it; anything else
/// is treated as unknown.
fn lenient_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        s.get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
    }))
}

/// JSON body for `POST /finds`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFind {
    pub species: String,
    pub date_found: NaiveDate,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
}

impl NewFind {
    pub fn new(species: impl Into<String>, date_found: NaiveDate) -> Self {
        Self {
            species: species.into(),
            date_found,
            description: None,
            latitude: None,
            longitude: None,
            location: None,
        }
    }

    #[must_use]
    pub const fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }
}

/// A photo attached to an edited find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

/// Multipart body for `PUT /finds/{id}`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindForm {
    pub species: String,
    pub date_found: Option<NaiveDate>,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
    pub photo: Option<Photo>,
    pub hide_location: bool,
}

impl From<&Find> for FindForm {
    fn from(find: &Find) -> Self {
        Self {
            species: find.species.clone(),
            date_found: find.date_found,
            description: find.description.clone(),
            latitude: find.latitude,
            longitude: find.longitude,
            location: find.location.clone(),
            photo: None,
            hide_location: find.hide_location,
        }
    }
}

impl FindForm {
    /// Builds the multipart form. `location` is always sent so it can be
    /// cleared; the photo only when replaced.
    #[must_use]
    pub fn to_form(&self) -> Form {
        let date = self
            .date_found
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let mut form = Form::new()
            .text("species", self.species.clone())
            .text("date_found", date);

        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            form = form.text("description", description);
        }
        if let Some(latitude) = self.latitude {
            form = form.text("latitude", latitude.to_string());
        }
        if let Some(longitude) = self.longitude {
            form = form.text("longitude", longitude.to_string());
        }
        form = form.text("location", self.location.clone().unwrap_or_default());
        if let Some(photo) = &self.photo {
            form = form.file(
                "photo",
                photo.file_name.clone(),
                photo.bytes.clone(),
                photo.mime.clone(),
            );
        }
        form.text(
            "hide_location",
            if self.hide_location { "true" } else { "false" },
        )
    }
}

/// Species and date filter applied to the public map feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindFilter {
    pub species: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl FindFilter {
    /// Species match is a case-insensitive substring; date bounds are
    /// inclusive. A date-bounded filter never matches an undated find.
    #[must_use]
    pub fn matches(&self, find: &Find) -> bool {
        let species_match = self
            .species
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .is_none_or(|needle| {
                find.species
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            });

        let date_match = if self.from.is_none() && self.to.is_none() {
            true
        } else {
            find.date_found.is_some_and(|date| {
                self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
            })
        };

        species_match && date_match
    }

    /// Finds that pass the filter and can be placed on a map.
    pub fn markers<'a>(&'a self, finds: &'a [Find]) -> impl Iterator<Item = &'a Find> + 'a {
        finds
            .iter()
            .filter(|find| self.matches(find) && find.coordinates().is_some())
    }
}

/// Badge the backend awards for distinct species logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Badge {
    #[serde(rename = "Fruiting")]
    Fruiting,
    #[serde(rename = "Seasoned Forager")]
    SeasonedForager,
    #[serde(rename = "Myco Master")]
    MycoMaster,
}

impl Badge {
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Fruiting => "Fruiting: 5+ distinct species logged",
            Self::SeasonedForager => "Seasoned Forager: 10+ distinct species logged",
            Self::MycoMaster => "Myco Master: 25+ distinct species logged",
        }
    }

    #[must_use]
    pub const fn icon(self) -> &'static str {
        match self {
            Self::Fruiting => "/svgs/fruiting.svg",
            Self::SeasonedForager => "/svgs/seasonedforager.svg",
            Self::MycoMaster => "/svgs/MycoMaster.svg",
        }
    }
}

fn known_badge<'de, D>(deserializer: D) -> std::result::Result<Option<Badge>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}

/// A forager as returned by user search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "known_badge")]
    pub badge: Option<Badge>,
}

impl User {
    /// `"city, state"` with blanks dropped.
    #[must_use]
    pub fn place(&self) -> Option<String> {
        let parts: Vec<&str> = [self.city.as_deref(), self.state.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.trim().is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Safety {
    Deadly,
    Edible,
    Unknown,
}

impl Safety {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Deadly => "DEADLY",
            Self::Edible => "EDIBLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Fact sheet from `GET /mushrooms/facts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciesFacts {
    pub scientific_name: Option<String>,
    pub edible: bool,
    pub deadly: bool,
    pub notes: Option<String>,
    pub deadly_lookalikes: Vec<String>,
    pub toxins: Vec<String>,
    pub syndrome: Option<String>,
}

impl SpeciesFacts {
    /// Deadly wins over edible.
    #[must_use]
    pub const fn safety(&self) -> Safety {
        if self.deadly {
            Safety::Deadly
        } else if self.edible {
            Safety::Edible
        } else {
            Safety::Unknown
        }
    }
}

/// Public map feed.
pub fn all_finds(client: &ApiClient) -> Query<Vec<Find>> {
    client.query(FINDS_PATH, ALL_FINDS)
}

/// The logged-in user's finds.
pub fn my_finds(client: &ApiClient) -> Query<Vec<Find>> {
    client.query(MY_FINDS_PATH, MY_FINDS)
}

pub fn find(client: &ApiClient, id: u64) -> Query<Find> {
    client.query(find_path(id), find_tag(id))
}

/// Forager search; call [`Query::set_resource`] with [`user_search_path`]
/// as the term changes.
pub fn user_search(client: &ApiClient, term: &str) -> Query<Vec<User>> {
    client.query(user_search_path(term), USER_SEARCH)
}

pub fn user_finds(client: &ApiClient, username: &str) -> Query<Vec<Find>> {
    client.query(user_finds_path(username), USER_FINDS)
}

pub fn create_find(client: &ApiClient) -> Mutation<Find> {
    client.mutation(Method::POST, Some(FINDS_PATH), [MY_FINDS, ALL_FINDS])
}

pub fn update_find(client: &ApiClient, id: u64) -> Mutation<Find> {
    client.mutation(
        Method::PUT,
        Some(&find_path(id)),
        [find_tag(id), MY_FINDS.to_string(), ALL_FINDS.to_string()],
    )
}

pub fn delete_find(client: &ApiClient, id: u64) -> Mutation<Value> {
    client.mutation(
        Method::DELETE,
        Some(&find_path(id)),
        [MY_FINDS.to_string(), ALL_FINDS.to_string(), find_tag(id)],
    )
}

/// Looks up safety facts for a species. Blank names return `None`
/// without a request.
///
/// # Errors
///
/// Returns the backend's error, e.g. when the species is unknown.
pub async fn species_facts(client: &ApiClient, name: &str) -> Result<Option<SpeciesFacts>> {
    if name.trim().is_empty() {
        return Ok(None);
    }
    client.get(&species_facts_path(name)).await.map(Some)
}
