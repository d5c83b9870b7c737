use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub type ProfileId = u64;
pub type MovieId = u32;

pub const DEFAULT_PROFILE_NAME: &str = "Default Profile";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub email: String,
    /// Stored as produced by the configured credential policy.
    pub password: String,
    pub profiles: Vec<Profile>,
    pub favorites: HashMap<ProfileId, BTreeSet<MovieId>>,
}

impl Account {
    pub fn profile(&self, id: ProfileId) -> Option<&Profile> {
        self.profiles.iter().find(|profile| profile.id == id)
    }

    pub fn owns(&self, profile: &Profile) -> bool {
        self.profile(profile.id).is_some()
    }

    /// Favorites of a profile, empty if it never toggled anything.
    pub fn favorites_of(&self, id: ProfileId) -> BTreeSet<MovieId> {
        self.favorites.get(&id).cloned().unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
}

/// Pointer to the active account and, once selected, its profile.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub email: String,
    pub profile_id: Option<ProfileId>,
}

impl Session {
    pub fn pending(email: impl Into<String>) -> Self {
        Session {
            email: email.into(),
            profile_id: None,
        }
    }

    pub fn active(email: impl Into<String>, profile_id: ProfileId) -> Self {
        Session {
            email: email.into(),
            profile_id: Some(profile_id),
        }
    }
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct Movie {
    pub id: MovieId,
    pub title: &'static str,
    pub category: &'static str,
    pub year: u16,
    pub description: &'static str,
}
