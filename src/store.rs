//! Accounts, the active session and per-profile favorites.
//!
//! Every read and write of persisted state goes through [`Store`]. The
//! in-memory view of who is logged in lives in an explicit [`Context`]
//! owned by the store, so handlers never keep their own copies around.

use crate::catalog;
use crate::credentials::Credentials;
use crate::database::AccountDb;
use crate::error::{Error, Result};
use crate::model::*;
use crate::session::SessionSlot;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};

/// Session lifecycle: `LoggedOut -> Authenticated -> Active -> LoggedOut`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Context {
    LoggedOut,
    /// Logged in, no profile selected yet.
    Authenticated(Account),
    Active {
        account: Account,
        profile: Profile,
        favorites: BTreeSet<MovieId>,
    },
}

impl Default for Context {
    fn default() -> Self {
        Context::LoggedOut
    }
}

impl Context {
    pub fn account(&self) -> Option<&Account> {
        match self {
            Context::LoggedOut => None,
            Context::Authenticated(account) | Context::Active { account, .. } => Some(account),
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            Context::Active { profile, .. } => Some(profile),
            _ => None,
        }
    }

    pub fn favorites(&self) -> Option<&BTreeSet<MovieId>> {
        match self {
            Context::Active { favorites, .. } => Some(favorites),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Landing,
    Login,
    Register,
    Profiles,
    Home,
}

impl Page {
    pub fn path(self) -> &'static str {
        match self {
            Page::Landing => "/",
            Page::Login => "/login",
            Page::Register => "/register",
            Page::Profiles => "/profiles",
            Page::Home => "/home",
        }
    }
}

pub struct Store<D, S> {
    db: D,
    slot: S,
    credentials: Credentials,
    context: Context,
}

impl<D: AccountDb, S: SessionSlot> Store<D, S> {
    pub fn new(db: D, slot: S, credentials: Credentials) -> Self {
        Store {
            db,
            slot,
            credentials,
            context: Context::LoggedOut,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    pub fn register(
        &mut self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Account> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() || confirm_password.is_empty() {
            return Err(Error::validation("All fields are required"));
        }
        if email.chars().any(char::is_control) {
            return Err(Error::validation("Email must not contain control characters"));
        }
        if password != confirm_password {
            return Err(Error::validation("Passwords do not match"));
        }
        if self.db.get_account_by_email(email)?.is_some() {
            return Err(Error::DuplicateEmail);
        }
        let account = Account {
            email: email.to_owned(),
            password: self.credentials.store(password)?,
            profiles: vec![Profile {
                id: self.db.next_profile_id()?,
                name: DEFAULT_PROFILE_NAME.to_owned(),
            }],
            favorites: HashMap::new(),
        };
        match self.db.add_account(&account)? {
            Some(_) => {
                info!("Registered account {}", account.email);
                Ok(account)
            }
            None => Err(Error::DuplicateEmail),
        }
    }

    /// Checks the credentials and moves to the profile selection step.
    pub fn login(&mut self, email: &str, password: &str) -> Result<Account> {
        let email = email.trim();
        let account = match self.db.get_account_by_email(email)? {
            Some((_, account)) => account,
            None => {
                debug!("Rejected login for unknown account {}", email);
                return Err(Error::InvalidCredentials);
            }
        };
        let verified = match self.credentials.verify(password, &account.password) {
            Ok(verified) => verified,
            Err(err) => {
                warn!("Cannot verify the password of {}: {}", email, err);
                false
            }
        };
        if !verified {
            debug!("Rejected login for {}", email);
            return Err(Error::InvalidCredentials);
        }
        self.slot.save(&Session::pending(account.email.clone()))?;
        self.context = Context::Authenticated(account.clone());
        info!("Logged in {}", account.email);
        Ok(account)
    }

    pub fn list_profiles<'a>(&self, account: &'a Account) -> &'a [Profile] {
        &account.profiles
    }

    pub fn add_profile(&mut self, account: &mut Account, name: &str) -> Result<Profile> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Profile name is required"));
        }
        let mut id = self.db.next_profile_id()?;
        while account.profile(id).is_some() {
            id = self.db.next_profile_id()?;
        }
        let profile = Profile {
            id,
            name: name.to_owned(),
        };
        let updated = self.db.update_account(&account.email, |stored| {
            if stored.profile(id).is_some() {
                return Err(Error::Unsupported(format!("profile id {} is taken", id)));
            }
            stored.profiles.push(profile.clone());
            stored.favorites.insert(id, BTreeSet::new());
            Ok(())
        })?;
        *account = updated;
        self.refresh(account);
        info!("Added profile {:?} to {}", profile.name, account.email);
        Ok(profile)
    }

    pub fn select_profile(&mut self, account: &Account, profile: &Profile) -> Result<Session> {
        let profile = account.profile(profile.id).cloned().ok_or_else(|| {
            Error::StaleReference(format!(
                "profile {} does not belong to {}",
                profile.id, account.email
            ))
        })?;
        let session = Session::active(account.email.clone(), profile.id);
        self.slot.save(&session)?;
        info!("{} selected profile {:?}", account.email, profile.name);
        self.context = Context::Active {
            favorites: account.favorites_of(profile.id),
            account: account.clone(),
            profile,
        };
        Ok(session)
    }

    /// Adds or removes `movie_id` from the profile's favorites and returns
    /// the resulting set.
    pub fn toggle_favorite(
        &mut self,
        account: &mut Account,
        profile: &Profile,
        movie_id: MovieId,
    ) -> Result<BTreeSet<MovieId>> {
        if !catalog::contains(movie_id) {
            return Err(Error::validation(format!("Unknown movie {}", movie_id)));
        }
        let updated = self.db.update_account(&account.email, |stored| {
            if !stored.owns(profile) {
                return Err(Error::StaleReference(format!(
                    "profile {} does not belong to {}",
                    profile.id, stored.email
                )));
            }
            let favorites = stored.favorites.entry(profile.id).or_default();
            if !favorites.remove(&movie_id) {
                favorites.insert(movie_id);
            }
            Ok(())
        })?;
        let favorites = updated.favorites_of(profile.id);
        *account = updated;
        self.refresh(account);
        debug!(
            "Favorites of profile {} are now {:?}",
            profile.id, favorites
        );
        Ok(favorites)
    }

    /// Rebuilds the context from the persisted session. References that no
    /// longer resolve are dropped instead of reported.
    pub fn restore_session(&mut self) -> Result<Option<(Account, Profile)>> {
        let session = match self.slot.load()? {
            Some(session) => session,
            None => {
                self.context = Context::LoggedOut;
                return Ok(None);
            }
        };
        let account = match self.db.get_account_by_email(&session.email)? {
            Some((_, account)) => account,
            None => {
                warn!("Session refers to unknown account {}", session.email);
                self.slot.clear()?;
                self.context = Context::LoggedOut;
                return Ok(None);
            }
        };
        let profile_id = match session.profile_id {
            Some(id) => id,
            None => {
                self.context = Context::Authenticated(account);
                return Ok(None);
            }
        };
        match account.profile(profile_id).cloned() {
            Some(profile) => {
                self.context = Context::Active {
                    account: account.clone(),
                    profile: profile.clone(),
                    favorites: account.favorites_of(profile_id),
                };
                Ok(Some((account, profile)))
            }
            None => {
                warn!(
                    "Session refers to unknown profile {} of {}",
                    profile_id, account.email
                );
                self.slot.save(&Session::pending(account.email.clone()))?;
                self.context = Context::Authenticated(account);
                Ok(None)
            }
        }
    }

    pub fn logout(&mut self) -> Result<()> {
        self.slot.clear()?;
        if let Some(account) = self.context.account() {
            info!("Logged out {}", account.email);
        }
        self.context = Context::LoggedOut;
        Ok(())
    }

    /// The page to show for a request of `page`, redirecting to the
    /// earliest step the current state has not completed.
    pub fn route(&self, page: Page) -> Page {
        let target = match (page, &self.context) {
            (Page::Home, Context::Authenticated(_)) => Page::Profiles,
            (Page::Home, Context::LoggedOut) | (Page::Profiles, Context::LoggedOut) => Page::Login,
            (page, _) => page,
        };
        if target != page {
            debug!("Redirecting {:?} to {:?}", page, target);
        }
        target
    }

    fn refresh(&mut self, updated: &Account) {
        match &mut self.context {
            Context::Authenticated(account) if account.email == updated.email => {
                *account = updated.clone();
            }
            Context::Active {
                account,
                profile,
                favorites,
            } if account.email == updated.email => {
                *account = updated.clone();
                *favorites = updated.favorites_of(profile.id);
            }
            _ => {}
        }
    }
}
