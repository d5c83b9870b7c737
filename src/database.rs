use crate::error::{Error, Result};
use crate::model::*;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::convert::TryInto;

// Big endian so that sled's byte order is insertion order.
fn serialize_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> Result<u64> {
    id.as_ref()
        .try_into()
        .map(u64::from_be_bytes)
        .map_err(|_| Error::Unsupported("malformed account key".to_owned()))
}

pub trait AccountDb {
    /// Returns `None` if the email is already registered.
    fn add_account(&self, account: &Account) -> Result<Option<u64>>;
    fn get_account_by_email(&self, email: &str) -> Result<Option<(u64, Account)>>;
    /// Applies `apply` to the stored account with this email and returns the
    /// result. `apply` always sees the latest record and may run more than
    /// once; an error leaves the record untouched.
    fn update_account<F>(&self, email: &str, apply: F) -> Result<Account>
    where
        F: Fn(&mut Account) -> Result<()>;
    /// All accounts in registration order.
    fn accounts(&self) -> Result<Vec<Account>>;
    fn next_profile_id(&self) -> Result<ProfileId>;
}

const ACCOUNTS: &[u8] = b"accounts";
const ACCOUNTS_EMAIL: &[u8] = b"accounts_email";

impl AccountDb for sled::Db {
    fn add_account(&self, account: &Account) -> Result<Option<u64>> {
        let accounts = self.open_tree(ACCOUNTS)?;
        let accounts_email = self.open_tree(ACCOUNTS_EMAIL)?;
        let id = self.generate_id()?;
        let data = bincode::serialize(account)?;
        if let Err(err) = (&accounts, &accounts_email).transaction(|(accounts, accounts_email)| {
            accounts.insert(&serialize_id(id), data.as_slice())?;
            if accounts_email
                .insert(account.email.as_bytes(), &serialize_id(id))?
                .is_some()
            {
                sled::transaction::abort(())?;
            }
            Ok(())
        }) {
            match err {
                TransactionError::Storage(e) => return Err(e.into()),
                TransactionError::Abort(()) => return Ok(None),
            };
        }
        Ok(Some(id))
    }

    fn get_account_by_email(&self, email: &str) -> Result<Option<(u64, Account)>> {
        let accounts_email = self.open_tree(ACCOUNTS_EMAIL)?;
        let accounts = self.open_tree(ACCOUNTS)?;
        let id = match accounts_email.get(email.as_bytes())? {
            Some(id) => id,
            None => return Ok(None),
        };
        let data = accounts
            .get(&id)?
            .ok_or_else(|| Error::Unsupported(format!("bad email index for {}", email)))?;
        Ok(Some((deserialize_id(id)?, bincode::deserialize(&data)?)))
    }

    fn update_account<F>(&self, email: &str, apply: F) -> Result<Account>
    where
        F: Fn(&mut Account) -> Result<()>,
    {
        let accounts_email = self.open_tree(ACCOUNTS_EMAIL)?;
        let accounts = self.open_tree(ACCOUNTS)?;
        let id = accounts_email
            .get(email.as_bytes())?
            .ok_or_else(|| Error::StaleReference(format!("no account for {}", email)))?;
        accounts
            .transaction(|tx| {
                let data = tx.get(&id)?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(Error::Unsupported(format!(
                        "bad email index for {}",
                        email
                    )))
                })?;
                let mut account: Account = bincode::deserialize(&data)
                    .map_err(|e| ConflictableTransactionError::Abort(Error::from(e)))?;
                apply(&mut account).map_err(ConflictableTransactionError::Abort)?;
                let data = bincode::serialize(&account)
                    .map_err(|e| ConflictableTransactionError::Abort(Error::from(e)))?;
                tx.insert(id.clone(), data)?;
                Ok(account)
            })
            .map_err(|e: TransactionError<Error>| match e {
                TransactionError::Storage(s) => Error::from(s),
                TransactionError::Abort(e) => e,
            })
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        let accounts = self.open_tree(ACCOUNTS)?;
        accounts
            .iter()
            .values()
            .map(|data| -> Result<Account> { Ok(bincode::deserialize(&data?)?) })
            .collect()
    }

    fn next_profile_id(&self) -> Result<ProfileId> {
        Ok(self.generate_id()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};

    fn account(email: &str) -> Account {
        Account {
            email: email.to_owned(),
            password: "pw".to_owned(),
            profiles: vec![Profile {
                id: 1,
                name: DEFAULT_PROFILE_NAME.to_owned(),
            }],
            favorites: HashMap::new(),
        }
    }

    #[test]
    fn add_and_get() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let id = db.add_account(&account("a@x.com")).unwrap().unwrap();
        let (found_id, found) = db.get_account_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(found_id, id);
        assert_eq!(found, account("a@x.com"));
        assert!(db.get_account_by_email("A@x.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        assert!(db.add_account(&account("a@x.com")).unwrap().is_some());
        let mut other = account("a@x.com");
        other.password = "other".to_owned();
        assert_eq!(db.add_account(&other).unwrap(), None);
        let (_, stored) = db.get_account_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(stored.password, "pw");
        assert_eq!(db.accounts().unwrap().len(), 1);
    }

    #[test]
    fn accounts_keep_registration_order() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        for email in &["c@x.com", "a@x.com", "b@x.com"] {
            db.add_account(&account(email)).unwrap().unwrap();
        }
        let emails = db
            .accounts()
            .unwrap()
            .into_iter()
            .map(|account| account.email)
            .collect::<Vec<_>>();
        assert_eq!(emails, vec!["c@x.com", "a@x.com", "b@x.com"]);
    }

    #[test]
    fn update_applies_to_stored_record() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        db.add_account(&account("a@x.com")).unwrap().unwrap();
        let updated = db
            .update_account("a@x.com", |stored| {
                stored.favorites.insert(1, vec![3].into_iter().collect());
                Ok(())
            })
            .unwrap();
        let (_, found) = db.get_account_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(found, updated);
        assert_eq!(found.favorites_of(1), vec![3].into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn update_sees_latest_record() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        db.add_account(&account("a@x.com")).unwrap().unwrap();
        db.update_account("a@x.com", |stored| {
            stored.profiles.push(Profile {
                id: 2,
                name: "Kids".to_owned(),
            });
            Ok(())
        })
        .unwrap();
        let updated = db
            .update_account("a@x.com", |stored| {
                stored.favorites.entry(1).or_default().insert(5);
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.profiles.len(), 2);
        assert_eq!(updated.favorites_of(1), vec![5].into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn failed_update_leaves_record() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        db.add_account(&account("a@x.com")).unwrap().unwrap();
        let result = db.update_account("a@x.com", |stored| {
            stored.profiles.clear();
            Err(Error::validation("nope"))
        });
        match result {
            Err(Error::Validation(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        let (_, found) = db.get_account_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(found, account("a@x.com"));
    }

    #[test]
    fn update_unknown_account() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        match db.update_account("ghost@x.com", |_| Ok(())) {
            Err(Error::StaleReference(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn profile_ids_are_unique() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let a = db.next_profile_id().unwrap();
        let b = db.next_profile_id().unwrap();
        assert_ne!(a, b);
    }
}
