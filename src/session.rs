use crate::error::Result;
use crate::model::{ProfileId, Session};
use log::warn;

pub trait SessionSlot {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub const SESSION: &[u8] = b"session";

impl SessionSlot for sled::Tree {
    fn load(&self) -> Result<Option<Session>> {
        match self.get(SESSION)? {
            Some(data) => match bincode::deserialize(&data) {
                Ok(session) => Ok(Some(session)),
                Err(err) => {
                    warn!("Discarding unreadable session: {}", err);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        self.insert(SESSION, bincode::serialize(session)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.remove(SESSION)?;
        Ok(())
    }
}

const SEPARATOR: char = '\t';
const NO_PROFILE: &str = "-";

/// Encodes a session as a cookie token: the profile id (or `-` before one is
/// selected), a tab, then the email. The email is always the remainder, so
/// a separator inside it cannot be read as a profile id.
pub fn encode_token(session: &Session) -> String {
    match session.profile_id {
        Some(id) => format!("{}{}{}", id, SEPARATOR, session.email),
        None => format!("{}{}{}", NO_PROFILE, SEPARATOR, session.email),
    }
}

pub fn decode_token(token: &str) -> Option<Session> {
    let mut parts = token.splitn(2, SEPARATOR);
    let profile_id = match parts.next()? {
        NO_PROFILE => None,
        id => Some(id.parse::<ProfileId>().ok()?),
    };
    let email = parts.next().filter(|email| !email.is_empty())?;
    Some(Session {
        email: email.to_owned(),
        profile_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_slot() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let slot = db.open_tree("session").unwrap();
        assert_eq!(slot.load().unwrap(), None);
        slot.save(&Session::active("a@x.com", 7)).unwrap();
        assert_eq!(slot.load().unwrap(), Some(Session::active("a@x.com", 7)));
        SessionSlot::clear(&slot).unwrap();
        assert_eq!(slot.load().unwrap(), None);
    }

    #[test]
    fn corrupted_record_reads_as_empty() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let slot = db.open_tree("session").unwrap();
        slot.insert(SESSION, vec![0xffu8]).unwrap();
        assert_eq!(slot.load().unwrap(), None);
    }

    #[test]
    fn tokens() {
        assert_eq!(encode_token(&Session::pending("a@x.com")), "-\ta@x.com");
        assert_eq!(encode_token(&Session::active("a@x.com", 42)), "42\ta@x.com");
        assert_eq!(decode_token("-\ta@x.com"), Some(Session::pending("a@x.com")));
        assert_eq!(
            decode_token("42\ta@x.com"),
            Some(Session::active("a@x.com", 42))
        );
    }

    #[test]
    fn separator_inside_email_stays_in_email() {
        let pending = Session::pending("victim@x.com\t0");
        assert_eq!(decode_token(&encode_token(&pending)), Some(pending));
        let active = Session::active("a@x.com\t7", 3);
        assert_eq!(decode_token(&encode_token(&active)), Some(active));
    }

    #[test]
    fn malformed_tokens() {
        assert_eq!(decode_token(""), None);
        assert_eq!(decode_token("-"), None);
        assert_eq!(decode_token("-\t"), None);
        assert_eq!(decode_token("a@x.com"), None);
        assert_eq!(decode_token("abc\ta@x.com"), None);
    }
}
