use crate::error::Result;

/// How passwords are kept in the account record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    /// Stored as entered and compared exactly.
    Plain,
    Bcrypt { cost: u32 },
}

impl Default for Credentials {
    fn default() -> Self {
        Credentials::Plain
    }
}

impl Credentials {
    pub fn bcrypt() -> Self {
        Credentials::Bcrypt {
            cost: bcrypt::DEFAULT_COST,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" => Some(Credentials::Plain),
            "bcrypt" => Some(Credentials::bcrypt()),
            _ => None,
        }
    }

    pub fn store(&self, password: &str) -> Result<String> {
        match self {
            Credentials::Plain => Ok(password.to_owned()),
            Credentials::Bcrypt { cost } => Ok(bcrypt::hash(password, *cost)?),
        }
    }

    pub fn verify(&self, password: &str, stored: &str) -> Result<bool> {
        match self {
            Credentials::Plain => Ok(password == stored),
            Credentials::Bcrypt { .. } => Ok(bcrypt::verify(password, stored)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain() {
        let credentials = Credentials::Plain;
        let stored = credentials.store("pw").unwrap();
        assert_eq!(stored, "pw");
        assert!(credentials.verify("pw", &stored).unwrap());
        assert!(!credentials.verify("PW", &stored).unwrap());
    }

    #[test]
    fn bcrypt() {
        let credentials = Credentials::Bcrypt { cost: 4 };
        let stored = credentials.store("pw").unwrap();
        assert_ne!(stored, "pw");
        assert!(credentials.verify("pw", &stored).unwrap());
        assert!(!credentials.verify("wrong", &stored).unwrap());
    }

    #[test]
    fn parse() {
        assert_eq!(Credentials::parse("plain"), Some(Credentials::Plain));
        assert_eq!(Credentials::parse(" BCrypt "), Some(Credentials::bcrypt()));
        assert_eq!(Credentials::parse("md5"), None);
    }
}
