/// A saved chat quote, ordered by insertion time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub text: String,
    pub inserted_at: i64,
}

impl Quote {
    pub fn new(text: impl Into<String>, inserted_at: i64) -> Self {
        Self {
            text: text.into(),
            inserted_at,
        }
    }
}
