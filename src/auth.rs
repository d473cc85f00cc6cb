// file: src/auth.rs
// description: access-token source consulted before every connection attempt

use std::sync::{Arc, RwLock};
use url::Url;

/// Supplies the current access token. `None` means the user is not signed in.
pub trait TokenProvider: Send + Sync + 'static {
    fn access_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}

/// A token held in memory that can be rotated or cleared at runtime.
#[derive(Debug, Clone, Default)]
pub struct StaticToken {
    token: Arc<RwLock<Option<String>>>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(token.into()))),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn set(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// `base` with `param=<token>` set in its query, replacing any previous value.
pub fn authenticated_url(base: &Url, param: &str, token: &str) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (key, value) in &kept {
            query.append_pair(key, value);
        }
        query.append_pair(param, token);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_appended_to_query() {
        let base = Url::parse("wss://pantheon.example.com/ws?client=dashboard").unwrap();
        let url = authenticated_url(&base, "token", "abc.def");
        assert_eq!(
            url.as_str(),
            "wss://pantheon.example.com/ws?client=dashboard&token=abc.def"
        );
    }

    #[test]
    fn stale_token_is_replaced() {
        let base = Url::parse("ws://localhost:8000/ws?token=old").unwrap();
        let url = authenticated_url(&base, "token", "new");
        assert_eq!(url.query(), Some("token=new"));
    }

    #[test]
    fn static_token_can_be_rotated_and_cleared() {
        let token = StaticToken::new("first");
        assert_eq!(token.access_token().as_deref(), Some("first"));

        let shared = token.clone();
        shared.set(Some("second".to_string()));
        assert_eq!(token.access_token().as_deref(), Some("second"));

        shared.set(None);
        assert_eq!(token.access_token(), None);
        assert_eq!(StaticToken::anonymous().access_token(), None);
    }

    #[test]
    fn closures_are_token_providers() {
        let provider = || Some("from-closure".to_string());
        assert_eq!(provider.access_token().as_deref(), Some("from-closure"));
    }
}
