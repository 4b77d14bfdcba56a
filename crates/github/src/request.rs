//! The unit of work admitted to the scheduler.

use std::sync::Arc;

use contributors::{to_query_string, wrap_with_cost, QueryNode};

/// A bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(Arc<str>);

impl Token {
    /// Wraps a token, returning `None` for an empty or blank value.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            None
        } else {
            Some(Self(Arc::from(value)))
        }
    }

    /// The raw secret, for the `Authorization` header only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Per-request flags. `verbose` and `debug` only change what is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    /// Log the cost of every request at `info`.
    pub verbose: bool,
    /// Log query text and results.
    pub debug: bool,
    /// Ask the provider for a cost estimate without executing the selection.
    pub dry_run: bool,
}

/// One network attempt's worth of request: created per query (including
/// every continuation query) and discarded once answered.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// Credential sent as a bearer token.
    pub token: Token,
    /// Rendered selection text (without the cost wrapper).
    pub query_text: String,
    /// Label used in logs.
    pub name: String,
    /// Logging and dry-run flags.
    pub flags: RequestFlags,
}

impl RequestEnvelope {
    /// Renders `query` into a new envelope.
    pub fn new(token: Token, query: &QueryNode, name: impl Into<String>, flags: RequestFlags) -> Self {
        Self {
            token,
            query_text: to_query_string(query),
            name: name.into(),
            flags,
        }
    }

    /// The full operation text sent on the wire: the selection wrapped with
    /// the quota meta-field.
    pub fn operation(&self) -> String {
        wrap_with_cost(&self.query_text, self.flags.dry_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contributors::leaf;

    #[test]
    fn blank_tokens_are_rejected() {
        assert!(Token::new("").is_none());
        assert!(Token::new("  \n").is_none());
        assert_eq!(Token::new(" abc ").unwrap().expose(), "abc");
    }

    #[test]
    fn debug_output_hides_the_token() {
        let token = Token::new("secret-value").unwrap();
        assert_eq!(format!("{token:?}"), "Token(***)");
    }

    #[test]
    fn operation_wraps_the_selection_with_cost() {
        let flags = RequestFlags {
            dry_run: true,
            ..RequestFlags::default()
        };
        let envelope = RequestEnvelope::new(Token::new("t").unwrap(), &leaf("viewer"), "viewer", flags);
        assert_eq!(
            envelope.operation(),
            "query{rateLimit(dryRun: true){cost, remaining, resetAt}\nviewer}"
        );
    }
}
