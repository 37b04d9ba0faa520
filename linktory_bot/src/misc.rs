use teloxide::types::User;
use url::Url;

/// Why some text couldn't be taken as a link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkParseError {
    #[error("no link given")]
    Empty,
    #[error("not a valid link: {0}")]
    Invalid(#[from] url::ParseError),
    #[error("only http and https links are supported, not {0}")]
    UnsupportedScheme(String),
    #[error("the link has no website in it")]
    NoHost,
}

/// Parse a link the way a user would type it, and normalize it so that the
/// same website is always stored the same way.
///
/// Like telegram, this allows an implicit `https://` prefix, and treats
/// `@username` as `https://t.me/username`. The fragment is dropped, and the
/// scheme and host get lowercased by the [`Url`] parser.
pub fn parse_link(text: &str) -> Result<Url, LinkParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(LinkParseError::Empty);
    }

    // "example.com:8080" parses as a URL with scheme "example.com".
    let host_and_port = !text.contains("//")
        && text
            .split_once(':')
            .is_some_and(|(_, rest)| rest.starts_with(|c: char| c.is_ascii_digit()));

    let mut url = if let Some(username) = text.strip_prefix('@') {
        // Probably a username like "@amogus"
        Url::parse(&format!("https://t.me/{username}"))?
    } else if host_and_port {
        Url::parse(&format!("https://{text}"))?
    } else {
        match Url::parse(text) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(&format!("https://{text}"))?
            }
            Err(e) => return Err(e.into()),
        }
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Err(LinkParseError::UnsupportedScheme(url.scheme().to_string()));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(LinkParseError::NoHost);
    }

    url.set_fragment(None);

    Ok(url)
}

/// Split `https://example.com | some reason` into the link and the reason.
/// The reason is empty if there's no `|`.
#[must_use]
pub fn split_link_and_reason(text: &str) -> (&str, &str) {
    match text.split_once('|') {
        Some((link, reason)) => (link.trim(), reason.trim()),
        None => (text.trim(), ""),
    }
}

/// Split off the first whitespace-separated word of `text`, returning it and
/// the trimmed rest.
#[must_use]
pub fn split_first_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (text, ""),
    }
}

/// True if this looks like the short ID a link is shown with.
#[must_use]
pub fn is_hidden_id(text: &str) -> bool {
    text.len() == 8 && text.chars().all(|c| c.is_ascii_hexdigit())
}

/// Tries to print the user in the prettiest way possible, with either `@username` or full name.
/// Optionally allows including user ID.
#[must_use]
pub fn user_name_prettyprint(user: &User, with_id: bool) -> String {
    let mut name = if let Some(username) = &user.username {
        format!("@{username}")
    } else {
        user.full_name()
    };

    if with_id {
        use std::fmt::Write;
        write!(name, " (userid {})", user.id).expect("Writing to a String never fails");
    }

    name
}
