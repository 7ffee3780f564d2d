//! Discord token plausibility and invite-link display state.
//!
//! A token goes through a two-stage judgment. Plausibility is a cheap local
//! format check used to gate UI affordances; confirmed validity comes from an
//! actual Discord API call and is only performed on explicit user action.

/// Minimum trimmed length for a token to be considered plausible. Heuristic;
/// real token lengths vary, and the API check remains authoritative.
pub const TOKEN_LEN_CHARS: usize = 72;

/// Shown whenever there is nothing useful to link to yet.
pub const INVITE_PLACEHOLDER: &str =
    "A link will appear here once you have set your Discord token.";

pub const VALID_PREFIX: &str = "✔️ Your token is valid.<br><br>";
pub const INVALID_PREFIX: &str = "❌ Your token is invalid.";

pub fn token_is_plausible(token: &str) -> bool {
    token.trim().chars().count() >= TOKEN_LEN_CHARS
}

/// Builds the invite anchor for a token, falling back to the placeholder when
/// the token is empty or no URL generator is available.
pub fn make_link_from_token(
    token: &str,
    invite_url: Option<&dyn Fn(&str) -> String>,
) -> String {
    let token = token.trim();
    let Some(generate) = invite_url else {
        return INVITE_PLACEHOLDER.to_string();
    };
    if token.is_empty() {
        return INVITE_PLACEHOLDER.to_string();
    }
    let link = generate(token);
    format!(
        "<a href=\"{link}\" id=\"invite-link\" target=\"_blank\">\
         Click here to <pre>invite your bot</pre> to a Discord server</a>."
    )
}

/// Derives the invite-link HTML from the token and its test state.
///
/// A plausible-but-unconfirmed token renders a neutral link with no prefix;
/// the green check appears only after the token has actually been tested.
pub fn update_invite_link(
    token: &str,
    is_valid: bool,
    is_tested: bool,
    invite_url: Option<&dyn Fn(&str) -> String>,
) -> String {
    let token = token.trim();
    if token.is_empty() || invite_url.is_none() {
        return INVITE_PLACEHOLDER.to_string();
    }

    let prefix = if is_tested {
        if is_valid {
            VALID_PREFIX
        } else {
            INVALID_PREFIX
        }
    } else {
        ""
    };

    if is_valid {
        return format!("{prefix}{}", make_link_from_token(token, invite_url));
    }
    prefix.to_string()
}
