//! Input validation for identities, player names and chat text.

/// Required length of an external (EOS) identity.
pub const IDENTITY_LEN: usize = 32;

/// Longest player name accepted from a roster line or a link request.
pub const MAX_PLAYER_NAME: usize = 64;

/// True iff `s` is exactly 32 ASCII alphanumeric characters.
pub fn is_valid_identity(s: &str) -> bool {
    s.len() == IDENTITY_LEN && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Player name rules: non-empty after trimming, bounded length, no control
/// characters and no comma (the roster separator).
pub fn validate_player_name(name: &str) -> Result<&str, String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("player name is empty".to_string());
    }
    if trimmed.chars().count() > MAX_PLAYER_NAME {
        return Err(format!("player name longer than {} characters", MAX_PLAYER_NAME));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err("player name contains control characters".to_string());
    }
    if trimmed.contains(',') {
        return Err("player name contains a comma".to_string());
    }
    Ok(trimmed)
}

/// Server ids are used as map keys and in environment variable names.
pub fn validate_server_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("server id is empty".to_string());
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!("server id '{}' may only contain [A-Za-z0-9_-]", id));
    }
    Ok(())
}

/// Make free text safe to embed inside a double-quoted console argument.
/// Quotes become single quotes and line breaks become spaces.
pub fn sanitize_chat_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\r' || *c == '\t')
        .map(|c| match c {
            '"' => '\'',
            '\n' | '\r' | '\t' => ' ',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
