use crate::error::PipelineError;

/// Reduces a bare account id or a profile URL
/// (`https://www.dotabuff.com/players/162015739`) to the numeric account id.
pub fn normalize_player_id(input: &str) -> Result<String, PipelineError> {
    let invalid = || PipelineError::InvalidIdentifierFormat {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    // Query strings and fragments are not part of the path.
    let path = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    let segment = path
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .next_back()
        .ok_or_else(invalid)?;

    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    Ok(segment.to_string())
}

/// Parses an identifier into the numeric account id the external APIs use.
pub fn account_id(player_id: &str) -> Result<u64, PipelineError> {
    normalize_player_id(player_id)?
        .parse::<u64>()
        .map_err(|_| PipelineError::InvalidIdentifierFormat {
            input: player_id.to_string(),
        })
}
