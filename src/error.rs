use thiserror::Error;

/// Failures the pipeline distinguishes between.
///
/// Row-level variants (`InvalidIdentifierFormat`, `MalformedRow`,
/// `FetchFailed`) are recovered by the stage that produced them; the rest
/// stop the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid player identifier {input:?}")]
    InvalidIdentifierFormat { input: String },

    #[error("{source_name}: missing required column {column:?}")]
    MissingColumn { source_name: String, column: String },

    #[error("row {row}{}: {reason}", player_suffix(.player_id))]
    MalformedRow {
        row: usize,
        player_id: Option<String>,
        reason: String,
    },

    #[error("fetch failed for {target}: {reason}")]
    FetchFailed { target: String, reason: String },

    #[error("no hero ids observed in training or prediction data")]
    EmptyFeatureUniverse,

    #[error("insufficient training data: {available} usable rows, need at least {required}")]
    InsufficientData { available: usize, required: usize },

    #[error("feature schema mismatch: model expects {expected} columns, table has {found}")]
    FeatureSchemaMismatch { expected: usize, found: usize },
}

impl PipelineError {
    pub fn fetch_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(row: usize, player_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::MalformedRow {
            row,
            player_id: player_id.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Row-level errors never abort a season run.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifierFormat { .. } | Self::MalformedRow { .. } | Self::FetchFailed { .. }
        )
    }
}

fn player_suffix(player_id: &Option<String>) -> String {
    match player_id {
        Some(id) => format!(" (player {id})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineError;

    #[test]
    fn malformed_row_message_names_player() {
        let err = PipelineError::malformed(4, Some("162015739"), "comfort value 7 outside 1-5");
        assert_eq!(
            err.to_string(),
            "row 4 (player 162015739): comfort value 7 outside 1-5"
        );
        assert!(err.is_row_level());
    }

    #[test]
    fn universe_errors_are_fatal() {
        assert!(!PipelineError::EmptyFeatureUniverse.is_row_level());
        assert!(
            !PipelineError::InsufficientData {
                available: 3,
                required: 10
            }
            .is_row_level()
        );
    }
}
