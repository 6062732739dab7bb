use snafu::{ensure, OptionExt as _, Snafu};

/// Token prefixes, and the length of the value that follows each of them.
const TOKEN_FORMATS: &[(&str, usize)] = &[("token", 32), ("tkn", 32), ("tokn", 24)];

/// The token is not shaped like a workspace token.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum TokenError {
    #[snafu(display("token '{}' has no known prefix", token))]
    UnknownPrefix { token: String },

    #[snafu(display("token '{}' should have {} characters after '{}_', got {}", token, expected, prefix, actual))]
    InvalidLength {
        token: String,
        prefix: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Checks that `token` is shaped like a workspace token.
///
/// A token is `{prefix}_{value}`, where the value has 32 characters for the `token` and `tkn` prefixes, and 24 for
/// `tokn`.
///
/// # Errors
///
/// If the prefix is unknown or the value has the wrong length, an error is returned.
pub fn check_token(token: &str) -> Result<(), TokenError> {
    let (prefix, value) = token.split_once('_').context(UnknownPrefix { token })?;
    let (prefix, expected) = TOKEN_FORMATS
        .iter()
        .find(|(known, _)| *known == prefix)
        .copied()
        .context(UnknownPrefix { token })?;

    let actual = value.chars().count();
    ensure!(
        actual == expected,
        InvalidLength {
            token,
            prefix,
            expected,
            actual
        }
    );

    Ok(())
}
