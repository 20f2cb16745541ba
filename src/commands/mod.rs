//! Strategy-prefix parsing of raw chat input.
//!
//! A leading command token picks the aggregation strategy; everything after
//! the token and one separator is the actual prompt. Input without a
//! recognized prefix goes to the default race strategy untouched.

/// How a round combines the selected models' outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// First call to fully succeed wins; the rest are cancelled.
    Race,
    /// Sequential refinement chain; the last model's output is the result.
    Series,
    /// Fan out to every model, then synthesize the successes into one reply.
    Parallel,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Race => "race",
            Strategy::Series => "series",
            Strategy::Parallel => "parallel",
        }
    }
}

const STRATEGY_COMMANDS: &[(&str, Strategy)] =
    &[("parallel", Strategy::Parallel), ("series", Strategy::Series)];

/// Splits raw input into a strategy and the prompt text. Unrecognized
/// `/`-prefixed tokens are not commands and fall through whole.
pub fn parse_strategy(input: &str) -> (Strategy, &str) {
    if let Some(command) = input.strip_prefix('/') {
        for (name, strategy) in STRATEGY_COMMANDS {
            if let Some(rest) = command.strip_prefix(name) {
                if rest.is_empty() {
                    return (*strategy, "");
                }
                if let Some(prompt) = rest.strip_prefix(char::is_whitespace) {
                    return (*strategy, prompt);
                }
            }
        }
    }
    (Strategy::Race, input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_prefix_selects_series_and_strips_one_separator() {
        assert_eq!(
            parse_strategy("/series do the thing"),
            (Strategy::Series, "do the thing")
        );
    }

    #[test]
    fn parallel_prefix_selects_parallel() {
        assert_eq!(
            parse_strategy("/parallel compare these"),
            (Strategy::Parallel, "compare these")
        );
    }

    #[test]
    fn plain_input_defaults_to_race() {
        assert_eq!(parse_strategy("hello"), (Strategy::Race, "hello"));
    }

    #[test]
    fn only_one_separator_is_stripped() {
        assert_eq!(
            parse_strategy("/series  double spaced"),
            (Strategy::Series, " double spaced")
        );
    }

    #[test]
    fn bare_prefix_yields_an_empty_prompt() {
        assert_eq!(parse_strategy("/parallel"), (Strategy::Parallel, ""));
    }

    #[test]
    fn unknown_commands_fall_through_as_plain_input() {
        assert_eq!(
            parse_strategy("/serious question"),
            (Strategy::Race, "/serious question")
        );
        assert_eq!(
            parse_strategy("/parallelogram area"),
            (Strategy::Race, "/parallelogram area")
        );
    }
}
