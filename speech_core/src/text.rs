//! Word tokenization helpers used to truncate messages at a word boundary.
//!
//! Tokens follow Treebank conventions closely enough for cutoff estimation:
//! punctuation and contraction suffixes ("n't", "'s", ...) are tokens of
//! their own, and [`detokenize`] reverses the split.

use rand::Rng;

const OPENING: &[char] = &['(', '[', '{', '$', '#'];
const CLOSING: &[char] = &[')', ']', '}', ',', '.', '!', '?', ';', ':', '%'];
const CONTRACTION_SUFFIXES: &[&str] = &["'s", "'m", "'d", "'ll", "'re", "'ve"];

/// Split text into word and punctuation tokens
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split_whitespace() {
        tokenize_word(word, &mut tokens);
    }
    tokens
}

fn tokenize_word(word: &str, tokens: &mut Vec<String>) {
    let mut rest = word;

    // Leading brackets and quotes
    while let Some(c) = rest.chars().next() {
        if OPENING.contains(&c) || c == '"' {
            tokens.push(c.to_string());
            rest = &rest[c.len_utf8()..];
        } else {
            break;
        }
    }

    // Trailing punctuation, peeled from the end and restored in order
    let mut trailing = Vec::new();
    while let Some(c) = rest.chars().last() {
        if c == '.' {
            let core = rest.trim_end_matches('.');
            trailing.push(rest[core.len()..].to_string());
            rest = core;
        } else if CLOSING.contains(&c) || c == '"' {
            trailing.push(c.to_string());
            rest = &rest[..rest.len() - c.len_utf8()];
        } else {
            break;
        }
    }

    if !rest.is_empty() {
        split_contraction(rest, tokens);
    }
    tokens.extend(trailing.into_iter().rev());
}

fn split_contraction(word: &str, tokens: &mut Vec<String>) {
    let lower = word.to_lowercase();
    if lower.len() == word.len() {
        if lower.ends_with("n't") && word.len() > 3 {
            let split = word.len() - 3;
            tokens.push(word[..split].to_string());
            tokens.push(word[split..].to_string());
            return;
        }
        for suffix in CONTRACTION_SUFFIXES {
            if lower.ends_with(suffix) && word.len() > suffix.len() {
                let split = word.len() - suffix.len();
                tokens.push(word[..split].to_string());
                tokens.push(word[split..].to_string());
                return;
            }
        }
    }
    tokens.push(word.to_string());
}

/// Rebuild text from tokens, restoring punctuation spacing
pub fn detokenize<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut out = String::new();
    let mut attach_next = false;
    let mut in_quote = false;

    for token in tokens {
        let token = token.as_ref();
        let is_closing = token.chars().all(|c| CLOSING.contains(&c))
            || token.eq_ignore_ascii_case("n't")
            || CONTRACTION_SUFFIXES
                .iter()
                .any(|s| s.eq_ignore_ascii_case(token));

        if token == "\"" {
            if in_quote {
                out.push('"');
                attach_next = false;
            } else {
                if !out.is_empty() && !attach_next {
                    out.push(' ');
                }
                out.push('"');
                attach_next = true;
            }
            in_quote = !in_quote;
            continue;
        }

        if !out.is_empty() && !attach_next && !is_closing {
            out.push(' ');
        }
        out.push_str(token);
        attach_next = token.len() == 1 && token.chars().all(|c| OPENING.contains(&c));
    }

    out
}

/// Whitespace-delimited word count
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Make a message sound less scripted by inserting hesitations.
///
/// Every "this", "that" or "but" is followed by "uh -" or "um -", chosen
/// with equal probability.
pub fn make_disfluency<R: Rng + ?Sized>(message: &str, rng: &mut R) -> String {
    const PRE_WORDS: &[&str] = &["this", "that", "but"];

    let mut words = Vec::new();
    for word in message.split_whitespace() {
        words.push(word);
        if PRE_WORDS.contains(&word.to_lowercase().as_str()) {
            words.push(if rng.gen_bool(0.5) { "uh -" } else { "um -" });
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_tokenize_punctuation_and_contractions() {
        assert_eq!(
            tokenize("I can't go, sorry."),
            vec!["I", "ca", "n't", "go", ",", "sorry", "."]
        );
        assert_eq!(tokenize("It's (mostly) fine!"), vec!["It", "'s", "(", "mostly", ")", "fine", "!"]);
        assert_eq!(tokenize("Wait..."), vec!["Wait", "..."]);
    }

    #[test]
    fn test_detokenize_restores_text() {
        for text in [
            "I can't go, sorry.",
            "It's (mostly) fine!",
            "She said \"hello there\" to me.",
            "Costs $5 today; maybe 10% more tomorrow?",
        ] {
            assert_eq!(detokenize(&tokenize(text)), text);
        }
    }

    #[test]
    fn test_detokenize_prefix() {
        let tokens = tokenize("Hello, how are you?");
        assert_eq!(detokenize(&tokens[..2]), "Hello,");
        assert_eq!(detokenize(&tokens[..0]), "");
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("  one two\tthree \n"), 3);
    }

    #[test]
    fn test_make_disfluency_inserts_after_trigger_words() {
        let mut rng = StdRng::seed_from_u64(7);
        let result = make_disfluency("I think this is nice but that is odd", &mut rng);
        let fillers = result.matches("uh -").count() + result.matches("um -").count();
        assert_eq!(fillers, 3);
        assert!(result.starts_with("I think this u"));
    }

    #[test]
    fn test_make_disfluency_leaves_other_text_alone() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(make_disfluency("hello   world", &mut rng), "hello world");
    }
}
