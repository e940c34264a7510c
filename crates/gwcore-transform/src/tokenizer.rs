use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

static CL100K: OnceLock<CoreBPE> = OnceLock::new();
static O200K: OnceLock<CoreBPE> = OnceLock::new();

fn cl100k() -> &'static CoreBPE {
    CL100K.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base vocabulary is embedded"))
}

fn o200k() -> &'static CoreBPE {
    O200K.get_or_init(|| tiktoken_rs::o200k_base().expect("o200k_base vocabulary is embedded"))
}

/// Claude-family models are estimated with a simple whitespace/punctuation
/// heuristic rather than a borrowed OpenAI BPE vocabulary: roughly 1 token
/// per 4 characters, which tracks Anthropic's published average closely
/// enough for the rate-limit/usage-estimation purposes this gateway uses
/// it for (it is never the billed count — that comes from provider
/// `usage` blocks when available).
fn estimate_claude_tokens(text: &str) -> i64 {
    let chars = text.chars().count() as i64;
    (chars + 3) / 4
}

/// Local token estimate for `text`, using the tokenizer appropriate to
/// `model_name` (spec §4.6 step 3): Claude-family models use an embedded
/// Anthropic-compatible approximation, newer OpenAI models use
/// `o200k_base`, and everything else falls back to `cl100k_base`.
pub fn count_tokens(model_name: &str, text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    let model = model_name.to_ascii_lowercase();
    if model.contains("claude") {
        return estimate_claude_tokens(text);
    }
    let bpe = if is_o200k_model(&model) { o200k() } else { cl100k() };
    bpe.encode_with_special_tokens(text).len() as i64
}

fn is_o200k_model(model: &str) -> bool {
    model.starts_with("gpt-4o") || model.starts_with("o1") || model.starts_with("o3") || model.starts_with("gpt-5")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(count_tokens("gpt-4o", ""), 0);
    }

    #[test]
    fn claude_models_use_the_character_heuristic() {
        let estimate = count_tokens("claude-3-5-sonnet-20241022", "hello world");
        assert!(estimate > 0 && estimate < 11);
    }

    #[test]
    fn gpt4_uses_cl100k_and_counts_more_than_one_token_for_a_sentence() {
        let count = count_tokens("gpt-4", "The quick brown fox jumps over the lazy dog.");
        assert!(count >= 8);
    }
}
