//! Human-readable display names for model files.
//!
//! Model filenames pack the interesting bits into one kebab/snake string,
//! e.g. `smollm2-1.7b-instruct-q4_k_m.gguf`. The prettifier pulls out the
//! parameter-count and quantization tokens and title-cases the rest:
//! `Smollm2 Instruct 1.7B (Q4_K_M)`.

use std::path::Path;

/// Display name for a model file path, derived from its filename.
pub fn display_name(path: &Path) -> String {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    readable_name(&filename)
}

/// Display name for a bare model filename. Falls back to the filename
/// itself when nothing useful can be extracted.
pub fn readable_name(filename: &str) -> String {
    let mut stem = filename;
    for ext in [".gguf", ".bin"] {
        let Some(split_at) = stem.len().checked_sub(ext.len()) else {
            continue;
        };
        if stem
            .get(split_at..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(ext))
        {
            stem = &stem[..split_at];
            break;
        }
    }
    for prefix in ["hf_", "hf-"] {
        if stem
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            stem = &stem[prefix.len()..];
            break;
        }
    }

    let tokens: Vec<&str> = stem
        .split(['_', '-', ' '])
        .filter(|token| !token.is_empty())
        .collect();

    let mut size: Option<String> = None;
    let mut quant: Option<String> = None;
    let mut words: Vec<String> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];

        if size.is_none() {
            if let Some(parsed) = parse_size(token) {
                size = Some(parsed);
                i += 1;
                continue;
            }
        }

        if quant.is_none() && is_quant_start(token) {
            let mut parts = vec![token.to_ascii_uppercase()];
            let mut j = i + 1;
            while j < tokens.len() && is_quant_continuation(tokens[j]) {
                parts.push(tokens[j].to_ascii_uppercase());
                j += 1;
            }
            quant = Some(parts.join("_"));
            i = j;
            continue;
        }

        words.push(title_case(token));
        i += 1;
    }

    let mut display = words.join(" ");
    if let Some(size) = size {
        if !display.is_empty() {
            display.push(' ');
        }
        display.push_str(&size);
    }
    if let Some(quant) = quant {
        if !display.is_empty() {
            display.push(' ');
        }
        display.push_str(&format!("({quant})"));
    }

    if display.is_empty() {
        filename.to_string()
    } else {
        display
    }
}

/// Parameter-count token: digits (optionally with a decimal point) followed
/// by `b`/`B`, e.g. `7b`, `1.7B`.
fn parse_size(token: &str) -> Option<String> {
    let digits = token.strip_suffix(['b', 'B'])?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    digits.parse::<f64>().ok()?;
    Some(format!("{digits}B"))
}

/// Quantization lead token, e.g. `q4`, `Q8`.
fn is_quant_start(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some('q') | Some('Q'))
        && token.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

/// Short follow-up tokens of a split quantization suffix: `K`, `M`, `0`…
fn is_quant_continuation(token: &str) -> bool {
    if token.is_empty() || token.len() > 2 {
        return false;
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    matches!(
        token.to_ascii_lowercase().as_str(),
        "k" | "m" | "s" | "l" | "xs" | "xl"
    )
}

fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_size_and_quantization() {
        assert_eq!(
            readable_name("smollm2-1.7b-instruct-q4_k_m.gguf"),
            "Smollm2 Instruct 1.7B (Q4_K_M)"
        );
        assert_eq!(readable_name("tiny-1b-q4_0.gguf"), "Tiny 1B (Q4_0)");
        assert_eq!(readable_name("llama-2-13B-chat-Q8_0.gguf"), "Llama 2 Chat 13B (Q8_0)");
    }

    #[test]
    fn test_strips_hf_prefix_and_extension() {
        assert_eq!(readable_name("hf_phi-3-mini.gguf"), "Phi 3 Mini");
        assert_eq!(readable_name("model.GGUF"), "Model");
    }

    #[test]
    fn test_plain_words_are_title_cased() {
        assert_eq!(readable_name("mistral_instruct.gguf"), "Mistral Instruct");
    }

    #[test]
    fn test_falls_back_to_filename_when_nothing_remains() {
        assert_eq!(readable_name("---.gguf"), "---.gguf");
    }

    #[test]
    fn test_display_name_uses_only_the_filename() {
        assert_eq!(
            display_name(Path::new("/models/deep/tiny-1b-q4_0.gguf")),
            "Tiny 1B (Q4_0)"
        );
    }
}
