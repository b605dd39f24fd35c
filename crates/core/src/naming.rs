//! Model name normalization for cross-source duplicate candidates.
//!
//! Different stores spell the same model differently (`llama3.2:7b` versus
//! `org/Llama-3.2-7B-4bit`). The normalized form is only ever used to pick
//! candidates; content hashes decide identity.

/// Quantization and packaging markers stripped from the end of a name.
const VARIANT_SUFFIXES: &[&str] = &[
    "q2_k", "q3_k_s", "q3_k_m", "q3_k_l", "q4_0", "q4_1", "q4_k_s", "q4_k_m", "q5_0", "q5_1",
    "q5_k_s", "q5_k_m", "q6_k", "q8_0", "fp16", "bf16", "fp32", "f16", "f32", "int4", "int8",
    "awq", "gptq", "gguf", "mlx", "latest",
];

const SEPARATORS: &[char] = &['-', '_', ':', '.', ' '];

/// Normalize a model name for candidate matching.
pub fn normalize_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let base = lower.rsplit('/').next().unwrap_or(&lower);
    let mut s = base.trim_matches(SEPARATORS).to_string();

    loop {
        let before = s.len();
        for suffix in VARIANT_SUFFIXES {
            s = strip_marker(&s, suffix);
        }
        s = strip_bit_marker(&s);
        if s.len() == before {
            break;
        }
    }

    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Strip `marker` from the end of `s` when it forms its own separator-delimited segment.
fn strip_marker(s: &str, marker: &str) -> String {
    match s.strip_suffix(marker) {
        Some(head) if head.ends_with(SEPARATORS) => head.trim_end_matches(SEPARATORS).to_string(),
        _ => s.to_string(),
    }
}

/// Strip trailing `4bit`, `8-bit`, `3bit` style markers.
fn strip_bit_marker(s: &str) -> String {
    let Some(head) = s.strip_suffix("bit") else {
        return s.to_string();
    };
    let head = head.strip_suffix('-').unwrap_or(head);
    let digits = head.len() - head.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return s.to_string();
    }
    let rest = &head[..head.len() - digits];
    if rest.ends_with(SEPARATORS) {
        rest.trim_end_matches(SEPARATORS).to_string()
    } else {
        s.to_string()
    }
}
