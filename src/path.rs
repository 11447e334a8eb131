pub const EXACT_PATH_SCORE: i64 = 20;
pub const SUFFIX_PATH_SCORE: i64 = 15;
pub const MIN_SUFFIX_SEGMENTS: usize = 2;

pub fn normalize(path: &str) -> String {
    segments(path).join("/")
}

pub fn segments(path: &str) -> Vec<String> {
    path.split(['/', '.'])
        .map(normalize_segment)
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn normalize_segment(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

pub fn full_path(collection: &str, name: &str) -> String {
    let collection = normalize(collection);
    let name = normalize(name);
    if collection.is_empty() {
        name
    } else {
        format!("{collection}/{name}")
    }
}

pub fn common_suffix_len(left: &str, right: &str) -> usize {
    let left = segments(left);
    let right = segments(right);
    left.iter()
        .rev()
        .zip(right.iter().rev())
        .take_while(|(a, b)| a == b)
        .count()
}

pub fn is_suffix_match(left: &str, right: &str) -> bool {
    common_suffix_len(left, right) >= MIN_SUFFIX_SEGMENTS
}

pub fn has_segment(path: &str, segment: &str) -> bool {
    segments(path).iter().any(|candidate| candidate == segment)
}

/// 20 for an exact match, 15 for a trailing match of two or more segments,
/// otherwise 0.
pub fn path_similarity_score(variable_name: &str, token_path: &str) -> i64 {
    let name = normalize(variable_name);
    let token = normalize(token_path);
    if name.is_empty() || token.is_empty() {
        return 0;
    }
    if name == token {
        EXACT_PATH_SCORE
    } else if is_suffix_match(&name, &token) {
        SUFFIX_PATH_SCORE
    } else {
        0
    }
}

/// Fraction of `needle`'s segments that also appear in `haystack`, in
/// `0.0..=1.0`. Used to rank suffix matches of equal length.
pub fn containment_score(haystack: &str, needle: &str) -> f64 {
    let needle = segments(needle);
    if needle.is_empty() {
        return 0.0;
    }
    let haystack = segments(haystack);
    let hits = needle
        .iter()
        .filter(|segment| haystack.contains(segment))
        .count();
    hits as f64 / needle.len() as f64
}
