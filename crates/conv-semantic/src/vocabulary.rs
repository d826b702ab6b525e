use conv_core::category_key;

/// Controlled vocabulary of loss categories. Matching is case-insensitive and treats `_` and
/// spaces as `-`; the spelling here is the canonical one written to reports.
pub const KNOWN_CATEGORIES: &[&str] = &[
    "RAII",
    "smart-pointers",
    "type-erasure",
    "async-control-flow",
    "exceptions",
    "templates",
    "generics",
    "operator-overloading",
    "function-overloading",
    "namespaces",
    "inheritance",
    "virtual-dispatch",
    "move-semantics",
    "references",
    "lambdas",
    "closures",
    "iterators",
    "memory-safety",
    "bounds-checking",
    "implicit-conversions",
    "nullability",
    "type-inference",
    "dynamic-typing",
    "garbage-collection",
    "string-encoding",
    "integer-overflow",
    "error-handling",
    "const-correctness",
    "access-control",
    "standard-library",
];

/// Canonical spelling and whether the category is in the vocabulary. Unknown categories are
/// kept (trimmed) as new categories.
pub fn canonical_category(raw: &str) -> (String, bool) {
    let folded = category_key(raw);
    match KNOWN_CATEGORIES.iter().find(|k| category_key(k) == folded) {
        Some(k) => (k.to_string(), true),
        None => (raw.trim().to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spelling_variants_fold_to_canonical() {
        assert_eq!(canonical_category("raii"), ("RAII".to_string(), true));
        assert_eq!(canonical_category("Smart_Pointers"), ("smart-pointers".to_string(), true));
        assert_eq!(canonical_category(" async control flow "), ("async-control-flow".to_string(), true));
    }

    #[test]
    fn unknown_category_is_kept() {
        assert_eq!(canonical_category(" coroutines "), ("coroutines".to_string(), false));
    }
}
