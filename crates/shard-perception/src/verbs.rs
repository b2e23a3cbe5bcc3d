//! Static `VerbCorpus` and the 12-regex-verb-family fallback parser used
//! when the `Transducer` is unavailable or fails.

use kernel_api::ParsedIntent;
use regex::Regex;
use shard_types::Atom;
use std::sync::LazyLock;

/// One entry of the fallback parser: a regex matched against the start of
/// the input, the verb atom it maps to, and the category its verb class
/// belongs to.
struct VerbFamily {
    pattern: &'static str,
    verb: &'static str,
    category: &'static str,
}

/// 12 verb families grouped into 3 categories; category is derived from
/// verb class.
const VERB_FAMILIES: &[VerbFamily] = &[
    // file category
    VerbFamily { pattern: r"(?i)^(read|view|show|cat|display)\b", verb: "read", category: "file" },
    VerbFamily { pattern: r"(?i)^(write|create|add)\b", verb: "write", category: "file" },
    VerbFamily { pattern: r"(?i)^(edit|modify|update|change)\b", verb: "edit", category: "file" },
    VerbFamily { pattern: r"(?i)^(delete|remove|rm)\b", verb: "delete", category: "file" },
    VerbFamily { pattern: r"(?i)^(move|rename|mv)\b", verb: "move", category: "file" },
    VerbFamily { pattern: r"(?i)^(copy|cp|duplicate)\b", verb: "copy", category: "file" },
    // discovery category
    VerbFamily { pattern: r"(?i)^(search|find|grep)\b", verb: "search", category: "discovery" },
    VerbFamily { pattern: r"(?i)^(list|ls|enumerate)\b", verb: "list", category: "discovery" },
    // process category
    VerbFamily { pattern: r"(?i)^(run|execute|exec)\b", verb: "run", category: "process" },
    VerbFamily { pattern: r"(?i)^(test|check|verify)\b", verb: "test", category: "process" },
    VerbFamily { pattern: r"(?i)^(build|compile)\b", verb: "build", category: "process" },
    VerbFamily { pattern: r"(?i)^(deploy|publish|release)\b", verb: "deploy", category: "process" },
];

static COMPILED: LazyLock<Vec<(Regex, &'static VerbFamily)>> = LazyLock::new(|| {
    VERB_FAMILIES
        .iter()
        .map(|f| (Regex::new(f.pattern).expect("static verb-family regex is valid"), f))
        .collect()
});

/// All verbs the static corpus recognizes, independent of the regex
/// fallback — used by `Perception` to classify a `Transducer`-parsed verb
/// without re-running the regex match.
pub fn verb_corpus_contains(verb: &Atom) -> bool {
    VERB_FAMILIES.iter().any(|f| f.verb == verb.stripped())
}

pub fn category_for_verb(verb: &Atom) -> Option<Atom> {
    VERB_FAMILIES
        .iter()
        .find(|f| f.verb == verb.stripped())
        .map(|f| Atom::new(f.category))
}

/// Deterministic regex fallback. Returns `None` if no family matches;
/// callers should then emit `intent_unknown(.., /no_verb_match)`.
///
/// Constraint defaults to the raw input and confidence is fixed at 0.6.
pub fn fallback_parse(input: &str) -> Option<ParsedIntent> {
    let trimmed = input.trim();
    for (re, family) in COMPILED.iter() {
        if let Some(m) = re.find(trimmed) {
            let rest = trimmed[m.end()..].trim();
            let target = if rest.is_empty() { None } else { Some(rest.to_string()) };
            return Some(ParsedIntent {
                category: Atom::new(family.category),
                verb: Atom::new(family.verb),
                target,
                constraint: Some(trimmed.to_string()),
                confidence: 0.6,
            });
        }
    }
    None
}
