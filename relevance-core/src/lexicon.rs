//! Static keyword tables used by lexical extraction and salience scoring.

/// Emotion lexicon: phrase, valence contribution, intensity.
///
/// Matched case-insensitively against normalized text. Multi-word phrases
/// are checked as substrings; single words as whole tokens.
pub const EMOTION_LEXICON: &[(&str, f32, f32)] = &[
    ("passed away", -0.9, 1.0),
    ("died", -0.9, 1.0),
    ("death", -0.8, 0.9),
    ("funeral", -0.8, 0.9),
    ("cancer", -0.8, 0.9),
    ("hospital", -0.6, 0.7),
    ("diagnosed", -0.6, 0.8),
    ("divorce", -0.7, 0.8),
    ("fired", -0.7, 0.8),
    ("laid off", -0.7, 0.8),
    ("heartbroken", -0.9, 1.0),
    ("devastated", -0.9, 1.0),
    ("furious", -0.8, 0.9),
    ("angry", -0.6, 0.7),
    ("worried", -0.4, 0.5),
    ("anxious", -0.5, 0.6),
    ("scared", -0.6, 0.7),
    ("crying", -0.7, 0.8),
    ("hate", -0.7, 0.7),
    ("terrible", -0.6, 0.6),
    ("awful", -0.6, 0.6),
    ("stressed", -0.5, 0.6),
    ("love", 0.8, 0.8),
    ("thrilled", 0.8, 0.8),
    ("excited", 0.7, 0.7),
    ("wonderful", 0.7, 0.6),
    ("amazing", 0.7, 0.6),
    ("proud", 0.7, 0.6),
    ("engaged", 0.7, 0.7),
    ("married", 0.7, 0.7),
    ("promoted", 0.7, 0.7),
    ("pregnant", 0.6, 0.8),
    ("congratulations", 0.6, 0.5),
    ("grateful", 0.6, 0.5),
    ("happy", 0.6, 0.5),
    ("celebrated", 0.6, 0.5),
];

/// Verbs that lexically assert completion of an obligation.
pub const COMPLETION_VERBS: &[&str] = &[
    "done", "sent", "paid", "finished", "delivered", "returned", "completed", "submitted",
    "shipped",
];

/// Markers of conflict or vulnerability in a relationship, feeding the
/// social-weight salience signal.
pub const SOCIAL_MARKERS: &[&str] = &[
    "passed away",
    "died",
    "funeral",
    "divorce",
    "broke up",
    "fight",
    "fought",
    "argument",
    "argued",
    "apologized",
    "apology",
    "confided",
    "secret",
    "vulnerable",
    "sick",
    "hospital",
    "diagnosed",
    "father",
    "mother",
    "brother",
    "sister",
    "family",
    "wedding",
    "birthday",
    "anniversary",
];

/// Markers of consequence: money, deadlines, obligations.
pub const CONSEQUENCE_MARKERS: &[&str] = &[
    "deadline",
    "due",
    "by friday",
    "by monday",
    "by tuesday",
    "by wednesday",
    "by thursday",
    "by saturday",
    "by sunday",
    "tomorrow",
    "tonight",
    "contract",
    "invoice",
    "rent",
    "budget",
    "pay",
    "paid",
    "owe",
    "owes",
    "loan",
    "fee",
    "fine",
    "tax",
    "appointment",
    "interview",
    "flight",
    "moved to",
    "rescheduled",
    "cancelled",
];

/// Topics appended to a relationship's sensitivities when mentioned
/// alongside that person.
pub const SENSITIVE_TOPICS: &[&str] = &[
    "death", "funeral", "divorce", "illness", "cancer", "debt", "firing", "miscarriage",
    "addiction", "custody",
];

/// Words ignored when building the per-user vocabulary and topic set.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has", "have",
    "he", "her", "his", "i", "if", "in", "into", "is", "it", "its", "ll", "me", "my", "of", "on",
    "or", "our", "s", "she", "so", "t", "that", "the", "their", "them", "they", "this", "to",
    "was", "we", "were", "will", "with", "you", "your",
];

/// Check whether a token is a stopword.
#[must_use]
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Sum of valence and intensity contributions from emotion lexicon hits.
///
/// Returns `(valence, intensity, hit_count)`; valence is the
/// intensity-weighted mean of hit valences.
#[must_use]
pub fn emotion_hits(lower_text: &str) -> (f32, f32, usize) {
    let mut weighted_valence = 0.0_f32;
    let mut total_intensity = 0.0_f32;
    let mut hits = 0_usize;
    for (phrase, valence, intensity) in EMOTION_LEXICON {
        let matched = if phrase.contains(' ') {
            lower_text.contains(phrase)
        } else {
            lower_text
                .split(|c: char| !c.is_alphanumeric())
                .any(|token| token == *phrase)
        };
        if matched {
            weighted_valence += valence * intensity;
            total_intensity += intensity;
            hits += 1;
        }
    }
    if hits == 0 {
        (0.0, 0.0, 0)
    } else {
        (
            (weighted_valence / total_intensity).clamp(-1.0, 1.0),
            (total_intensity / hits as f32).clamp(0.0, 1.0),
            hits,
        )
    }
}

/// Count hits from a marker table, substring-matched for phrases and
/// token-matched for single words.
#[must_use]
pub fn marker_hits(lower_text: &str, markers: &[&str]) -> usize {
    markers
        .iter()
        .filter(|marker| {
            if marker.contains(' ') {
                lower_text.contains(*marker)
            } else {
                lower_text
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|token| token == **marker)
            }
        })
        .count()
}
