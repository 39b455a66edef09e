//! Signal extraction: keyword heuristics over free text
//!
//! Two vocabularies:
//! - **Bystander speech** (`parse_user_text`): clause-scoped co-occurrence of a
//!   negator and a domain term ("he's not breathing", "can't feel anything").
//! - **Model output** (`parse_model_text`): explicit observation phrases in the
//!   assistant's own declarative sentences ("No pulse detected.").
//!
//! In both, a negative signal for a field beats a positive one seen in the
//! same input. Nothing here fails: unmatched input yields an empty update.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{
    Airway, AssessmentRecord, AssessmentUpdate, Breathing, Pulse, Responsiveness,
};

const MARKER_PATTERN: &str = r"(?i)\[\s*MARKER\s*:\s*(\w+)\s*\]";

const NEGATORS: &[&str] = &[
    "not", "no", "isn't", "isnt", "aren't", "arent", "wasn't", "wasnt", "don't", "dont",
    "doesn't", "doesnt", "didn't", "didnt", "can't", "cant", "cannot", "couldn't", "couldnt",
    "won't", "wont", "never", "without", "stopped", "nothing", "none", "nope",
];

const CLAUSE_BREAKS: &[&str] = &["but", "and", "though", "although", "while"];

const BREATHING_TERMS: &[&str] = &["breathing", "breathe", "breathes", "breath", "breaths"];
const CHEST_MOTION_TERMS: &[&str] = &["moving", "move", "moves", "movement", "rising", "rise"];
const PULSE_TERMS: &[&str] = &["pulse", "heartbeat"];
const RESPONSE_TERMS: &[&str] = &[
    "responsive", "responding", "respond", "responds", "response", "conscious", "awake",
    "moving", "move", "moves", "answering",
];
const UNRESPONSIVE_TERMS: &[&str] = &["unresponsive", "unconscious"];

/// Short negative answers that carry no domain term of their own.
const BARE_NEGATIVES: &[&str] = &["no", "nothing", "nope", "none"];
const BARE_ANSWER_MAX_TOKENS: usize = 4;

const CPR_DIRECTIVES: &[&str] = &[
    "begin cpr",
    "start cpr",
    "perform cpr",
    "cpr now",
    "begin chest compressions",
    "start chest compressions",
];

/// Negations that cancel a CPR directive when they sit just before it.
const PROHIBITIONS: &[&str] = &[
    "not", "don't", "dont", "never", "cannot", "can't", "cant", "shouldn't", "shouldnt",
];
const PROHIBITION_WINDOW: usize = 2;

/// Words that make a model sentence conditional rather than an observation.
const CONDITIONAL_WORDS: &[&str] = &["if", "whether"];
/// Instruction verbs; a sentence carrying one can still report an absence.
const INSTRUCTION_WORDS: &[&str] = &["check", "look", "listen", "feel", "see"];

const BREATHING_ABSENT: &[&str] = &[
    "not breathing",
    "no breathing",
    "isn't breathing",
    "stopped breathing",
    "breathing is absent",
    "breathing absent",
    "no signs of breathing",
];
const BREATHING_PRESENT: &[&str] = &[
    "is breathing",
    "are breathing",
    "they're breathing",
    "breathing normally",
    "breathing is present",
    "breathing present",
    "breathing detected",
];
const PULSE_ABSENT: &[&str] = &[
    "no pulse",
    "pulse absent",
    "pulse is absent",
    "without a pulse",
    "no heartbeat",
];
const PULSE_PRESENT: &[&str] = &[
    "pulse found",
    "found a pulse",
    "pulse present",
    "pulse is present",
    "pulse detected",
    "has a pulse",
    "there is a pulse",
];
const RESPONSIVE_NO: &[&str] = &[
    "not responsive",
    "unresponsive",
    "unconscious",
    "not responding",
    "no response",
];
const RESPONSIVE_YES: &[&str] = &[
    "is responsive",
    "are responsive",
    "is conscious",
    "are conscious",
    "is awake",
    "is responding",
    "are responding",
];
const AIRWAY_BLOCKED: &[&str] = &[
    "airway blocked",
    "airway is blocked",
    "airway obstruction",
    "obstructed",
    "obstruction",
    "choking",
];
const AIRWAY_CLEAR: &[&str] = &["airway clear", "airway is clear", "airway is open", "airway open"];

// ============================================================================
// Markers
// ============================================================================

/// Body locations the AR overlay knows how to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMarker {
    Neck,
    Chest,
    Chin,
}

impl BodyMarker {
    /// `head` is an alias for the chin-lift marker.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "neck" => Some(Self::Neck),
            "chest" => Some(Self::Chest),
            "chin" | "head" => Some(Self::Chin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neck => "neck",
            Self::Chest => "chest",
            Self::Chin => "chin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerExtraction {
    pub clean_text: String,
    pub marker: Option<String>,
}

fn marker_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MARKER_PATTERN).ok()).as_ref()
}

/// Pull the first `[MARKER:name]` out of model output and strip every tag.
pub fn extract_marker(text: &str) -> MarkerExtraction {
    let Some(re) = marker_regex() else {
        return MarkerExtraction {
            clean_text: text.trim().to_string(),
            marker: None,
        };
    };

    let marker = re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    MarkerExtraction {
        clean_text: re.replace_all(text, "").trim().to_string(),
        marker,
    }
}

// ============================================================================
// Bystander speech
// ============================================================================

fn tokenize(chunk: &str) -> Vec<String> {
    chunk
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split into clauses at punctuation and at contrastive/coordinating words,
/// so "breathing, but no pulse" scores each half separately.
fn clauses(text: &str) -> Vec<Vec<String>> {
    let normalized = text.to_lowercase().replace('\u{2019}', "'");
    let mut out = Vec::new();

    for chunk in normalized.split(|c: char| matches!(c, '.' | ',' | ';' | '!' | '?' | '\n')) {
        let mut current = Vec::new();
        for token in tokenize(chunk) {
            if CLAUSE_BREAKS.contains(&token.as_str()) {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            } else {
                current.push(token);
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
    }

    out
}

fn has_any(tokens: &[String], terms: &[&str]) -> bool {
    tokens.iter().any(|t| terms.contains(&t.as_str()))
}

/// Tracks what one input said about a field; negative wins.
#[derive(Default)]
struct Votes {
    negative: bool,
    positive: bool,
}

impl Votes {
    fn cast(&mut self, negated: bool) {
        if negated {
            self.negative = true;
        } else {
            self.positive = true;
        }
    }

    fn resolve<T>(&self, negative: T, positive: T) -> Option<T> {
        if self.negative {
            Some(negative)
        } else if self.positive {
            Some(positive)
        } else {
            None
        }
    }
}

/// Parse a bystander transcript into assessment updates.
///
/// A short bare negative ("nothing", "no") answers the first of
/// responsiveness / breathing / pulse still unknown in `current`, following
/// the order the assessment asks about them. Bare affirmatives carry no
/// signal: they usually acknowledge an instruction.
pub fn parse_user_text(text: &str, current: &AssessmentRecord) -> AssessmentUpdate {
    let mut breathing = Votes::default();
    let mut pulse = Votes::default();
    let mut responsive = Votes::default();
    let mut bare_negative = false;

    for clause in clauses(text) {
        let negated = has_any(&clause, NEGATORS);
        let mentions_chest = clause.iter().any(|t| t == "chest");
        let mentions_breathing = has_any(&clause, BREATHING_TERMS)
            || (mentions_chest && has_any(&clause, CHEST_MOTION_TERMS));
        let mentions_pulse = has_any(&clause, PULSE_TERMS);
        let mut matched = false;

        if mentions_breathing {
            breathing.cast(negated);
            matched = true;
        }

        if mentions_pulse {
            pulse.cast(negated);
            matched = true;
        } else if negated && !mentions_breathing && clause.iter().any(|t| t == "feel") {
            // "can't feel anything" while checking the neck
            pulse.cast(true);
            matched = true;
        }

        if has_any(&clause, UNRESPONSIVE_TERMS) {
            responsive.cast(true);
            matched = true;
        } else if !mentions_breathing && has_any(&clause, RESPONSE_TERMS) {
            responsive.cast(negated);
            matched = true;
        }

        if !matched
            && clause.len() <= BARE_ANSWER_MAX_TOKENS
            && has_any(&clause, BARE_NEGATIVES)
        {
            bare_negative = true;
        }
    }

    let mut update = AssessmentUpdate {
        responsive: responsive.resolve(Responsiveness::No, Responsiveness::Yes),
        breathing: breathing.resolve(Breathing::Absent, Breathing::Present),
        pulse: pulse.resolve(Pulse::Absent, Pulse::Present),
        ..Default::default()
    };

    if bare_negative && update.is_empty() {
        if current.responsive == Responsiveness::Unknown {
            update.responsive = Some(Responsiveness::No);
        } else if current.breathing == Breathing::Unknown {
            update.breathing = Some(Breathing::Absent);
        } else if current.pulse == Pulse::Unknown {
            update.pulse = Some(Pulse::Absent);
        }
    }

    update
}

// ============================================================================
// Model output
// ============================================================================

/// One declarative sentence of the model's reply, lowercased with whitespace
/// collapsed.
struct Observation {
    text: String,
    /// Carries an instruction verb ("feel for a pulse"), so a positive phrase
    /// in it is not evidence: "Check they are breathing" is not an
    /// observation that they are.
    instructive: bool,
}

/// Questions and conditionals ("If there's no pulse, ...") are dropped
/// entirely. Negative phrases in instructive sentences still count.
fn observations(text: &str) -> Vec<Observation> {
    let normalized = text.to_lowercase().replace('\u{2019}', "'");
    let mut out = Vec::new();
    let mut start = 0;

    for (i, c) in normalized.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let sentence = &normalized[start..i];
            if c != '?' {
                push_observation(&mut out, sentence);
            }
            start = i + c.len_utf8();
        }
    }
    push_observation(&mut out, &normalized[start..]);

    out
}

fn push_observation(out: &mut Vec<Observation>, sentence: &str) {
    let tokens = tokenize(sentence);
    if tokens.is_empty() || has_any(&tokens, CONDITIONAL_WORDS) {
        return;
    }
    out.push(Observation {
        text: sentence.split_whitespace().collect::<Vec<_>>().join(" "),
        instructive: has_any(&tokens, INSTRUCTION_WORDS),
    });
}

fn phrase_votes(sentences: &[Observation], negative: &[&str], positive: &[&str]) -> Votes {
    let mut votes = Votes::default();
    for s in sentences {
        if negative.iter().any(|p| s.text.contains(p)) {
            votes.cast(true);
        } else if !s.instructive && positive.iter().any(|p| s.text.contains(p)) {
            votes.cast(false);
        }
    }
    votes
}

/// Parse the assistant's own phrasing into assessment updates.
pub fn parse_model_text(text: &str) -> AssessmentUpdate {
    let sentences = observations(text);

    AssessmentUpdate {
        responsive: phrase_votes(&sentences, RESPONSIVE_NO, RESPONSIVE_YES)
            .resolve(Responsiveness::No, Responsiveness::Yes),
        airway: phrase_votes(&sentences, AIRWAY_BLOCKED, AIRWAY_CLEAR)
            .resolve(Airway::Blocked, Airway::Clear),
        breathing: phrase_votes(&sentences, BREATHING_ABSENT, BREATHING_PRESENT)
            .resolve(Breathing::Absent, Breathing::Present),
        pulse: phrase_votes(&sentences, PULSE_ABSENT, PULSE_PRESENT)
            .resolve(Pulse::Absent, Pulse::Present),
        ..Default::default()
    }
}

// ============================================================================
// Escalation predicate
// ============================================================================

/// True when the model directs CPR, or the record shows no pulse and no
/// breathing. Call with the record after this turn's updates are merged.
pub fn should_escalate(model_text: &str, record: &AssessmentRecord) -> bool {
    record.indicates_arrest() || clauses(model_text).iter().any(|c| directs_cpr(c))
}

/// A CPR directive in the clause with no prohibition right before it:
/// "Do not start CPR" does not count, "No pulse, begin CPR" does.
fn directs_cpr(clause: &[String]) -> bool {
    CPR_DIRECTIVES.iter().any(|directive| {
        let words: Vec<&str> = directive.split_whitespace().collect();
        clause
            .windows(words.len())
            .enumerate()
            .filter(|(_, w)| w.iter().zip(&words).all(|(t, d)| t == d))
            .any(|(at, _)| {
                let before = &clause[at.saturating_sub(PROHIBITION_WINDOW)..at];
                !has_any(before, PROHIBITIONS)
            })
    })
}

// ============================================================================
// TESTS
// ============================================================================
