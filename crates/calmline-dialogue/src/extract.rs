//! Field extraction for the intake flow.
//!
//! Every extractor takes a raw transcript and returns `None` when the field
//! is absent or fails validation, which makes the flow re-prompt.

use regex::Regex;
use std::sync::LazyLock;

use crate::text::{contains_any, contains_phrase, normalize};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:my name is|my name's|my names|name is|name's|this is|i am|i'm|im|call me)\s+([a-z][a-z'\-]*(?:\s+[a-z][a-z'\-]*){0,3})",
    )
    .expect("invalid name regex")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[\s.\-]?)?\(?(\d{3})\)?[\s.\-]?(\d{3})[\s.\-]?(\d{4})\b")
        .expect("invalid phone regex")
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z0-9][a-z0-9._%+\-]*@[a-z0-9][a-z0-9.\-]*\.[a-z]{2,})\b")
        .expect("invalid email regex")
});

static SPOKEN_AT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+at\s+").expect("invalid spoken-at regex"));

static SPOKEN_DOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+dot\s+").expect("invalid spoken-dot regex"));

static AGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})(?:\s*|-)(?:years?|yrs?)?(?:\s*|-)old\b|\b(?:age|aged|is|turned|turning|'s)\s+(\d{1,2})\b|\b(\d{1,2})\s*(?:years?|yrs?)\b",
    )
    .expect("invalid age regex")
});

static PARTNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:partner|spouse|husband|wife|boyfriend|girlfriend|fiance|fiancee)(?:'s|s)?\s+(?:name\s+is\s+|is\s+named\s+|is\s+called\s+|is\s+)?([a-z][a-z'\-]*(?:\s+[a-z][a-z'\-]*){0,2})",
    )
    .expect("invalid partner regex")
});

static CHILD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:his|her|their|my (?:son|daughter|child|kid)(?:'s)?)\s+name\s+is|named|called|my son|my daughter)\s+([a-z][a-z'\-]*(?:\s+[a-z][a-z'\-]*){0,2})",
    )
    .expect("invalid child name regex")
});

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:after|before|around|at)?\s*(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)")
        .expect("invalid clock regex")
});

/// Words that end a spoken name.
const NAME_STOPWORDS: &[&str] = &[
    "and", "my", "phone", "number", "email", "i", "im", "live", "living", "from", "in", "calling",
    "looking", "interested", "not", "just", "here", "trying", "wondering", "a", "the", "so",
    "really", "sorry", "fine", "good", "ok", "okay", "yes", "no", "at", "is", "she", "he",
    "they", "who", "but", "with", "for", "to", "calling", "hoping", "available", "going",
];

const NUMBER_WORDS: &[(&str, &str)] = &[
    ("zero", "0"),
    ("oh", "0"),
    ("one", "1"),
    ("two", "2"),
    ("three", "3"),
    ("four", "4"),
    ("five", "5"),
    ("six", "6"),
    ("seven", "7"),
    ("eight", "8"),
    ("nine", "9"),
    ("ten", "10"),
    ("eleven", "11"),
    ("twelve", "12"),
    ("thirteen", "13"),
    ("fourteen", "14"),
    ("fifteen", "15"),
    ("sixteen", "16"),
    ("seventeen", "17"),
    ("eighteen", "18"),
];

const CALLER_ID_PHRASES: &[&str] = &[
    "this number",
    "same number",
    "number im calling from",
    "the number i called from",
    "number you have",
    "number on file",
];

/// Full state name, postal code.
const STATES: &[(&str, &str)] = &[
    ("Alabama", "AL"),
    ("Alaska", "AK"),
    ("Arizona", "AZ"),
    ("Arkansas", "AR"),
    ("California", "CA"),
    ("Colorado", "CO"),
    ("Connecticut", "CT"),
    ("Delaware", "DE"),
    ("District of Columbia", "DC"),
    ("Florida", "FL"),
    ("Georgia", "GA"),
    ("Hawaii", "HI"),
    ("Idaho", "ID"),
    ("Illinois", "IL"),
    ("Indiana", "IN"),
    ("Iowa", "IA"),
    ("Kansas", "KS"),
    ("Kentucky", "KY"),
    ("Louisiana", "LA"),
    ("Maine", "ME"),
    ("Maryland", "MD"),
    ("Massachusetts", "MA"),
    ("Michigan", "MI"),
    ("Minnesota", "MN"),
    ("Mississippi", "MS"),
    ("Missouri", "MO"),
    ("Montana", "MT"),
    ("Nebraska", "NE"),
    ("Nevada", "NV"),
    ("New Hampshire", "NH"),
    ("New Jersey", "NJ"),
    ("New Mexico", "NM"),
    ("New York", "NY"),
    ("North Carolina", "NC"),
    ("North Dakota", "ND"),
    ("Ohio", "OH"),
    ("Oklahoma", "OK"),
    ("Oregon", "OR"),
    ("Pennsylvania", "PA"),
    ("Rhode Island", "RI"),
    ("South Carolina", "SC"),
    ("South Dakota", "SD"),
    ("Tennessee", "TN"),
    ("Texas", "TX"),
    ("Utah", "UT"),
    ("Vermont", "VT"),
    ("Virginia", "VA"),
    ("Washington", "WA"),
    ("West Virginia", "WV"),
    ("Wisconsin", "WI"),
    ("Wyoming", "WY"),
];

/// Postal codes that are also ordinary words in an uppercase transcript.
const AMBIGUOUS_CODES: &[&str] = &["IN", "OR", "ME", "OK", "HI", "OH", "AL", "LA", "ID", "MA", "PA", "CO", "DE"];

const INSURANCE_CARRIERS: &[(&str, &str)] = &[
    ("blue cross blue shield", "Blue Cross Blue Shield"),
    ("blue cross", "Blue Cross Blue Shield"),
    ("blue shield", "Blue Cross Blue Shield"),
    ("bcbs", "Blue Cross Blue Shield"),
    ("aetna", "Aetna"),
    ("cigna", "Cigna"),
    ("unitedhealthcare", "UnitedHealthcare"),
    ("united healthcare", "UnitedHealthcare"),
    ("united", "UnitedHealthcare"),
    ("optum", "Optum"),
    ("humana", "Humana"),
    ("tricare", "Tricare"),
    ("kaiser", "Kaiser Permanente"),
    ("anthem", "Anthem"),
    ("oscar", "Oscar"),
    ("ambetter", "Ambetter"),
    ("magellan", "Magellan"),
    ("carefirst", "CareFirst"),
    ("highmark", "Highmark"),
];

const SELF_PAY_PHRASES: &[&str] = &[
    "self pay",
    "private pay",
    "out of pocket",
    "pay myself",
    "pay out of pocket",
    "no insurance",
    "dont have insurance",
    "do not have insurance",
    "cash",
    "uninsured",
];

static INSURANCE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:my insurance is|insurance is|i have|i've got|it's|its|insured (?:with|through)|coverage (?:with|through)|through)\s+([a-z][a-z&\- ]{2,40})",
    )
    .expect("invalid insurance regex")
});

const DAYS: &[(&str, &str)] = &[
    ("monday", "Monday"),
    ("mondays", "Monday"),
    ("tuesday", "Tuesday"),
    ("tuesdays", "Tuesday"),
    ("wednesday", "Wednesday"),
    ("wednesdays", "Wednesday"),
    ("thursday", "Thursday"),
    ("thursdays", "Thursday"),
    ("friday", "Friday"),
    ("fridays", "Friday"),
    ("saturday", "Saturday"),
    ("saturdays", "Saturday"),
    ("sunday", "Sunday"),
    ("sundays", "Sunday"),
    ("weekdays", "weekdays"),
    ("weekday", "weekdays"),
    ("weekends", "weekends"),
    ("weekend", "weekends"),
    ("any day", "any day"),
    ("every day", "any day"),
];

const TIMES: &[(&str, &str)] = &[
    ("morning", "mornings"),
    ("mornings", "mornings"),
    ("afternoon", "afternoons"),
    ("afternoons", "afternoons"),
    ("evening", "evenings"),
    ("evenings", "evenings"),
    ("lunch", "lunchtime"),
    ("lunchtime", "lunchtime"),
    ("after work", "after work"),
    ("after school", "after school"),
    ("anytime", "any time"),
    ("any time", "any time"),
    ("flexible", "any time"),
];

const AFFIRMATIONS: &[&str] = &[
    "yes",
    "yeah",
    "yep",
    "yup",
    "correct",
    "that works",
    "works for me",
    "sure",
    "okay",
    "ok",
    "sounds good",
    "thats right",
    "that is right",
    "right",
    "absolutely",
    "of course",
    "definitely",
    "perfect",
    "all good",
    "fine",
];

const NEGATIONS: &[&str] = &[
    "no",
    "nope",
    "not right",
    "not correct",
    "incorrect",
    "wrong",
    "doesnt work",
    "does not work",
    "thats not",
    "mistake",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    Unclear,
}

/// Interprets a yes/no answer. A negation anywhere wins over affirmation.
pub fn yes_no(text: &str) -> Answer {
    let normalized = normalize(text);
    if contains_any(&normalized, NEGATIONS) {
        Answer::No
    } else if contains_any(&normalized, AFFIRMATIONS) {
        Answer::Yes
    } else {
        Answer::Unclear
    }
}

fn title_case(words: &str) -> String {
    words
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keeps leading words until a stopword; `None` if nothing is left.
fn trim_name(candidate: &str) -> Option<String> {
    let words: Vec<&str> = candidate
        .split_whitespace()
        .take_while(|w| !NAME_STOPWORDS.contains(&normalize(w).as_str()))
        .collect();
    if words.is_empty() {
        return None;
    }
    Some(title_case(&words.join(" ")))
}

pub fn extract_name(text: &str) -> Option<String> {
    NAME_RE
        .captures_iter(text)
        .filter_map(|caps| trim_name(caps.get(1)?.as_str()))
        .next()
}

/// A short answer that is only a name, such as "Jordan Lee".
pub fn bare_name(text: &str) -> Option<String> {
    let head = text
        .split([',', '.', ';', '!', '?'])
        .next()
        .unwrap_or_default()
        .trim();
    let words: Vec<&str> = head.split_whitespace().collect();
    if words.is_empty() || words.len() > 3 {
        return None;
    }
    if !words
        .iter()
        .all(|w| w.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-'))
    {
        return None;
    }
    let name = trim_name(head)?;
    (name.split_whitespace().count() == words.len()).then_some(name)
}

/// Replaces spoken number words with digits.
pub fn spoken_numbers_to_digits(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let bare = normalize(word);
            NUMBER_WORDS
                .iter()
                .find(|(spoken, _)| *spoken == bare)
                .map(|(_, digit)| (*digit).to_string())
                .unwrap_or_else(|| word.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_phone(area: &str, exchange: &str, line: &str) -> String {
    format!("({}) {}-{}", area, exchange, line)
}

/// Extracts a US phone number, falling back to the caller ID when the
/// caller says "this number".
pub fn extract_phone(text: &str, caller_id: Option<&str>) -> Option<String> {
    let converted = spoken_numbers_to_digits(text);
    if let Some(caps) = PHONE_RE.captures(&converted) {
        return Some(format_phone(&caps[1], &caps[2], &caps[3]));
    }

    let digits: String = converted.chars().filter(char::is_ascii_digit).collect();
    let digits = match digits.len() {
        11 if digits.starts_with('1') => &digits[1..],
        10 => &digits[..],
        _ => "",
    };
    if !digits.is_empty() {
        return Some(format_phone(&digits[..3], &digits[3..6], &digits[6..]));
    }

    let normalized = normalize(text);
    if contains_any(&normalized, CALLER_ID_PHRASES) {
        let id: String = caller_id?.chars().filter(char::is_ascii_digit).collect();
        let id = id
            .strip_prefix('1')
            .filter(|rest| rest.len() == 10)
            .unwrap_or(id.as_str());
        if id.len() == 10 {
            return Some(format_phone(&id[..3], &id[3..6], &id[6..]));
        }
    }
    None
}

/// Extracts an email address, accepting spoken "at" and "dot".
pub fn extract_email(text: &str) -> Option<String> {
    if let Some(caps) = EMAIL_RE.captures(text) {
        return Some(caps[1].to_lowercase());
    }
    let spoken = text
        .replace(" underscore ", "_")
        .replace(" dash ", "-")
        .replace(" hyphen ", "-");
    let spoken = SPOKEN_AT_RE.replace_all(&spoken, "@");
    let spoken = SPOKEN_DOT_RE.replace_all(&spoken, ".");
    EMAIL_RE
        .captures(&spoken)
        .map(|caps| caps[1].trim_end_matches('.').to_lowercase())
}

/// Extracts a US state as its full name.
pub fn extract_state(text: &str) -> Option<String> {
    let normalized = normalize(text);
    let mut by_length: Vec<&(&str, &str)> = STATES.iter().collect();
    by_length.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
    if let Some((name, _)) = by_length
        .iter()
        .find(|(name, _)| contains_phrase(&normalized, name))
    {
        return Some((*name).to_string());
    }

    text.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|token| token.len() == 2 && token.chars().all(|c| c.is_ascii_uppercase()))
        .filter(|token| !AMBIGUOUS_CODES.contains(token))
        .find_map(|token| STATES.iter().find(|(_, code)| *code == token))
        .map(|(name, _)| (*name).to_string())
}

pub fn extract_age(text: &str) -> Option<u8> {
    let converted = spoken_numbers_to_digits(text);
    let caps = AGE_RE.captures(&converted)?;
    let value = caps.get(1).or(caps.get(2)).or(caps.get(3))?;
    value.as_str().parse().ok()
}

pub fn extract_partner_name(text: &str) -> Option<String> {
    PARTNER_RE
        .captures(text)
        .and_then(|caps| trim_name(caps.get(1)?.as_str()))
        .or_else(|| extract_name(text))
        .or_else(|| bare_name(text))
}

pub fn extract_child_name(text: &str) -> Option<String> {
    CHILD_NAME_RE
        .captures(text)
        .and_then(|caps| trim_name(caps.get(1)?.as_str()))
        .or_else(|| bare_name(text))
}

/// Mentions of Medicaid or Medicare that are not negated.
pub fn mentions_public_plan(text: &str) -> bool {
    let normalized = normalize(text);
    let mentioned = contains_any(&normalized, &["medicaid", "medicare"]);
    let negated = contains_any(
        &normalized,
        &[
            "dont have medicaid",
            "dont have medicare",
            "not on medicaid",
            "not on medicare",
            "no medicaid",
            "no medicare",
            "not medicaid",
            "not medicare",
        ],
    );
    mentioned && !negated
}

pub fn wants_in_person_only(text: &str) -> bool {
    let normalized = normalize(text);
    let asks = contains_any(
        &normalized,
        &[
            "in person only",
            "only in person",
            "need in person",
            "want in person",
            "prefer in person",
            "has to be in person",
            "needs to be in person",
            "come into the office",
            "face to face",
        ],
    );
    let negated = contains_any(
        &normalized,
        &["dont need in person", "no in person", "dont want in person"],
    );
    asks && !negated
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsuranceAnswer {
    Carrier(String),
    SelfPay,
    PublicPlan,
}

pub fn extract_insurance(text: &str) -> Option<InsuranceAnswer> {
    let normalized = normalize(text);
    if contains_any(&normalized, SELF_PAY_PHRASES) {
        return Some(InsuranceAnswer::SelfPay);
    }
    if mentions_public_plan(text) {
        return Some(InsuranceAnswer::PublicPlan);
    }
    if let Some((_, canonical)) = INSURANCE_CARRIERS
        .iter()
        .find(|(spoken, _)| contains_phrase(&normalized, spoken))
    {
        return Some(InsuranceAnswer::Carrier((*canonical).to_string()));
    }
    INSURANCE_NAME_RE
        .captures(text)
        .and_then(|caps| {
            let name = caps.get(1)?.as_str().trim();
            let name = name
                .split_whitespace()
                .take_while(|w| !["and", "but", "insurance", "plan", "through"].contains(w))
                .collect::<Vec<_>>()
                .join(" ");
            let rejected = name
                .split_whitespace()
                .next()
                .is_none_or(|first| ["no", "not", "a", "the", "to"].contains(&first));
            (!rejected).then(|| title_case(&name))
        })
        .map(InsuranceAnswer::Carrier)
}

/// Summarizes the days and times a caller said they are free.
pub fn extract_availability(text: &str) -> Option<String> {
    let normalized = normalize(text);
    let mut days: Vec<&str> = Vec::new();
    for (spoken, canonical) in DAYS {
        if contains_phrase(&normalized, spoken) && !days.contains(canonical) {
            days.push(canonical);
        }
    }
    let mut times: Vec<String> = Vec::new();
    for (spoken, canonical) in TIMES {
        if contains_phrase(&normalized, spoken) && !times.iter().any(|t| t == canonical) {
            times.push((*canonical).to_string());
        }
    }
    for caps in CLOCK_RE.captures_iter(text) {
        let clock = caps[0].trim().to_lowercase();
        if !times.contains(&clock) {
            times.push(clock);
        }
    }

    match (days.is_empty(), times.is_empty()) {
        (true, true) => None,
        (false, true) => Some(join_list(&days)),
        (true, false) => Some(join_list(&times)),
        (false, false) => Some(format!("{}, {}", join_list(&days), join_list(&times))),
    }
}

fn join_list<S: AsRef<str>>(items: &[S]) -> String {
    match items {
        [] => String::new(),
        [one] => one.as_ref().to_string(),
        [rest @ .., last] => format!(
            "{} and {}",
            rest.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", "),
            last.as_ref()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_answers() {
        assert_eq!(yes_no("yes that works"), Answer::Yes);
        assert_eq!(yes_no("Yep, sounds good."), Answer::Yes);
        assert_eq!(yes_no("no, the email is wrong"), Answer::No);
        assert_eq!(yes_no("that doesn't work for me"), Answer::No);
        assert_eq!(yes_no("hmm"), Answer::Unclear);
    }

    #[test]
    fn name_stops_at_stopwords() {
        assert_eq!(
            extract_name("My name is jane doe and my number is 555-123-4567").as_deref(),
            Some("Jane Doe")
        );
        assert_eq!(extract_name("I'm calling about therapy"), None);
        assert_eq!(extract_name("This is Sam."), Some("Sam".to_string()));
    }

    #[test]
    fn phone_formats() {
        assert_eq!(
            extract_phone("it's 555.123.4567", None).as_deref(),
            Some("(555) 123-4567")
        );
        assert_eq!(
            extract_phone("five five five one two three four five six seven", None).as_deref(),
            Some("(555) 123-4567")
        );
        assert_eq!(
            extract_phone("you can use this number", Some("+15557654321")).as_deref(),
            Some("(555) 765-4321")
        );
        assert_eq!(extract_phone("call me maybe", None), None);
    }

    #[test]
    fn spoken_email_is_normalized() {
        assert_eq!(
            extract_email("it's jane.doe at gmail dot com").as_deref(),
            Some("jane.doe@gmail.com")
        );
        assert_eq!(
            extract_email("Email: Jane@Example.org").as_deref(),
            Some("jane@example.org")
        );
        assert_eq!(extract_email("I live at home"), None);
    }

    #[test]
    fn states_match_longest_name_first() {
        assert_eq!(extract_state("I live in West Virginia").as_deref(), Some("West Virginia"));
        assert_eq!(extract_state("we're in new york").as_deref(), Some("New York"));
        assert_eq!(extract_state("I'm in NJ").as_deref(), Some("New Jersey"));
        assert_eq!(extract_state("I'm IN the area"), None);
    }

    #[test]
    fn child_age_accepts_words_and_digits() {
        assert_eq!(extract_age("she is eight years old"), Some(8));
        assert_eq!(extract_age("he's 12"), Some(12));
        assert_eq!(extract_age("my son is 14"), Some(14));
        assert_eq!(extract_age("a 9-year-old"), Some(9));
    }

    #[test]
    fn child_and_partner_names() {
        assert_eq!(
            extract_child_name("her name is Emma and she is twelve").as_deref(),
            Some("Emma")
        );
        assert_eq!(extract_child_name("Liam").as_deref(), Some("Liam"));
        assert_eq!(
            extract_partner_name("my husband's name is Chris").as_deref(),
            Some("Chris")
        );
    }

    #[test]
    fn disqualifiers_respect_negation() {
        assert!(mentions_public_plan("I only have Medicaid"));
        assert!(!mentions_public_plan("I don't have Medicaid, I have Aetna"));
        assert!(wants_in_person_only("it has to be in person"));
        assert!(!wants_in_person_only("I don't need in person, video is fine"));
    }

    #[test]
    fn insurance_answers() {
        assert_eq!(
            extract_insurance("I have Blue Cross"),
            Some(InsuranceAnswer::Carrier("Blue Cross Blue Shield".to_string()))
        );
        assert_eq!(extract_insurance("I'll pay out of pocket"), Some(InsuranceAnswer::SelfPay));
        assert_eq!(extract_insurance("medicare"), Some(InsuranceAnswer::PublicPlan));
        assert_eq!(
            extract_insurance("my insurance is premera"),
            Some(InsuranceAnswer::Carrier("Premera".to_string()))
        );
        assert_eq!(extract_insurance("um"), None);
    }

    #[test]
    fn availability_summary() {
        assert_eq!(
            extract_availability("Tuesdays and Thursdays in the evening").as_deref(),
            Some("Tuesday and Thursday, evenings")
        );
        assert_eq!(
            extract_availability("weekdays after 5pm").as_deref(),
            Some("weekdays, after 5pm")
        );
        assert_eq!(extract_availability("whenever"), None);
    }
}
